//! Run Executor
//!
//! Invokes the external sync engine synchronously. stdout and stderr are
//! attached to the same pipe, so the captured buffer keeps the order the
//! engine wrote in. Each line read is also echoed to our own stdout for
//! whatever collects the scheduler's logs.
//!
//! Execution never fails from the caller's point of view: a missing binary
//! becomes exit code 127, a signal becomes `128 + signal`.

use crate::classifier::RunResult;
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, BufReader, Write};
use std::process::{Command, ExitStatus, Stdio};

/// Exit code reported when the engine cannot be started at all.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// How to invoke the sync engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineCommand {
    /// Program name or path
    pub program: String,
    /// Arguments of a full run; a scoped run appends the collection
    pub args: Vec<String>,
    /// Arguments prepended for the elevated-verbosity diagnostic run
    pub verbose_args: Vec<String>,
}

impl Default for EngineCommand {
    fn default() -> Self {
        Self {
            program: "vdirsyncer".to_string(),
            args: vec!["sync".to_string()],
            verbose_args: vec!["-vdebug".to_string()],
        }
    }
}

impl EngineCommand {
    pub fn full_args(&self) -> Vec<String> {
        self.args.clone()
    }

    pub fn scoped_args(&self, unit: &str) -> Vec<String> {
        let mut args = self.args.clone();
        args.push(unit.to_string());
        args
    }

    pub fn diagnostic_args(&self) -> Vec<String> {
        self.verbose_args
            .iter()
            .chain(self.args.iter())
            .cloned()
            .collect()
    }
}

/// The external sync engine, as seen by the supervisor.
///
/// Implementations must be sequential: one invocation in flight at a time.
#[cfg_attr(test, mockall::automock)]
pub trait SyncEngine {
    /// Sync every configured collection.
    fn run_full(&self) -> RunResult;

    /// Sync a single collection.
    fn run_unit(&self, unit: &str) -> RunResult;

    /// Full run at elevated verbosity. Advisory output only.
    fn run_diagnostic(&self) -> RunResult;
}

impl<T: SyncEngine + ?Sized> SyncEngine for &T {
    fn run_full(&self) -> RunResult {
        (**self).run_full()
    }

    fn run_unit(&self, unit: &str) -> RunResult {
        (**self).run_unit(unit)
    }

    fn run_diagnostic(&self) -> RunResult {
        (**self).run_diagnostic()
    }
}

/// Runs the engine as a child process.
pub struct ProcessEngine {
    command: EngineCommand,
    forward_output: bool,
}

impl ProcessEngine {
    pub fn new(command: EngineCommand) -> Self {
        Self {
            command,
            forward_output: true,
        }
    }

    /// Capture output without echoing it to stdout.
    pub fn without_forwarding(mut self) -> Self {
        self.forward_output = false;
        self
    }

    pub fn command(&self) -> &EngineCommand {
        &self.command
    }

    fn execute(&self, args: &[String]) -> RunResult {
        tracing::debug!(program = %self.command.program, ?args, "Invoking sync engine");
        match self.capture(args) {
            Ok((status, output)) => RunResult::new(exit_code_of(status), output),
            Err(e) => {
                tracing::warn!(program = %self.command.program, error = %e, "Sync engine could not be run");
                let output = format!("error: failed to run {}: {e}\n", self.command.program);
                self.forward(output.as_bytes());
                RunResult::new(SPAWN_FAILURE_EXIT_CODE, output)
            }
        }
    }

    fn capture(&self, args: &[String]) -> io::Result<(ExitStatus, String)> {
        let (reader, writer) = io::pipe()?;
        let writer_err = writer.try_clone()?;

        let mut cmd = Command::new(&self.command.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(writer_err);
        let mut child = cmd.spawn()?;
        // The Command still owns the parent's write ends; drop it or the
        // read below never sees EOF.
        drop(cmd);

        let mut buf = Vec::new();
        let drained = self.drain(reader, &mut buf);
        let status = child.wait()?;
        drained?;

        Ok((status, String::from_utf8_lossy(&buf).into_owned()))
    }

    fn drain(&self, reader: io::PipeReader, buf: &mut Vec<u8>) -> io::Result<()> {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                return Ok(());
            }
            self.forward(&line);
            buf.extend_from_slice(&line);
        }
    }

    fn forward(&self, bytes: &[u8]) {
        if !self.forward_output {
            return;
        }
        let mut out = io::stdout().lock();
        // Log forwarding is best-effort; a closed stdout must not fail the run.
        let _ = out.write_all(bytes);
        let _ = out.flush();
    }
}

impl SyncEngine for ProcessEngine {
    fn run_full(&self) -> RunResult {
        self.execute(&self.command.full_args())
    }

    fn run_unit(&self, unit: &str) -> RunResult {
        self.execute(&self.command.scoped_args(unit))
    }

    fn run_diagnostic(&self) -> RunResult {
        self.execute(&self.command.diagnostic_args())
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
