use crate::env::Environment;
use crate::line::LineProvider;
use anyhow::Result;
use nix::unistd::Pid;
use std::io::Write;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// This mirrors the convention used by POSIX shells and many command-line tools.
pub type ExitCode = i32;

/// What happened to a pipeline handed to the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobResult {
    /// Every stage finished; the status of the last one (or of the builtin).
    Completed(ExitCode),
    /// The foreground stage was stopped and the job was put aside.
    Stopped { pid: Pid },
    /// The `exit` builtin asked the shell to terminate with this code.
    Exit(ExitCode),
}

impl JobResult {
    /// Status used when the result is treated as a condition or `$?`-like value.
    pub fn status(&self) -> ExitCode {
        match *self {
            JobResult::Completed(code) | JobResult::Exit(code) => code,
            JobResult::Stopped { .. } => 128 + libc::SIGTSTP,
        }
    }
}

/// Whether execution should go on after a statement or line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Keep going; carries the most recent status.
    Continue(ExitCode),
    /// Unwind everything and terminate with this code.
    Exit(ExitCode),
}

impl From<JobResult> for Outcome {
    fn from(result: JobResult) -> Self {
        match result {
            JobResult::Exit(code) => Outcome::Exit(code),
            other => Outcome::Continue(other.status()),
        }
    }
}

/// Result of offering a command to the builtin table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The command was a builtin and ran in-process with this status.
    Handled(ExitCode),
    /// The table does not know the name; the caller must launch a process.
    NotABuiltin,
}

/// Shell state a builtin may read or change.
pub struct BuiltinContext<'a> {
    pub env: &'a mut Environment,
    pub lines: &'a dyn LineProvider,
}

/// Object-safe trait for any command that runs inside the shell process.
pub trait ExecutableCommand {
    /// Executes the command, writing its normal output to `stdout`.
    fn execute(self: Box<Self>, stdout: &mut dyn Write, ctx: &mut BuiltinContext<'_>)
    -> Result<ExitCode>;
}

/// Factory that tries to create a command from a name and its arguments.
///
/// Returns `None` when the factory doesn't recognize the `name`.
pub trait CommandFactory {
    /// Attempt to create a command instance for the provided name and arguments.
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>>;
}
