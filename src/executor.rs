use crate::builtin::BuiltinTable;
use crate::command::{BuiltinContext, Dispatch, ExitCode, JobResult};
use crate::external::{PreparedCommand, STATUS_NOT_EXECUTABLE, child_diagnostic};
use crate::job::JobControl;
use crate::parser::{Pipeline, StageSpec};
use crate::signals::{self, ChildSignalGuard};
use anyhow::{Context, Result};
use nix::fcntl::{FcntlArg, FdFlag, fcntl};
use nix::unistd::{ForkResult, Pid, dup2, fork, getpgrp, setpgid, tcsetpgrp};
use std::ffi::{OsStr, OsString};
use std::fs::{File, OpenOptions};
use std::io::{self, PipeReader};
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

/// Runs parsed pipelines: builtins in-process, everything else as a job.
pub struct Executor {
    builtins: BuiltinTable,
    jobs: JobControl,
}

/// Files a stage reads from or writes to instead of a pipe or the terminal.
struct Redirections {
    input: Option<File>,
    output: Option<File>,
}

impl Executor {
    pub fn new(builtins: BuiltinTable, jobs: JobControl) -> Self {
        Self { builtins, jobs }
    }

    pub fn jobs(&self) -> &JobControl {
        &self.jobs
    }

    pub fn jobs_mut(&mut self) -> &mut JobControl {
        &mut self.jobs
    }

    /// Runs `pipeline` in the foreground and waits for it.
    ///
    /// Only the first stage is offered to the builtin table. When it is a
    /// builtin, the remaining stages still run but get no input from it.
    /// An `Err` means the shell itself could not go on (pipe or fork failure).
    pub fn run(&mut self, pipeline: &Pipeline, ctx: &mut BuiltinContext<'_>) -> Result<JobResult> {
        let mut start = 0;
        let mut status = 0;
        if let Some(code) = self.run_builtin(pipeline.first(), ctx) {
            if let Some(exit) = ctx.env.take_exit_request() {
                return Ok(JobResult::Exit(exit));
            }
            if pipeline.len() == 1 {
                return Ok(JobResult::Completed(code));
            }
            start = 1;
            status = code;
        }

        let _guard = ChildSignalGuard::block()?;
        let launched = self.launch(pipeline, start, ctx);
        let waited = self.jobs.wait_foreground();
        let tail_status = launched?;

        Ok(match waited? {
            Some(JobResult::Completed(code)) => JobResult::Completed(tail_status.unwrap_or(code)),
            Some(other) => other,
            None => JobResult::Completed(tail_status.unwrap_or(status)),
        })
    }

    /// Tears down suspended jobs. Called once before the shell exits.
    pub fn shutdown(&mut self) {
        self.jobs.shutdown();
    }

    fn run_builtin(&self, stage: &StageSpec, ctx: &mut BuiltinContext<'_>) -> Option<ExitCode> {
        if !self.builtins.contains(stage.program()) {
            return None;
        }
        let dispatch = match &stage.output {
            Some(path) => match open_output(&ctx.env.current_dir, path, stage.append) {
                Ok(mut file) => self.builtins.dispatch(&stage.args, &mut file, ctx),
                Err(e) => {
                    eprintln!("jobsh: {e:#}");
                    Dispatch::Handled(1)
                }
            },
            None => self
                .builtins
                .dispatch(&stage.args, &mut io::stdout().lock(), ctx),
        };
        match dispatch {
            Dispatch::Handled(code) => Some(code),
            Dispatch::NotABuiltin => None,
        }
    }

    /// Forks every stage from `start` on and registers it with the job.
    ///
    /// Returns `Some(1)` when the last stage could not be started (a NUL byte
    /// in an argument, or a redirection that failed to open); its status then
    /// stands for the pipeline.
    fn launch(
        &mut self,
        pipeline: &Pipeline,
        start: usize,
        ctx: &BuiltinContext<'_>,
    ) -> Result<Option<ExitCode>> {
        let search_paths = ctx.env.get_var("PATH").map(OsString::from);
        let cwd = ctx.env.current_dir.as_path();
        let mut previous: Option<PipeReader> = None;
        let mut tail_status = None;

        for (index, stage) in pipeline.stages().iter().enumerate().skip(start) {
            let (next_read, write_end) = match pipeline.successor(index) {
                Some(_) => {
                    let (reader, writer) = io::pipe().context("cannot create pipe")?;
                    (Some(reader), Some(writer))
                }
                None => (None, None),
            };
            let upstream = previous.take();
            previous = next_read;

            // A stage that cannot be prepared is skipped; its pipe ends close here.
            let (command, files) = match prepare_stage(stage, search_paths.as_deref(), cwd) {
                Ok(prepared) => prepared,
                Err(e) => {
                    eprintln!("jobsh: {e:#}");
                    if pipeline.successor(index).is_none() {
                        tail_status = Some(1);
                    }
                    continue;
                }
            };
            if !command.is_resolved() {
                log::debug!("{} not found in PATH", stage.program());
            }

            let stdin = files
                .input
                .as_ref()
                .map(AsRawFd::as_raw_fd)
                .or(upstream.as_ref().map(AsRawFd::as_raw_fd));
            let stdout = files
                .output
                .as_ref()
                .map(AsRawFd::as_raw_fd)
                .or(write_end.as_ref().map(AsRawFd::as_raw_fd));
            let pgid = self.jobs.foreground();
            let terminal = self.jobs.terminal();

            match unsafe { fork() }.context("fork failed")? {
                ForkResult::Child => {
                    enter_job(pgid, terminal);
                    signals::reset_for_child();
                    redirect(stdin, libc::STDIN_FILENO, &command);
                    redirect(stdout, libc::STDOUT_FILENO, &command);
                    command.exec()
                }
                ForkResult::Parent { child } => {
                    log::debug!("launched {} as {child}", stage.program());
                    self.jobs.add_member(child);
                }
            }
            // The child owns its copies now.
            drop(files);
            drop(upstream);
            drop(write_end);
        }
        Ok(tail_status)
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(BuiltinTable::default(), JobControl::default())
    }
}

/// Converts the arguments, then opens the stage's files.
fn prepare_stage(
    stage: &StageSpec,
    search_paths: Option<&OsStr>,
    cwd: &Path,
) -> Result<(PreparedCommand, Redirections)> {
    let command = PreparedCommand::new(&stage.args, search_paths, cwd)
        .with_context(|| stage.program().escape_default().to_string())?;
    let files = open_redirections(cwd, stage)?;
    Ok((command, files))
}

fn open_redirections(cwd: &Path, stage: &StageSpec) -> Result<Redirections> {
    let input = match &stage.input {
        Some(path) => {
            let path = cwd.join(path);
            Some(File::open(&path).with_context(|| path.display().to_string())?)
        }
        None => None,
    };
    let output = match &stage.output {
        Some(path) => Some(open_output(cwd, path, stage.append)?),
        None => None,
    };
    Ok(Redirections { input, output })
}

fn open_output(cwd: &Path, path: &str, append: bool) -> Result<File> {
    let path = cwd.join(path);
    let mut options = OpenOptions::new();
    options.create(true).mode(0o644);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    options
        .open(&path)
        .with_context(|| path.display().to_string())
}

/// Child side: joins the job's process group and takes the terminal if leader.
fn enter_job(pgid: Option<Pid>, terminal: bool) {
    let _ = setpgid(Pid::from_raw(0), pgid.unwrap_or(Pid::from_raw(0)));
    if terminal && pgid.is_none() {
        let stdin = unsafe { BorrowedFd::borrow_raw(libc::STDIN_FILENO) };
        let _ = tcsetpgrp(stdin, getpgrp());
    }
}

/// Child side: makes `fd` the process's `target` descriptor.
fn redirect(fd: Option<RawFd>, target: RawFd, command: &PreparedCommand) {
    let result = match fd {
        Some(raw) if raw == target => fcntl(raw, FcntlArg::F_SETFD(FdFlag::empty())).map(drop),
        Some(raw) => dup2(raw, target).map(drop),
        None => return,
    };
    if let Err(e) = result {
        child_diagnostic(command.name(), e.desc().as_bytes());
        unsafe { libc::_exit(STATUS_NOT_EXECUTABLE) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Environment;
    use crate::expand::NoExpansion;
    use crate::line::MemoryLines;
    use crate::parser::parse;
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn make_unique_temp_dir(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let p = std::env::temp_dir().join(format!(
            "executor_tests_{}_{}_{}",
            std::process::id(),
            tag,
            nanos
        ));
        fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    fn env_in(dir: &Path) -> Environment {
        let mut env = Environment::new();
        env.current_dir = dir.to_path_buf();
        env
    }

    fn run_pipeline(exec: &mut Executor, env: &mut Environment, pipeline: &Pipeline) -> JobResult {
        let lines = MemoryLines::default();
        let mut ctx = BuiltinContext { env, lines: &lines };
        exec.run(pipeline, &mut ctx).expect("run failed")
    }

    fn run_line(exec: &mut Executor, env: &mut Environment, line: &str) -> JobResult {
        let pipeline = parse(line, &NoExpansion)
            .expect("parse failed")
            .expect("expected a pipeline");
        run_pipeline(exec, env, &pipeline)
    }

    #[test]
    fn test_exit_status_of_single_command() {
        let mut exec = Executor::default();
        let mut env = Environment::new();
        assert_eq!(run_line(&mut exec, &mut env, "true"), JobResult::Completed(0));
        assert_eq!(run_line(&mut exec, &mut env, "false"), JobResult::Completed(1));
    }

    #[test]
    fn test_foreground_job_is_cleared_after_run() {
        let mut exec = Executor::default();
        let mut env = Environment::new();
        run_line(&mut exec, &mut env, "true | true | true");
        assert_eq!(exec.jobs().foreground(), None);
        assert!(exec.jobs().suspended().is_empty());
    }

    #[test]
    fn test_pipeline_status_is_last_stage() {
        let mut exec = Executor::default();
        let mut env = Environment::new();
        assert_eq!(run_line(&mut exec, &mut env, "false | true"), JobResult::Completed(0));
        assert_eq!(run_line(&mut exec, &mut env, "true | false"), JobResult::Completed(1));
    }

    #[test]
    fn test_unknown_program_exits_127() {
        let mut exec = Executor::default();
        let mut env = Environment::new();
        assert_eq!(
            run_line(&mut exec, &mut env, "definitely-not-a-command-jobsh"),
            JobResult::Completed(127)
        );
    }

    #[test]
    fn test_output_redirection_truncates_and_appends() {
        let dir = make_unique_temp_dir("out");
        let mut exec = Executor::default();
        let mut env = env_in(&dir);

        run_line(&mut exec, &mut env, "echo first > out.txt");
        run_line(&mut exec, &mut env, "echo second > out.txt");
        assert_eq!(fs::read_to_string(dir.join("out.txt")).unwrap(), "second\n");

        run_line(&mut exec, &mut env, "echo third >> out.txt");
        assert_eq!(
            fs::read_to_string(dir.join("out.txt")).unwrap(),
            "second\nthird\n"
        );
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_pipe_with_input_and_output_files() {
        let dir = make_unique_temp_dir("pipe");
        fs::write(dir.join("input.txt"), "pear\napple\nerror: fig\n").unwrap();
        let mut exec = Executor::default();
        let mut env = env_in(&dir);

        let result = run_line(&mut exec, &mut env, "cat < input.txt | sort | cat > output.txt");
        assert_eq!(result, JobResult::Completed(0));
        assert_eq!(
            fs::read_to_string(dir.join("output.txt")).unwrap(),
            "apple\nerror: fig\npear\n"
        );
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_missing_input_file_skips_stage() {
        let dir = make_unique_temp_dir("missing");
        let mut exec = Executor::default();
        let mut env = env_in(&dir);

        assert_eq!(
            run_line(&mut exec, &mut env, "cat < nope.txt"),
            JobResult::Completed(1)
        );
        assert_eq!(
            run_line(&mut exec, &mut env, "cat < nope.txt | echo still > out.txt"),
            JobResult::Completed(0)
        );
        assert_eq!(fs::read_to_string(dir.join("out.txt")).unwrap(), "still\n");
        assert_eq!(exec.jobs().foreground(), None);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_nul_byte_in_argument_fails_only_that_stage() {
        let dir = make_unique_temp_dir("nul");
        let mut exec = Executor::default();
        let mut env = env_in(&dir);

        assert_eq!(
            run_line(&mut exec, &mut env, "echo a\0b > skipped.txt"),
            JobResult::Completed(1)
        );
        assert!(!dir.join("skipped.txt").exists());

        assert_eq!(
            run_line(&mut exec, &mut env, "echo a\0b | echo next > out.txt"),
            JobResult::Completed(0)
        );
        assert_eq!(fs::read_to_string(dir.join("out.txt")).unwrap(), "next\n");
        assert_eq!(exec.jobs().foreground(), None);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_signal_death_maps_to_128_plus_signo() {
        let mut exec = Executor::default();
        let mut env = Environment::new();
        let pipeline = Pipeline::new(vec![StageSpec {
            args: vec!["sh".into(), "-c".into(), "kill -9 $$".into()],
            input: None,
            output: None,
            append: false,
        }]);
        assert_eq!(
            run_pipeline(&mut exec, &mut env, &pipeline),
            JobResult::Completed(128 + 9)
        );
    }

    #[test]
    fn test_exit_builtin_is_reported() {
        let mut exec = Executor::default();
        let mut env = Environment::new();
        assert_eq!(run_line(&mut exec, &mut env, "exit"), JobResult::Exit(0));
        assert_eq!(env.exit_request, None);
    }

    #[test]
    fn test_builtin_output_can_be_redirected() {
        let dir = make_unique_temp_dir("help");
        let mut exec = Executor::default();
        let mut env = env_in(&dir);

        assert_eq!(
            run_line(&mut exec, &mut env, "help > help.txt"),
            JobResult::Completed(0)
        );
        let text = fs::read_to_string(dir.join("help.txt")).unwrap();
        assert!(text.contains("Built-in commands:"));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_stages_after_builtin_still_run() {
        let dir = make_unique_temp_dir("after");
        let mut exec = Executor::default();
        let mut env = env_in(&dir);

        let result = run_line(&mut exec, &mut env, "help > help.txt | echo done > out.txt");
        assert_eq!(result, JobResult::Completed(0));
        assert_eq!(fs::read_to_string(dir.join("out.txt")).unwrap(), "done\n");
        assert!(dir.join("help.txt").exists());
        let _ = fs::remove_dir_all(dir);
    }
}
