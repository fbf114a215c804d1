use crate::command::{
    BuiltinContext, CommandFactory, Dispatch, ExecutableCommand, ExitCode,
};
use anyhow::{Context, Result};
use argh::{EarlyExit, FromArgs};
use std::env;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "history" or "cd".
    fn name() -> &'static str;

    /// Executes the command.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(self, stdout: &mut dyn Write, ctx: &mut BuiltinContext<'_>) -> Result<ExitCode>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode> {
        match T::execute(*self, stdout, ctx) {
            Ok(x) => Ok(x),
            Err(e) => {
                eprintln!("jobsh: {e:#}");
                Ok(1)
            }
        }
    }
}

struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        _ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode> {
        if self.is_error {
            eprintln!("{}", self.output);
            Ok(1)
        } else {
            writeln!(stdout, "{}", self.output)?;
            Ok(0)
        }
    }
}

/// Factory allows creating instances of a [`BuiltinCommand`] by name.
pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>> {
        if name == T::name() {
            Some(match T::from_args(&[name], args) {
                Ok(cmd) => Box::new(cmd),
                Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                    output,
                    is_error: status.is_err(),
                }),
            })
        } else {
            None
        }
    }
}

/// Name-to-handler table consulted before launching a process.
pub struct BuiltinTable {
    commands: Vec<Box<dyn CommandFactory>>,
}

impl BuiltinTable {
    /// Create a table with a custom set of command factories.
    pub fn new(commands: Vec<Box<dyn CommandFactory>>) -> Self {
        Self { commands }
    }

    /// Runs `args` as a builtin if the table knows `args[0]`.
    ///
    /// Known names always come back as [`Dispatch::Handled`], even when the
    /// builtin fails; the failure is reported and turned into a non-zero status.
    pub fn dispatch(
        &self,
        args: &[String],
        stdout: &mut dyn Write,
        ctx: &mut BuiltinContext<'_>,
    ) -> Dispatch {
        let Some((name, rest)) = args.split_first() else {
            return Dispatch::NotABuiltin;
        };
        let rest: Vec<&str> = rest.iter().map(String::as_str).collect();
        for factory in &self.commands {
            if let Some(cmd) = factory.try_create(name, &rest) {
                log::debug!("running builtin {name}");
                let status = match cmd.execute(stdout, ctx) {
                    Ok(code) => code,
                    Err(e) => {
                        eprintln!("jobsh: {name}: {e:#}");
                        1
                    }
                };
                if let Err(e) = stdout.flush() {
                    log::warn!("cannot flush output of {name}: {e}");
                }
                return Dispatch::Handled(status);
            }
        }
        Dispatch::NotABuiltin
    }

    /// Whether `name` would be handled in-process.
    pub fn contains(&self, name: &str) -> bool {
        self.commands
            .iter()
            .any(|factory| factory.try_create(name, &[]).is_some())
    }
}

impl Default for BuiltinTable {
    /// Create a table with the shell's builtins: `cd`, `exit`, `help`, `history`.
    fn default() -> Self {
        Self::new(vec![
            Box::new(Factory::<Cd>::default()),
            Box::new(Factory::<Exit>::default()),
            Box::new(Factory::<Help>::default()),
            Box::new(Factory::<History>::default()),
        ])
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory. Defaults to $HOME when omitted.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(self, _stdout: &mut dyn Write, ctx: &mut BuiltinContext<'_>) -> Result<ExitCode> {
        let env = &mut *ctx.env;
        let target = match &self.target {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => match env.get_var("HOME") {
                Some(home) => PathBuf::from(home),
                None => return Err(anyhow::anyhow!("cd: HOME environment variable not set")),
            },
        };

        let new_dir = if target.is_absolute() {
            target
        } else {
            env.current_dir.join(target)
        };

        let canonical = fs::canonicalize(&new_dir)
            .with_context(|| format!("cd: {}", new_dir.display()))?;

        env::set_current_dir(&canonical)
            .with_context(|| format!("cd: can't chdir to {}", canonical.display()))?;
        env.current_dir = canonical;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Exit the shell.
pub struct Exit {
    #[argh(positional, greedy)]
    /// ignored; the shell always exits with status 0
    pub _args: Vec<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(self, _stdout: &mut dyn Write, ctx: &mut BuiltinContext<'_>) -> Result<ExitCode> {
        ctx.env.exit_request = Some(0);
        Ok(0)
    }
}

const HELP_TEXT: &str = "\
jobsh - a small job-control shell
Built-in commands:
  cd <directory>   - Change the current working directory.
  exit             - Exit the shell.
  help             - Display this help message.
  history          - Display command history.
  run <script>     - Execute a script file.
Other commands are executed as external programs.
Operators: cmd1 | cmd2, cmd < file, cmd > file, cmd >> file";

#[derive(FromArgs)]
/// Display usage information.
pub struct Help {}

impl BuiltinCommand for Help {
    fn name() -> &'static str {
        "help"
    }

    fn execute(self, stdout: &mut dyn Write, _ctx: &mut BuiltinContext<'_>) -> Result<ExitCode> {
        writeln!(stdout, "{HELP_TEXT}")?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Display the command history.
pub struct History {}

impl BuiltinCommand for History {
    fn name() -> &'static str {
        "history"
    }

    fn execute(self, stdout: &mut dyn Write, ctx: &mut BuiltinContext<'_>) -> Result<ExitCode> {
        for (index, line) in ctx.lines.history_entries() {
            writeln!(stdout, "{index}  {line}")?;
        }
        Ok(0)
    }
}
