use anyhow::{Context, Result};
use argh::FromArgs;
use jobsh::command::ExitCode;
use jobsh::line::{EditorLines, MemoryLines};
use jobsh::{DEFAULT_PROMPT, Interpreter, signals};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode, WriteLogger};
use std::fs::File;
use std::io::IsTerminal;
use std::path::PathBuf;

#[derive(FromArgs)]
/// A small interactive shell with pipelines, job control and scripts.
struct Args {
    /// prompt shown before each line
    #[argh(option, default = "DEFAULT_PROMPT.to_string()")]
    prompt: String,

    /// log level: off, error, warn, info, debug or trace
    #[argh(option, default = "LevelFilter::Warn")]
    log_level: LevelFilter,

    /// append logs to this file instead of writing them to stderr
    #[argh(option)]
    log_file: Option<PathBuf>,

    /// script to run instead of reading commands interactively
    #[argh(positional)]
    script: Option<PathBuf>,
}

fn init_logging(args: &Args) -> Result<()> {
    match &args.log_file {
        Some(path) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            WriteLogger::init(args.log_level, Config::default(), file)
        }
        None => TermLogger::init(
            args.log_level,
            Config::default(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        ),
    }
    .context("cannot initialize logging")
}

fn run(args: Args) -> Result<ExitCode> {
    let terminal = std::io::stdin().is_terminal();
    signals::install(terminal)?;

    match args.script {
        Some(path) => Interpreter::new(MemoryLines::default(), terminal).run_script(&path),
        None => {
            let mut shell = Interpreter::new(EditorLines::new()?, terminal);
            shell.set_prompt(args.prompt);
            shell.repl()
        }
    }
}

fn main() {
    let args: Args = argh::from_env();
    if let Err(e) = init_logging(&args) {
        eprintln!("jobsh: {e:#}");
    }

    let code = match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("jobsh: {e:#}");
            1
        }
    };
    std::process::exit(code);
}
