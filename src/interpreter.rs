use crate::builtin::BuiltinTable;
use crate::command::{BuiltinContext, ExitCode, JobResult, Outcome};
use crate::env::Environment;
use crate::executor::Executor;
use crate::expand::{Expander, GlobExpander};
use crate::job::JobControl;
use crate::lexer::{self, Token};
use crate::line::LineProvider;
use crate::parser::{self, Pipeline};
use crate::script::{Block, ScriptContext, Statement, parse_script};
use anyhow::{Context, Result, bail};
use std::fs;
use std::path::Path;

/// Largest script file `run` will load.
pub const MAX_SCRIPT_BYTES: u64 = 64 * 1024;

/// Default prompt of the interactive loop.
pub const DEFAULT_PROMPT: &str = "jobsh> ";

/// Something that can run a pipeline for the script interpreter.
pub trait Runner {
    fn run(&mut self, pipeline: &Pipeline) -> Result<JobResult>;
}

/// Runs the statements of `block` in order.
///
/// Conditions are command lines, parsed with `expander` and run every time
/// they are reached; status 0 counts as true. An empty or unparsable condition
/// is false. Returns [`Outcome::Exit`] as soon as any command asks to exit.
pub fn execute(
    block: &Block,
    vars: &mut ScriptContext,
    runner: &mut dyn Runner,
    expander: &dyn Expander,
) -> Result<Outcome> {
    let statements = block.statements();
    let mut status = 0;
    let mut i = 0;
    while i < statements.len() {
        match &statements[i] {
            Statement::Command { text, pipeline } => match pipeline {
                Ok(Some(pipeline)) => {
                    let pipeline = pipeline.map_words(|word| vars.substitute(word));
                    match Outcome::from(runner.run(&pipeline)?) {
                        Outcome::Continue(code) => status = code,
                        exit => return Ok(exit),
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    eprintln!("jobsh: {text}: {e}");
                    status = 1;
                }
            },
            Statement::Assignment { text } => {
                if !vars.assign(text) {
                    log::warn!("ignoring assignment with no name: {text:?}");
                }
            }
            Statement::If { condition, body } => {
                let holds = match evaluate(condition, vars, runner, expander)? {
                    Outcome::Continue(code) => code == 0,
                    exit => return Ok(exit),
                };
                let branch = match statements.get(i + 1) {
                    Some(Statement::Else { body: otherwise }) => {
                        i += 1;
                        if holds { Some(body) } else { Some(otherwise) }
                    }
                    _ => holds.then_some(body),
                };
                if let Some(branch) = branch {
                    match execute(branch, vars, runner, expander)? {
                        Outcome::Continue(code) => status = code,
                        exit => return Ok(exit),
                    }
                }
            }
            Statement::Else { .. } => {
                log::debug!("skipping 'else' that does not follow an 'if'");
            }
            Statement::While { condition, body } => loop {
                match evaluate(condition, vars, runner, expander)? {
                    Outcome::Continue(0) => {}
                    Outcome::Continue(_) => break,
                    exit => return Ok(exit),
                }
                match execute(body, vars, runner, expander)? {
                    Outcome::Continue(code) => status = code,
                    exit => return Ok(exit),
                }
            },
        }
        i += 1;
    }
    Ok(Outcome::Continue(status))
}

fn evaluate(
    condition: &str,
    vars: &ScriptContext,
    runner: &mut dyn Runner,
    expander: &dyn Expander,
) -> Result<Outcome> {
    match parser::parse(condition, expander) {
        Ok(Some(pipeline)) => {
            let pipeline = pipeline.map_words(|word| vars.substitute(word));
            Ok(runner.run(&pipeline)?.into())
        }
        Ok(None) => {
            log::debug!("empty condition is false");
            Ok(Outcome::Continue(1))
        }
        Err(e) => {
            eprintln!("jobsh: {condition}: {e}");
            Ok(Outcome::Continue(1))
        }
    }
}

fn read_script(path: &Path) -> Result<String> {
    let size = fs::metadata(path)
        .with_context(|| path.display().to_string())?
        .len();
    if size > MAX_SCRIPT_BYTES {
        bail!(
            "{}: script is too large ({size} bytes, limit is {MAX_SCRIPT_BYTES})",
            path.display()
        );
    }
    fs::read_to_string(path).with_context(|| path.display().to_string())
}

/// Routes script commands through the shell's executor.
struct ShellRunner<'a> {
    executor: &'a mut Executor,
    ctx: BuiltinContext<'a>,
}

impl Runner for ShellRunner<'_> {
    fn run(&mut self, pipeline: &Pipeline) -> Result<JobResult> {
        self.executor.run(pipeline, &mut self.ctx)
    }
}

/// The interactive shell: reads lines, runs them, and owns all shell state.
///
/// Example
/// ```no_run
/// use jobsh::Interpreter;
/// use jobsh::line::MemoryLines;
/// let mut sh = Interpreter::new(MemoryLines::new(["echo hello", "exit"]), false);
/// let code = sh.repl().unwrap();
/// assert_eq!(code, 0);
/// ```
pub struct Interpreter<L> {
    env: Environment,
    executor: Executor,
    lines: L,
    expander: Box<dyn Expander>,
    prompt: String,
}

impl<L: LineProvider> Interpreter<L> {
    /// Create a shell reading from `lines` with the default builtins and
    /// filename expansion. `terminal` tells job control whether stdin is a tty.
    pub fn new(lines: L, terminal: bool) -> Self {
        Self::with_parts(
            lines,
            Executor::new(BuiltinTable::default(), JobControl::new(terminal)),
            Box::new(GlobExpander),
        )
    }

    pub fn with_parts(lines: L, executor: Executor, expander: Box<dyn Expander>) -> Self {
        Self {
            env: Environment::new(),
            executor,
            lines,
            expander,
            prompt: DEFAULT_PROMPT.to_string(),
        }
    }

    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        self.prompt = prompt.into();
    }

    /// Read-Eval-Print Loop. Returns the code the shell should exit with.
    ///
    /// Suspended jobs are hung up before this returns, on every path.
    pub fn repl(&mut self) -> Result<ExitCode> {
        let result = self.read_eval_loop();
        self.executor.shutdown();
        result
    }

    fn read_eval_loop(&mut self) -> Result<ExitCode> {
        loop {
            self.executor.jobs_mut().prune_suspended();
            let Some(line) = self.lines.next_line(&self.prompt)? else {
                println!();
                return Ok(0);
            };
            if !line.trim().is_empty() {
                self.lines.append_history(&line);
            }
            if let Outcome::Exit(code) = self.run_line(&line)? {
                return Ok(code);
            }
        }
    }

    /// Runs one line typed at the prompt.
    ///
    /// Parse errors are reported and become status 1; only failures of the
    /// shell itself come back as `Err`.
    pub fn run_line(&mut self, line: &str) -> Result<Outcome> {
        let tokens = lexer::split_into_tokens(line);
        if matches!(tokens.first(), Some(Token::Word(word)) if word == "run") {
            return match tokens.as_slice() {
                [_, Token::Word(path)] => self.run_script_file(Path::new(path)),
                _ => {
                    eprintln!("jobsh: usage: run <script>");
                    Ok(Outcome::Continue(1))
                }
            };
        }

        match parser::parse(line, self.expander.as_ref()) {
            Ok(Some(pipeline)) => {
                let mut ctx = BuiltinContext {
                    env: &mut self.env,
                    lines: &self.lines,
                };
                Ok(self.executor.run(&pipeline, &mut ctx)?.into())
            }
            Ok(None) => Ok(Outcome::Continue(0)),
            Err(e) => {
                eprintln!("jobsh: {e}");
                Ok(Outcome::Continue(1))
            }
        }
    }

    /// Loads and runs a script with a fresh set of script variables.
    ///
    /// A missing, oversized, or malformed script is reported and yields status 1.
    pub fn run_script_file(&mut self, path: &Path) -> Result<Outcome> {
        let text = match read_script(path) {
            Ok(text) => text,
            Err(e) => {
                eprintln!("jobsh: {e:#}");
                return Ok(Outcome::Continue(1));
            }
        };
        let block = match parse_script(&text, self.expander.as_ref()) {
            Ok(block) => block,
            Err(e) => {
                eprintln!("jobsh: {}: {e}", path.display());
                return Ok(Outcome::Continue(1));
            }
        };
        log::debug!("running script {}", path.display());

        let mut vars = ScriptContext::new();
        let mut runner = ShellRunner {
            executor: &mut self.executor,
            ctx: BuiltinContext {
                env: &mut self.env,
                lines: &self.lines,
            },
        };
        execute(&block, &mut vars, &mut runner, self.expander.as_ref())
    }

    /// Runs a script file without a prompt, then tears down like [`repl`](Self::repl).
    pub fn run_script(&mut self, path: &Path) -> Result<ExitCode> {
        let result = self.run_script_file(path);
        self.executor.shutdown();
        match result? {
            Outcome::Continue(code) | Outcome::Exit(code) => Ok(code),
        }
    }
}
