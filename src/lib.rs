//! A small interactive shell with job control and a line-based script language.
//!
//! A line is parsed into a [`parser::Pipeline`] of stages joined by `|`, each
//! with optional `<`, `>` and `>>` redirections. The [`executor::Executor`]
//! runs the first stage in-process when it is a builtin (`cd`, `exit`, `help`,
//! `history`) and forks the rest into one process group, which owns the
//! terminal until it finishes or is stopped with Ctrl-Z.
//!
//! Scripts (`run <file>`) add `if`/`else`/`while` blocks closed by `end` and
//! `name = value` assignments; see [`script`].
//!
//! The main entry point is [`Interpreter`], which owns all shell state and
//! reads lines from a [`line::LineProvider`].

pub mod builtin;
pub mod command;
pub mod env;
pub mod executor;
pub mod expand;
mod external;
pub mod history;
mod interpreter;
pub mod job;
mod lexer;
pub mod line;
pub mod parser;
pub mod script;
pub mod signals;

/// Re-export of the shell driver and the script interpreter entry points.
///
/// See [`Interpreter`] for the high-level API.
pub use interpreter::{DEFAULT_PROMPT, Interpreter, MAX_SCRIPT_BYTES, Runner, execute};
