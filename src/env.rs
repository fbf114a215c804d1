use crate::command::ExitCode;
use std::collections::HashMap;
use std::env as stdenv;
use std::path::PathBuf;

/// Mutable, user-level view of the process environment used by the shell.
///
/// The environment contains:
/// - `vars`: overrides consulted before the process environment (e.g. `HOME`).
/// - `current_dir`: the working directory, kept in sync by `cd`.
/// - `exit_request`: set by `exit`; the driver unwinds once it sees it.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Key-value overrides of environment variables.
    pub vars: HashMap<String, String>,
    /// The current working directory for command execution.
    pub current_dir: PathBuf,
    /// Exit code requested by the `exit` builtin, if any.
    pub exit_request: Option<ExitCode>,
}

impl Environment {
    /// Capture the current working directory into a new `Environment`.
    ///
    /// Variables are read lazily from the process environment, so `vars` starts empty.
    pub fn new() -> Self {
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            vars: HashMap::new(),
            current_dir,
            exit_request: None,
        }
    }

    /// Get the value of a variable.
    ///
    /// Looks up the key in `self.vars` first, falling back to `std::env::var`.
    pub fn get_var(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .cloned()
            .or_else(|| stdenv::var(key).ok())
    }

    /// Set or override a variable in `self.vars`.
    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }

    /// Hands out a pending exit request, clearing it.
    pub fn take_exit_request(&mut self) -> Option<ExitCode> {
        self.exit_request.take()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}
