//! Script files: statements, blocks and the variables they assign.
//!
//! A script is a list of lines. `if <cmd>` and `while <cmd>` open a block that
//! runs until the matching `end`; an `if` block may instead be closed by
//! `else`, whose own block then runs until `end`. `name = value` lines assign
//! script variables, which later commands reference as `$name` or `${name}`.

use crate::expand::Expander;
use crate::parser::{self, ParseError, Pipeline};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;

/// One line of a script after classification.
#[derive(Debug)]
pub enum Statement {
    /// A pipeline, parsed when the script was loaded.
    Command {
        text: String,
        pipeline: Result<Option<Pipeline>, ParseError>,
    },
    /// Raw `name=value` text.
    Assignment { text: String },
    /// The condition is a command line, run each time the statement is reached.
    If { condition: String, body: Block },
    /// Runs when the `If` right before it had a failing condition.
    Else { body: Block },
    While { condition: String, body: Block },
}

/// An ordered list of statements.
#[derive(Debug, Default)]
pub struct Block {
    statements: Vec<Statement>,
}

impl Block {
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

// Deeply nested scripts would otherwise recurse once per level.
impl Drop for Block {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.statements);
        while let Some(statement) = pending.pop() {
            match statement {
                Statement::If { mut body, .. }
                | Statement::Else { mut body }
                | Statement::While { mut body, .. } => pending.append(&mut body.statements),
                Statement::Command { .. } | Statement::Assignment { .. } => {}
            }
        }
    }
}

/// Structural problems found while loading a script. Lines are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("line {line}: 'end' without an open block")]
    UnexpectedEnd { line: usize },
    #[error("line {line}: 'else' without a matching 'if'")]
    UnexpectedElse { line: usize },
    #[error("line {line}: '{keyword}' block is never closed with 'end'")]
    Unterminated { keyword: &'static str, line: usize },
}

enum Opener {
    Root,
    If(String),
    Else,
    While(String),
}

impl Opener {
    fn keyword(&self) -> &'static str {
        match self {
            Opener::Root => "script",
            Opener::If(_) => "if",
            Opener::Else => "else",
            Opener::While(_) => "while",
        }
    }
}

struct Frame {
    opener: Opener,
    line: usize,
    statements: Vec<Statement>,
}

impl Frame {
    fn new(opener: Opener, line: usize) -> Self {
        Self {
            opener,
            line,
            statements: Vec::new(),
        }
    }

    fn close(self) -> Statement {
        let body = Block {
            statements: self.statements,
        };
        match self.opener {
            Opener::If(condition) => Statement::If { condition, body },
            Opener::Else => Statement::Else { body },
            Opener::While(condition) => Statement::While { condition, body },
            Opener::Root => unreachable!("the root frame is never closed"),
        }
    }
}

/// Builds the statement tree for a whole script.
///
/// Command lines are parsed up front with `expander`; a line that fails to
/// parse is kept with its error and reported when it is reached.
pub fn parse_script(text: &str, expander: &dyn Expander) -> Result<Block, ScriptError> {
    let mut stack = vec![Frame::new(Opener::Root, 0)];

    for (index, raw) in text.split('\n').enumerate() {
        let line = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        if let Some(condition) = trimmed.strip_prefix("if ") {
            stack.push(Frame::new(Opener::If(condition.trim().to_string()), line));
        } else if trimmed == "else" {
            if stack.len() < 2 || !matches!(stack[stack.len() - 1].opener, Opener::If(_)) {
                return Err(ScriptError::UnexpectedElse { line });
            }
            close_top(&mut stack);
            stack.push(Frame::new(Opener::Else, line));
        } else if let Some(condition) = trimmed.strip_prefix("while ") {
            stack.push(Frame::new(Opener::While(condition.trim().to_string()), line));
        } else if trimmed == "end" {
            if stack.len() < 2 {
                return Err(ScriptError::UnexpectedEnd { line });
            }
            close_top(&mut stack);
        } else {
            let statement = if trimmed.contains('=') {
                Statement::Assignment {
                    text: trimmed.to_string(),
                }
            } else {
                Statement::Command {
                    text: trimmed.to_string(),
                    pipeline: parser::parse(trimmed, expander),
                }
            };
            push_statement(&mut stack, statement);
        }
    }

    if stack.len() > 1 {
        let open = &stack[stack.len() - 1];
        return Err(ScriptError::Unterminated {
            keyword: open.opener.keyword(),
            line: open.line,
        });
    }
    let root = stack.pop().map(|frame| frame.statements).unwrap_or_default();
    log::debug!("loaded script with {} top-level statement(s)", root.len());
    Ok(Block { statements: root })
}

fn close_top(stack: &mut Vec<Frame>) {
    if let Some(frame) = stack.pop() {
        let statement = frame.close();
        push_statement(stack, statement);
    }
}

fn push_statement(stack: &mut [Frame], statement: Statement) {
    if let Some(frame) = stack.last_mut() {
        frame.statements.push(statement);
    }
}

fn variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))$")
            .expect("variable pattern is valid")
    })
}

/// Variables assigned while a script runs. Starts empty for every script.
#[derive(Debug, Clone, Default)]
pub struct ScriptContext {
    vars: HashMap<String, String>,
}

impl ScriptContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Applies `name=value` text, splitting on the first `=` and trimming both sides.
    ///
    /// Returns `false`, changing nothing, when the name is empty.
    pub fn assign(&mut self, text: &str) -> bool {
        let Some((name, value)) = text.split_once('=') else {
            return false;
        };
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        self.set(name, value.trim());
        true
    }

    /// Replaces a word that is exactly `$name` or `${name}` with the variable's value.
    ///
    /// Anything else, including references to unset variables, comes back unchanged.
    pub fn substitute(&self, word: &str) -> String {
        variable_pattern()
            .captures(word)
            .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
            .and_then(|name| self.get(name.as_str()))
            .map_or_else(|| word.to_string(), str::to_string)
    }
}
