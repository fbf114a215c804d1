//! Sources of input lines.
//!
//! The shell never touches terminal modes itself; it asks a [`LineProvider`]
//! for one completed line at a time and tells it which lines to remember.

use crate::history::History;
use anyhow::{Context, Result};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::collections::VecDeque;

/// External source of completed input lines plus history storage.
pub trait LineProvider {
    /// Reads the next line, showing `prompt` if the provider is interactive.
    ///
    /// Returns `Ok(None)` at end of input. An interrupted read yields an empty line.
    fn next_line(&mut self, prompt: &str) -> Result<Option<String>>;

    /// Records a line in the history.
    fn append_history(&mut self, line: &str);

    /// Remembered lines with their 1-based index, oldest first.
    fn history_entries(&self) -> Vec<(usize, String)>;
}

/// Interactive provider backed by `rustyline`.
///
/// `rustyline` keeps its own copy of the lines for arrow-key recall; the
/// [`History`] ring is what the `history` builtin reports.
pub struct EditorLines {
    editor: DefaultEditor,
    history: History,
}

impl EditorLines {
    pub fn new() -> Result<Self> {
        let editor = DefaultEditor::new().context("cannot initialize line editor")?;
        Ok(Self {
            editor,
            history: History::new(),
        })
    }
}

impl LineProvider for EditorLines {
    fn next_line(&mut self, prompt: &str) -> Result<Option<String>> {
        match self.editor.readline(prompt) {
            Ok(line) => Ok(Some(line)),
            Err(ReadlineError::Interrupted) => Ok(Some(String::new())),
            Err(ReadlineError::Eof) => Ok(None),
            Err(err) => Err(err).context("cannot read input line"),
        }
    }

    fn append_history(&mut self, line: &str) {
        if self.history.push(line) {
            if let Err(e) = self.editor.add_history_entry(line) {
                log::warn!("line editor rejected history entry: {e}");
            }
        }
    }

    fn history_entries(&self) -> Vec<(usize, String)> {
        self.history.entries()
    }
}

/// Provider that replays a fixed list of lines. Used for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryLines {
    pending: VecDeque<String>,
    history: History,
}

impl MemoryLines {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pending: lines.into_iter().map(Into::into).collect(),
            history: History::new(),
        }
    }
}

impl LineProvider for MemoryLines {
    fn next_line(&mut self, _prompt: &str) -> Result<Option<String>> {
        Ok(self.pending.pop_front())
    }

    fn append_history(&mut self, line: &str) {
        self.history.push(line);
    }

    fn history_entries(&self) -> Vec<(usize, String)> {
        self.history.entries()
    }
}
