//! Filename-pattern expansion for command arguments.

use glob::glob;

/// Service that turns one argument word into the literal arguments it stands for.
///
/// Implementations must never fail: a word that matches nothing is returned as-is.
pub trait Expander {
    fn expand(&self, word: &str) -> Vec<String>;
}

/// Expands `*`, `?` and `[...]` patterns against the file system.
///
/// Relative patterns are matched against the process working directory and
/// the matches are returned relative as well, in the order `glob` yields them.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobExpander;

impl Expander for GlobExpander {
    fn expand(&self, word: &str) -> Vec<String> {
        if !word.contains(['*', '?', '[']) {
            return vec![word.to_string()];
        }

        match glob(word) {
            Ok(paths) => {
                let expanded: Vec<String> = paths
                    .filter_map(|p| p.ok())
                    .map(|p| p.to_string_lossy().to_string())
                    .collect();
                if expanded.is_empty() {
                    vec![word.to_string()]
                } else {
                    expanded
                }
            }
            Err(e) => {
                log::debug!("not expanding {word:?}: {e}");
                vec![word.to_string()]
            }
        }
    }
}

/// Passes every word through untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExpansion;

impl Expander for NoExpansion {
    fn expand(&self, word: &str) -> Vec<String> {
        vec![word.to_string()]
    }
}
