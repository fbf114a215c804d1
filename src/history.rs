use std::collections::VecDeque;

/// Number of lines remembered before the oldest ones are forgotten.
pub const MAX_HISTORY_SIZE: usize = 100;

/// Bounded, chronological record of entered lines.
///
/// Indexes are 1-based and absolute: once the ring is full, the oldest numbers
/// disappear but new lines keep counting up.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<String>,
    capacity: usize,
    total: usize,
}

impl History {
    pub fn new() -> Self {
        Self::with_capacity(MAX_HISTORY_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            total: 0,
        }
    }

    /// Remembers `line` without its trailing newline. Blank lines are ignored.
    ///
    /// Returns whether the line was recorded.
    pub fn push(&mut self, line: &str) -> bool {
        let line = line.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            return false;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(line.to_string());
        self.total += 1;
        true
    }

    /// All remembered lines with their 1-based index, oldest first.
    pub fn entries(&self) -> Vec<(usize, String)> {
        let first = self.total - self.entries.len() + 1;
        self.entries
            .iter()
            .enumerate()
            .map(|(i, line)| (first + i, line.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_add_and_list() {
        let mut history = History::new();
        assert!(history.push("ls -l"));
        assert!(history.push("cd /tmp\n"));
        assert_eq!(history.len(), 2);
        assert_eq!(
            history.entries(),
            vec![(1, "ls -l".to_string()), (2, "cd /tmp".to_string())]
        );
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let mut history = History::new();
        assert!(!history.push(""));
        assert!(!history.push("\n"));
        assert!(!history.push("   "));
        assert!(history.is_empty());
    }

    #[test]
    fn test_history_circular_buffer() {
        let mut history = History::with_capacity(3);
        for i in 1..=5 {
            history.push(&format!("cmd{i}"));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(
            history.entries(),
            vec![
                (3, "cmd3".to_string()),
                (4, "cmd4".to_string()),
                (5, "cmd5".to_string()),
            ]
        );
    }

    #[test]
    fn test_default_capacity() {
        let mut history = History::default();
        for i in 0..(MAX_HISTORY_SIZE + 10) {
            history.push(&format!("line {i}"));
        }
        assert_eq!(history.len(), MAX_HISTORY_SIZE);
        assert_eq!(history.entries()[0].0, 11);
    }
}
