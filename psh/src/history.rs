/// In-memory command history with arrow-key traversal. Nothing is
/// persisted; the history lives and dies with the shell process.
#[derive(Debug, Default)]
pub struct History {
    entries: Vec<String>,
    cursor: Option<usize>,
}

impl History {
    pub fn new() -> Self {
        History::default()
    }

    /// Records an accepted command line. Blank lines and immediate repeats
    /// of the previous entry are not stored. Any traversal in progress is
    /// abandoned.
    pub fn add(&mut self, line: &str) {
        self.cursor = None;
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if self.entries.last().map(String::as_str) == Some(line) {
            return;
        }
        self.entries.push(line.to_string());
    }

    /// Steps back toward older entries. Stays on the oldest entry once
    /// reached; `None` only when the history is empty.
    pub fn prev(&mut self) -> Option<&str> {
        if self.entries.is_empty() {
            return None;
        }
        let i = match self.cursor {
            None => self.entries.len() - 1,
            Some(0) => 0,
            Some(i) => i - 1,
        };
        self.cursor = Some(i);
        Some(&self.entries[i])
    }

    /// Steps forward toward newer entries. Past the newest entry the
    /// traversal ends and `None` tells the caller to restore its own
    /// in-progress line.
    pub fn next(&mut self) -> Option<&str> {
        let i = self.cursor?;
        if i + 1 < self.entries.len() {
            self.cursor = Some(i + 1);
            Some(&self.entries[i + 1])
        } else {
            self.cursor = None;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recalls_most_recent_first() {
        let mut h = History::new();
        h.add("first");
        h.add("second");
        h.add("third");
        assert_eq!(h.prev(), Some("third"));
        assert_eq!(h.prev(), Some("second"));
        assert_eq!(h.prev(), Some("first"));
    }

    #[test]
    fn sticks_at_the_oldest_entry() {
        let mut h = History::new();
        h.add("only");
        assert_eq!(h.prev(), Some("only"));
        assert_eq!(h.prev(), Some("only"));
    }

    #[test]
    fn forward_past_the_newest_ends_the_traversal() {
        let mut h = History::new();
        h.add("a");
        h.add("b");
        assert_eq!(h.prev(), Some("b"));
        assert_eq!(h.prev(), Some("a"));
        assert_eq!(h.next(), Some("b"));
        assert_eq!(h.next(), None);
        // A fresh traversal starts from the newest again.
        assert_eq!(h.prev(), Some("b"));
    }

    #[test]
    fn next_without_traversal_is_a_noop() {
        let mut h = History::new();
        h.add("a");
        assert_eq!(h.next(), None);
    }

    #[test]
    fn skips_blanks_and_immediate_repeats() {
        let mut h = History::new();
        h.add("ls");
        h.add("   ");
        h.add("ls");
        h.add("pwd");
        h.add("ls");
        assert_eq!(h.prev(), Some("ls"));
        assert_eq!(h.prev(), Some("pwd"));
        assert_eq!(h.prev(), Some("ls"));
        assert_eq!(h.prev(), Some("ls"));
    }

    #[test]
    fn adding_resets_the_cursor() {
        let mut h = History::new();
        h.add("a");
        h.add("b");
        assert_eq!(h.prev(), Some("b"));
        h.add("c");
        assert_eq!(h.prev(), Some("c"));
    }
}
