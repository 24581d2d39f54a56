//! [`CommandHistory`] – bounded ring buffer of recent action results.
//!
//! Kept for status and debugging only; nothing in the loop reads it back to
//! make decisions.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use cortex_runtime::history::CommandHistory;
//! use cortex_types::ActionResult;
//!
//! let mut history = CommandHistory::new(2);
//! history.record(ActionResult::succeeded("speech", Duration::ZERO));
//! history.record(ActionResult::succeeded("arms", Duration::ZERO));
//! history.record(ActionResult::succeeded("emotion", Duration::ZERO));
//!
//! let names: Vec<_> = history.iter().map(|r| r.action_name.as_str()).collect();
//! assert_eq!(names, ["arms", "emotion"]);
//! ```

use std::collections::VecDeque;

use cortex_types::ActionResult;

/// Default number of results retained.
pub const DEFAULT_HISTORY_SIZE: usize = 100;

/// Rolling window of the most recent [`ActionResult`]s, oldest first.
#[derive(Debug, Clone)]
pub struct CommandHistory {
    capacity: usize,
    entries: VecDeque<ActionResult>,
}

impl CommandHistory {
    /// A capacity of zero keeps nothing.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_SIZE)),
        }
    }

    pub fn record(&mut self, result: ActionResult) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(result);
    }

    pub fn extend(&mut self, results: impl IntoIterator<Item = ActionResult>) {
        for result in results {
            self.record(result);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActionResult> {
        self.entries.iter()
    }

    /// The last `n` results, oldest first.
    pub fn recent(&self, n: usize) -> Vec<ActionResult> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn result(name: &str) -> ActionResult {
        ActionResult::succeeded(name, Duration::ZERO)
    }

    #[test]
    fn keeps_at_most_capacity_entries() {
        let mut history = CommandHistory::new(3);
        for i in 0..10 {
            history.record(result(&format!("a{i}")));
        }
        assert_eq!(history.len(), 3);
        let names: Vec<_> = history.iter().map(|r| r.action_name.clone()).collect();
        assert_eq!(names, ["a7", "a8", "a9"]);
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut history = CommandHistory::new(0);
        history.record(result("speech"));
        assert!(history.is_empty());
    }

    #[test]
    fn recent_returns_tail_in_order() {
        let mut history = CommandHistory::default();
        history.extend(["a", "b", "c"].map(result));
        let tail: Vec<_> = history.recent(2).into_iter().map(|r| r.action_name).collect();
        assert_eq!(tail, ["b", "c"]);
        assert_eq!(history.recent(10).len(), 3);
    }

    #[test]
    fn clear_empties_history() {
        let mut history = CommandHistory::new(5);
        history.record(result("arms"));
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.capacity(), 5);
    }
}
