//! Bounded history of command responses

use std::collections::VecDeque;

/// Number of responses kept
pub const HISTORY_CAPACITY: usize = 20;

/// Most recent responses in arrival order; the oldest is evicted when full
#[derive(Debug, Clone)]
pub struct ResponseHistory {
    entries: VecDeque<String>,
    capacity: usize,
}

impl Default for ResponseHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseHistory {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    /// History holding at most `capacity` responses (at least one)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, response: String) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(response);
    }

    /// The `count` most recent responses, newest last
    pub fn latest(&self, count: usize) -> Vec<String> {
        let skip = self.entries.len().saturating_sub(count);
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_latest_newest_last() {
        let mut history = ResponseHistory::new();
        history.push("a".into());
        history.push("b".into());
        history.push("c".into());

        assert_eq!(history.latest(2), vec!["b", "c"]);
        assert_eq!(history.latest(10), vec!["a", "b", "c"]);
        assert!(history.latest(0).is_empty());
    }

    #[test]
    fn test_evicts_oldest() {
        let mut history = ResponseHistory::new();
        for i in 0..25 {
            history.push(format!("r{}", i));
        }

        assert_eq!(history.len(), HISTORY_CAPACITY);
        let latest = history.latest(HISTORY_CAPACITY);
        assert_eq!(latest.first().map(String::as_str), Some("r5"));
        assert_eq!(latest.last().map(String::as_str), Some("r24"));
    }

    #[test]
    fn test_empty() {
        let history = ResponseHistory::new();
        assert!(history.is_empty());
        assert!(history.latest(5).is_empty());
        assert_eq!(history.capacity(), 20);
    }

    proptest! {
        #[test]
        fn prop_history_keeps_last_entries(
            responses in prop::collection::vec("[a-z]{1,8}", 0..60),
            count in 0usize..30,
        ) {
            let mut history = ResponseHistory::new();
            for r in &responses {
                history.push(r.clone());
            }

            prop_assert!(history.len() <= HISTORY_CAPACITY);

            let kept = responses.len().min(HISTORY_CAPACITY).min(count);
            let expected: Vec<String> = responses[responses.len() - kept..].to_vec();
            prop_assert_eq!(history.latest(count), expected);
        }
    }
}
