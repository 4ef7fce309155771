//! In-process backends
//!
//! `LoopbackNetwork` and `LoopbackCard` implement the native traits without
//! any SDK installed. Senders on the loopback fabric are discoverable by
//! finders and feed receivers in the same process; the card generates a
//! colour-bar pattern on its inputs and records what is scheduled on its
//! outputs. Both keep counters of live native handles and can share a
//! [`Journal`] so tests can assert on the order of native calls.

mod hardware;
mod network;

pub use hardware::{LoopbackCard, PlayoutLog};
pub use network::LoopbackNetwork;

use parking_lot::Mutex;
use std::sync::Arc;

/// Ordered record of native calls
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Index of the first entry equal to `entry`
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| e == entry)
    }

    /// Index of the last entry equal to `entry`
    pub fn last_position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().iter().rposition(|e| e == entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journal_positions() {
        let journal = Journal::new();
        let shared = journal.clone();
        journal.record("a");
        shared.record("b");
        journal.record("a");

        assert_eq!(journal.entries(), vec!["a", "b", "a"]);
        assert_eq!(journal.position("a"), Some(0));
        assert_eq!(journal.last_position("a"), Some(2));
        assert_eq!(journal.position("c"), None);
    }
}
