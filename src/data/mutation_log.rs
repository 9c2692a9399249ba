use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::data::utils::lock;
use crate::data::{now, ChangeKind, Timestamp};

/// A committed write to one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationEntry {
    pub sequence: u64,
    pub document_id: String,
    pub kind: ChangeKind,
    pub committed_at: Timestamp,
}

#[derive(Debug)]
struct LogState {
    next_sequence: u64,
    history: VecDeque<MutationEntry>,
}

/// Append-only record of committed writes.
///
/// Sequences start at 1 and grow by one per entry. A whole transaction is
/// appended under one lock, so its entries are numbered contiguously and no
/// reader sees half of it. Only the newest `capacity` entries are retained.
#[derive(Debug)]
pub struct MutationLog {
    state: Mutex<LogState>,
    capacity: usize,
}

impl MutationLog {
    pub fn new(capacity: usize) -> Self {
        MutationLog {
            state: Mutex::new(LogState {
                next_sequence: 1,
                history: VecDeque::with_capacity(capacity.min(1024)),
            }),
            capacity,
        }
    }

    /// Append the mutations of one committed transaction.
    ///
    /// Returns the new entries in the order given.
    pub fn append(&self, mutations: Vec<(String, ChangeKind)>) -> Vec<MutationEntry> {
        let committed_at = now();
        let mut state = lock(&self.state);

        let mut entries = Vec::with_capacity(mutations.len());
        for (document_id, kind) in mutations {
            let entry = MutationEntry {
                sequence: state.next_sequence,
                document_id,
                kind,
                committed_at,
            };
            state.next_sequence += 1;
            entries.push(entry);
        }

        state.history.extend(entries.iter().cloned());
        while state.history.len() > self.capacity {
            state.history.pop_front();
        }

        entries
    }

    /// Sequence of the newest entry, or 0 when nothing was ever committed
    pub fn last_sequence(&self) -> u64 {
        lock(&self.state).next_sequence - 1
    }

    /// Retained entries with a sequence strictly greater than `sequence`
    pub fn changes_since(&self, sequence: u64) -> Vec<MutationEntry> {
        let state = lock(&self.state);
        state
            .history
            .iter()
            .filter(|entry| entry.sequence > sequence)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
