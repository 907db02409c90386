use serde::{Deserialize, Serialize};

use crate::raft::types::{LogEntry, LogIndex, Term};
use crate::util::errors::{RaftError, Result};

/// The replicated log, indexed from a logical base.
///
/// Entries at or below `snapshot_index` have been compacted into a snapshot;
/// only their boundary `(snapshot_index, snapshot_term)` is remembered. Index 0
/// with term 0 is the sentinel of a log that was never compacted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftLog {
    snapshot_index: LogIndex,
    snapshot_term: Term,
    entries: Vec<LogEntry>,
}

impl RaftLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the last entry covered by the snapshot (lastIncludedIndex)
    pub fn snapshot_index(&self) -> LogIndex {
        self.snapshot_index
    }

    /// Term of the last entry covered by the snapshot (lastIncludedTerm)
    pub fn snapshot_term(&self) -> Term {
        self.snapshot_term
    }

    /// Lowest index still held as an entry
    pub fn first_index(&self) -> LogIndex {
        self.snapshot_index + 1
    }

    pub fn last_index(&self) -> LogIndex {
        self.snapshot_index + self.entries.len() as u64
    }

    pub fn last_term(&self) -> Term {
        self.entries
            .last()
            .map(|e| e.term)
            .unwrap_or(self.snapshot_term)
    }

    /// Number of entries held (excluding the compacted prefix)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, index: LogIndex) -> Option<usize> {
        if index <= self.snapshot_index || index > self.last_index() {
            return None;
        }
        Some((index - self.snapshot_index - 1) as usize)
    }

    /// Term of the entry at `index`, including the snapshot boundary.
    /// `None` if the index is compacted away or beyond the end.
    pub fn term(&self, index: LogIndex) -> Option<Term> {
        if index == self.snapshot_index {
            return Some(self.snapshot_term);
        }
        self.position(index).map(|pos| self.entries[pos].term)
    }

    pub fn get(&self, index: LogIndex) -> Option<&LogEntry> {
        self.position(index).map(|pos| &self.entries[pos])
    }

    /// Entries in `[start, end]`, clamped to what is held
    pub fn get_range(&self, start: LogIndex, end: LogIndex) -> Vec<LogEntry> {
        let start = start.max(self.first_index());
        let end = end.min(self.last_index());
        if start > end {
            return Vec::new();
        }
        let from = (start - self.snapshot_index - 1) as usize;
        let to = (end - self.snapshot_index) as usize;
        self.entries[from..to].to_vec()
    }

    pub fn entries_from(&self, start: LogIndex) -> Vec<LogEntry> {
        self.get_range(start, self.last_index())
    }

    pub fn append(&mut self, entry: LogEntry) -> Result<()> {
        let expected_index = self.last_index() + 1;
        if entry.index != expected_index {
            return Err(RaftError::LogInconsistency);
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn extend(&mut self, entries: Vec<LogEntry>) -> Result<()> {
        for entry in entries {
            self.append(entry)?;
        }
        Ok(())
    }

    /// Delete the entry at `from_index` and everything after it
    pub fn truncate(&mut self, from_index: LogIndex) -> Result<()> {
        if from_index <= self.snapshot_index {
            return Err(RaftError::InvalidState(format!(
                "cannot truncate from {} inside snapshot ending at {}",
                from_index, self.snapshot_index
            )));
        }
        if let Some(pos) = self.position(from_index) {
            self.entries.truncate(pos);
        }
        Ok(())
    }

    /// First held index whose entry carries `term`
    pub fn first_index_of_term(&self, term: Term) -> Option<LogIndex> {
        self.entries
            .iter()
            .find(|e| e.term == term)
            .map(|e| e.index)
    }

    /// Last held index whose entry carries `term`
    pub fn last_index_of_term(&self, term: Term) -> Option<LogIndex> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.term == term)
            .map(|e| e.index)
    }

    /// Discard everything up to and including `index`, which becomes the new
    /// snapshot boundary with term `term`.
    ///
    /// If the log holds a matching entry at `index` the suffix after it is kept,
    /// otherwise the whole log is replaced by the snapshot. Returns false when
    /// `index` is not past the current boundary.
    pub fn compact(&mut self, index: LogIndex, term: Term) -> bool {
        if index <= self.snapshot_index {
            return false;
        }
        match self.position(index) {
            Some(pos) if self.entries[pos].term == term => {
                self.entries.drain(..=pos);
            }
            _ => self.entries.clear(),
        }
        self.snapshot_index = index;
        self.snapshot_term = term;
        true
    }

    /// Whether a log ending at `(last_log_index, last_log_term)` is at least as
    /// up-to-date as this one
    pub fn is_up_to_date(&self, last_log_index: LogIndex, last_log_term: Term) -> bool {
        let our_last_term = self.last_term();
        last_log_term > our_last_term
            || (last_log_term == our_last_term && last_log_index >= self.last_index())
    }
}
