use serde::{Deserialize, Serialize};

/// A single entry in the replicated log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    /// The term when this entry was created
    pub term: u64,
    /// The index of this entry in the log
    pub index: u64,
    /// The opaque command payload
    pub command: Vec<u8>,
}

impl LogEntry {
    pub fn new(term: u64, index: u64, command: Vec<u8>) -> Self {
        Self {
            term,
            index,
            command,
        }
    }
}

/// Items delivered to the service, in log order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyMsg {
    /// A committed log entry
    Command {
        index: LogIndex,
        term: Term,
        command: Vec<u8>,
    },
    /// A snapshot that replaces all state up to and including `last_included_index`
    Snapshot {
        data: Vec<u8>,
        last_included_index: LogIndex,
        last_included_term: Term,
    },
}

impl ApplyMsg {
    /// Highest log index this message covers
    pub fn index(&self) -> LogIndex {
        match self {
            ApplyMsg::Command { index, .. } => *index,
            ApplyMsg::Snapshot {
                last_included_index,
                ..
            } => *last_included_index,
        }
    }
}

/// Returned by a leader that accepted a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proposal {
    /// Index the command will occupy if it is ever committed
    pub index: LogIndex,
    /// Leader's term when the command was appended
    pub term: Term,
}

/// Type alias for term numbers
pub type Term = u64;

/// Type alias for log indices
pub type LogIndex = u64;

/// Node identifier
pub type NodeId = u64;
