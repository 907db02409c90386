use serde::{Deserialize, Serialize};

use super::types::{LogEntry, LogIndex, NodeId, Term};
use crate::util::errors::Result;

/// RequestVote RPC - Invoked by candidates to gather votes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVoteRequest {
    /// Candidate's term
    pub term: Term,
    /// Candidate requesting vote
    pub candidate_id: NodeId,
    /// Index of candidate's last log entry
    pub last_log_index: LogIndex,
    /// Term of candidate's last log entry
    pub last_log_term: Term,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    /// Current term, for candidate to update itself
    pub term: Term,
    /// True means candidate received vote
    pub vote_granted: bool,
}

/// AppendEntries RPC - Invoked by leader to replicate log entries and as heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    /// Leader's term
    pub term: Term,
    /// So follower can redirect clients
    pub leader_id: NodeId,
    /// Index of log entry immediately preceding new ones
    pub prev_log_index: LogIndex,
    /// Term of prev_log_index entry
    pub prev_log_term: Term,
    /// Log entries to store (empty for heartbeat)
    pub entries: Vec<LogEntry>,
    /// Leader's commit index
    pub leader_commit: LogIndex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    /// Current term, for leader to update itself
    pub term: Term,
    /// True if follower contained entry matching prev_log_index and prev_log_term
    pub success: bool,
    /// First index the leader should consider resending from
    pub conflict_index: Option<LogIndex>,
    /// Term of the follower's entry at prev_log_index, if it had one
    pub conflict_term: Option<Term>,
}

impl AppendEntriesResponse {
    pub(crate) fn rejected(term: Term) -> Self {
        Self {
            term,
            success: false,
            conflict_index: None,
            conflict_term: None,
        }
    }
}

/// InstallSnapshot RPC - Invoked by leader to bring a follower past its compacted prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallSnapshotRequest {
    /// Leader's term
    pub term: Term,
    pub leader_id: NodeId,
    /// The snapshot replaces all entries up through and including this index
    pub last_included_index: LogIndex,
    /// Term of last_included_index
    pub last_included_term: Term,
    /// Raw snapshot bytes
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallSnapshotResponse {
    /// Current term, for leader to update itself
    pub term: Term,
}

/// Wrapper for all RPC messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftMessage {
    RequestVote(RequestVoteRequest),
    RequestVoteResponse(RequestVoteResponse),
    AppendEntries(AppendEntriesRequest),
    AppendEntriesResponse(AppendEntriesResponse),
    InstallSnapshot(InstallSnapshotRequest),
    InstallSnapshotResponse(InstallSnapshotResponse),
}

impl RaftMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Term carried by the message, used for term fencing
    pub fn term(&self) -> Term {
        match self {
            RaftMessage::RequestVote(m) => m.term,
            RaftMessage::RequestVoteResponse(m) => m.term,
            RaftMessage::AppendEntries(m) => m.term,
            RaftMessage::AppendEntriesResponse(m) => m.term,
            RaftMessage::InstallSnapshot(m) => m.term,
            RaftMessage::InstallSnapshotResponse(m) => m.term,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_entries_survives_codec() {
        let message = RaftMessage::AppendEntries(AppendEntriesRequest {
            term: 4,
            leader_id: 2,
            prev_log_index: 9,
            prev_log_term: 3,
            entries: vec![LogEntry::new(4, 10, b"set x 1".to_vec())],
            leader_commit: 8,
        });

        let bytes = message.encode().unwrap();
        let decoded = RaftMessage::decode(&bytes).unwrap();

        assert_eq!(decoded, message);
        assert_eq!(decoded.term(), 4);
    }

    #[test]
    fn test_decode_garbage_is_serialization_error() {
        let err = RaftMessage::decode(&[0xff, 0xff, 0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(
            err,
            crate::util::errors::RaftError::SerializationError(_)
        ));
    }
}
