use std::io;

use thiserror::Error;

use crate::raft::types::NodeId;

#[derive(Debug, Error)]
pub enum RaftError {
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Not the leader (known leader: {leader:?})")]
    NotLeader { leader: Option<NodeId> },
    #[error("Log inconsistency detected")]
    LogInconsistency,
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Node has been stopped")]
    Stopped,
}

impl RaftError {
    /// Persistence failures: the node cannot keep its vote-once and
    /// log-matching promises without durable state, so it must halt.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RaftError::StorageError(_) | RaftError::IoError(_) | RaftError::SerializationError(_)
        )
    }
}

impl From<bincode::Error> for RaftError {
    fn from(err: bincode::Error) -> Self {
        RaftError::SerializationError(err.to_string())
    }
}

impl From<serde_json::Error> for RaftError {
    fn from(err: serde_json::Error) -> Self {
        RaftError::SerializationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RaftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(RaftError::StorageError("disk full".to_string()).is_fatal());
        assert!(RaftError::IoError(io::Error::new(io::ErrorKind::Other, "boom")).is_fatal());
        assert!(RaftError::SerializationError("bad".to_string()).is_fatal());

        assert!(!RaftError::NetworkError("dropped".to_string()).is_fatal());
        assert!(!RaftError::NotLeader { leader: Some(2) }.is_fatal());
        assert!(!RaftError::LogInconsistency.is_fatal());
        assert!(!RaftError::Stopped.is_fatal());
    }

    #[test]
    fn test_display() {
        let err = RaftError::NotLeader { leader: Some(3) };
        assert_eq!(err.to_string(), "Not the leader (known leader: Some(3))");

        let err = RaftError::InvalidConfig("peers cannot be empty".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: peers cannot be empty");
    }
}
