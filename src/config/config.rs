use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::raft::types::NodeId;
use crate::util::errors::{RaftError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftConfig {
    /// Unique identifier for this node
    pub node_id: NodeId,

    /// The other members of the cluster (static)
    pub peers: Vec<NodeId>,

    /// Minimum election timeout in milliseconds (e.g., 300)
    #[serde(default = "default_election_timeout_min_ms")]
    pub election_timeout_min_ms: u64,

    /// Maximum election timeout in milliseconds (e.g., 600)
    #[serde(default = "default_election_timeout_max_ms")]
    pub election_timeout_max_ms: u64,

    /// Heartbeat interval in milliseconds (e.g., 100)
    /// Should be much less than election timeout
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// How many undelivered apply messages may queue before the applier waits
    #[serde(default = "default_apply_channel_capacity")]
    pub apply_channel_capacity: usize,
}

fn default_election_timeout_min_ms() -> u64 {
    300
}

fn default_election_timeout_max_ms() -> u64 {
    600
}

fn default_heartbeat_interval_ms() -> u64 {
    100
}

fn default_apply_channel_capacity() -> usize {
    128
}

impl RaftConfig {
    pub fn new(node_id: NodeId, peers: Vec<NodeId>) -> Self {
        Self {
            node_id,
            peers,
            ..Default::default()
        }
    }

    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|e| {
            RaftError::InvalidConfig(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: RaftConfig = serde_json::from_str(&contents)
            .map_err(|e| RaftError::InvalidConfig(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn election_timeout_min(&self) -> Duration {
        Duration::from_millis(self.election_timeout_min_ms)
    }

    pub fn election_timeout_max(&self) -> Duration {
        Duration::from_millis(self.election_timeout_max_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Draws a fresh election timeout uniformly from the configured window
    pub fn random_election_timeout(&self) -> Duration {
        let mut rng = rand::thread_rng();
        let timeout_ms =
            rng.gen_range(self.election_timeout_min_ms..=self.election_timeout_max_ms);
        Duration::from_millis(timeout_ms)
    }

    /// Number of voting members, including this node
    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    /// Votes (or replicas) needed for a strict majority
    pub fn quorum(&self) -> usize {
        self.cluster_size() / 2 + 1
    }

    pub fn validate(&self) -> Result<()> {
        if self.election_timeout_min_ms >= self.election_timeout_max_ms {
            return Err(RaftError::InvalidConfig(
                "election_timeout_min must be less than election_timeout_max".to_string(),
            ));
        }

        if self.heartbeat_interval_ms >= self.election_timeout_min_ms {
            return Err(RaftError::InvalidConfig(
                "heartbeat_interval must be less than election_timeout_min".to_string(),
            ));
        }

        if self.peers.contains(&self.node_id) {
            return Err(RaftError::InvalidConfig(
                "peers must not contain node_id".to_string(),
            ));
        }

        let unique: HashSet<_> = self.peers.iter().collect();
        if unique.len() != self.peers.len() {
            return Err(RaftError::InvalidConfig(
                "peers must be unique".to_string(),
            ));
        }

        if self.apply_channel_capacity == 0 {
            return Err(RaftError::InvalidConfig(
                "apply_channel_capacity must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            peers: Vec::new(),
            election_timeout_min_ms: default_election_timeout_min_ms(),
            election_timeout_max_ms: default_election_timeout_max_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            apply_channel_capacity: default_apply_channel_capacity(),
        }
    }
}
