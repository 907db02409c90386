pub mod config;
pub mod network;
pub mod raft;
pub mod storage;
pub mod util;

pub use config::RaftConfig;
pub use network::{LocalNetwork, Transport};
pub use raft::{ApplyMsg, NodeState, Proposal, RaftNode, RaftStatus};
pub use storage::{FilePersister, MemPersister, Persister};
pub use util::{RaftError, Result};
