pub mod election;
pub mod log;
pub mod node;
pub mod rpc;
pub mod snapshot;
pub mod state;
pub mod types;

pub use node::{RaftNode, RaftStatus};
pub use rpc::RaftMessage;
pub use state::NodeState;
pub use types::{ApplyMsg, LogEntry, LogIndex, NodeId, Proposal, Term};
