use async_trait::async_trait;

use crate::raft::rpc::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    RequestVoteRequest, RequestVoteResponse,
};
use crate::raft::types::NodeId;
use crate::util::errors::Result;

/// Delivers RPCs from this node to its peers.
///
/// Every call must eventually return. Dropped or failed calls surface as
/// `RaftError::NetworkError` and are treated like lost messages; the caller
/// retries on its next cycle.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request_vote(
        &self,
        to: NodeId,
        request: RequestVoteRequest,
    ) -> Result<RequestVoteResponse>;

    async fn append_entries(
        &self,
        to: NodeId,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse>;

    async fn install_snapshot(
        &self,
        to: NodeId,
        request: InstallSnapshotRequest,
    ) -> Result<InstallSnapshotResponse>;
}
