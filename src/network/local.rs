use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use super::transport::Transport;
use crate::raft::node::RaftNode;
use crate::raft::rpc::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    RequestVoteRequest, RequestVoteResponse,
};
use crate::raft::types::NodeId;
use crate::util::errors::{RaftError, Result};

/// Chance that an unreliable network drops a request or a reply
const DROP_PROBABILITY: f64 = 0.1;
/// Upper bound of the random delay an unreliable network adds to each call
const MAX_UNRELIABLE_DELAY_MS: u64 = 25;
/// How long a call to an unreachable node takes to fail
const MAX_UNREACHABLE_DELAY_MS: u64 = 50;

/// In-process network connecting `RaftNode`s.
///
/// Nodes can be disconnected and reconnected to model partitions and crashes,
/// and the whole network can be made lossy. A failed call returns
/// `RaftError::NetworkError` after a short delay, like a real transport that
/// eventually gives up.
///
/// A registered node holds an endpoint that points back at this network, so
/// the two keep each other alive. Call `unregister` for every node that was
/// registered to release them.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    inner: Arc<NetworkInner>,
}

#[derive(Default)]
struct NetworkInner {
    nodes: RwLock<HashMap<NodeId, RaftNode>>,
    connected: RwLock<HashSet<NodeId>>,
    unreliable: AtomicBool,
    rpc_count: AtomicU64,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport for the node `from`
    pub fn endpoint(&self, from: NodeId) -> Arc<dyn Transport> {
        Arc::new(LocalEndpoint {
            from,
            network: self.clone(),
        })
    }

    /// Route calls for `id` to `node`, replacing any node previously
    /// registered under the same id. The node stays unreachable until
    /// `connect` is called.
    pub fn register(&self, id: NodeId, node: RaftNode) {
        if let Ok(mut nodes) = self.inner.nodes.write() {
            nodes.insert(id, node);
        }
    }

    /// Drop the route to `id`, breaking the reference cycle between the
    /// network and the node registered under it
    pub fn unregister(&self, id: NodeId) {
        self.disconnect(id);
        if let Ok(mut nodes) = self.inner.nodes.write() {
            nodes.remove(&id);
        }
    }

    pub fn connect(&self, id: NodeId) {
        if let Ok(mut connected) = self.inner.connected.write() {
            connected.insert(id);
        }
    }

    /// Cut `id` off: calls from or to it fail
    pub fn disconnect(&self, id: NodeId) {
        if let Ok(mut connected) = self.inner.connected.write() {
            connected.remove(&id);
        }
    }

    pub fn is_connected(&self, id: NodeId) -> bool {
        self.inner
            .connected
            .read()
            .map(|connected| connected.contains(&id))
            .unwrap_or(false)
    }

    pub fn set_reliable(&self, reliable: bool) {
        self.inner.unreliable.store(!reliable, Ordering::SeqCst);
    }

    /// Number of calls attempted so far, delivered or not
    pub fn rpc_count(&self) -> u64 {
        self.inner.rpc_count.load(Ordering::SeqCst)
    }

    fn reachable(&self, from: NodeId, to: NodeId) -> Option<RaftNode> {
        if !self.is_connected(from) || !self.is_connected(to) {
            return None;
        }
        self.inner
            .nodes
            .read()
            .ok()
            .and_then(|nodes| nodes.get(&to).cloned())
    }

    fn is_unreliable(&self) -> bool {
        self.inner.unreliable.load(Ordering::SeqCst)
    }

    async fn deliver<Req, Resp, F, Fut>(
        &self,
        from: NodeId,
        to: NodeId,
        request: Req,
        handler: F,
    ) -> Result<Resp>
    where
        F: FnOnce(RaftNode, Req) -> Fut,
        Fut: Future<Output = Result<Resp>>,
    {
        self.inner.rpc_count.fetch_add(1, Ordering::SeqCst);

        if self.is_unreliable() {
            tokio::time::sleep(random_delay(MAX_UNRELIABLE_DELAY_MS)).await;
            if should_drop() {
                return Err(RaftError::NetworkError(format!(
                    "request {} -> {} dropped",
                    from, to
                )));
            }
        }

        let node = match self.reachable(from, to) {
            Some(node) => node,
            None => {
                tokio::time::sleep(random_delay(MAX_UNREACHABLE_DELAY_MS)).await;
                return Err(RaftError::NetworkError(format!(
                    "node {} unreachable from {}",
                    to, from
                )));
            }
        };

        let response = handler(node, request).await?;

        // The reply travels back over the same links
        if self.reachable(from, to).is_none() || (self.is_unreliable() && should_drop()) {
            return Err(RaftError::NetworkError(format!(
                "reply {} -> {} dropped",
                to, from
            )));
        }

        Ok(response)
    }
}

fn random_delay(max_ms: u64) -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

fn should_drop() -> bool {
    rand::thread_rng().gen_bool(DROP_PROBABILITY)
}

struct LocalEndpoint {
    from: NodeId,
    network: LocalNetwork,
}

#[async_trait]
impl Transport for LocalEndpoint {
    async fn request_vote(
        &self,
        to: NodeId,
        request: RequestVoteRequest,
    ) -> Result<RequestVoteResponse> {
        self.network
            .deliver(self.from, to, request, |node, request| async move {
                node.handle_request_vote(request).await
            })
            .await
    }

    async fn append_entries(
        &self,
        to: NodeId,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        self.network
            .deliver(self.from, to, request, |node, request| async move {
                node.handle_append_entries(request).await
            })
            .await
    }

    async fn install_snapshot(
        &self,
        to: NodeId,
        request: InstallSnapshotRequest,
    ) -> Result<InstallSnapshotResponse> {
        self.network
            .deliver(self.from, to, request, |node, request| async move {
                node.handle_install_snapshot(request).await
            })
            .await
    }
}
