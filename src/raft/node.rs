use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::rpc::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    RequestVoteRequest, RequestVoteResponse,
};
use super::state::{NodeState, RaftState};
use super::types::{ApplyMsg, LogEntry, LogIndex, NodeId, Proposal, Term};
use super::{election, log, snapshot};
use crate::config::RaftConfig;
use crate::network::Transport;
use crate::storage::Persister;
use crate::util::errors::{RaftError, Result};

/// Read-only view of a node, taken under its lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaftStatus {
    pub node_id: NodeId,
    pub role: NodeState,
    pub current_term: Term,
    pub voted_for: Option<NodeId>,
    pub current_leader: Option<NodeId>,
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
    pub first_index: LogIndex,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

/// Handle to a running Raft peer.
///
/// Cloning is cheap; every clone drives the same node. All Raft state sits
/// behind one mutex that is never held across a transport call or an apply
/// delivery.
#[derive(Clone)]
pub struct RaftNode {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    id: NodeId,
    config: RaftConfig,
    state: Mutex<RaftState>,
    persister: Arc<dyn Persister>,
    transport: Arc<dyn Transport>,
    /// Wakes the applier when commit_index advances or a snapshot arrives
    apply_notify: Notify,
    /// Wakes the replicator for one peer
    replicate_notify: HashMap<NodeId, Notify>,
    /// The killed flag
    shutdown: CancellationToken,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

enum Outgoing {
    Entries(AppendEntriesRequest),
    Snapshot(InstallSnapshotRequest),
}

impl RaftNode {
    /// Recover persisted state and start the background tasks.
    ///
    /// Committed entries, and snapshots to restore from, arrive on the returned
    /// receiver in log order. Must be called from within a tokio runtime.
    pub fn spawn(
        config: RaftConfig,
        persister: Arc<dyn Persister>,
        transport: Arc<dyn Transport>,
    ) -> Result<(Self, mpsc::Receiver<ApplyMsg>)> {
        config.validate()?;

        let persisted = persister.load_state()?;
        let snapshot = persister.read_snapshot()?;
        let mut raft_state = RaftState::restore(config.node_id, persisted, snapshot);
        raft_state.reset_election_deadline(config.random_election_timeout());
        let pending_snapshot = raft_state.pending_snapshot;

        tracing::info!(
            "Node {} starting (term: {}, last_log_index: {}, snapshot_index: {}, peers: {:?})",
            config.node_id,
            raft_state.current_term,
            raft_state.log.last_index(),
            raft_state.log.snapshot_index(),
            config.peers
        );

        let (apply_tx, apply_rx) = mpsc::channel(config.apply_channel_capacity);
        let replicate_notify = config
            .peers
            .iter()
            .map(|peer| (*peer, Notify::new()))
            .collect();

        let node = Self {
            inner: Arc::new(NodeInner {
                id: config.node_id,
                config,
                state: Mutex::new(raft_state),
                persister,
                transport,
                apply_notify: Notify::new(),
                replicate_notify,
                shutdown: CancellationToken::new(),
                tasks: std::sync::Mutex::new(Vec::new()),
            }),
        };

        let mut handles = vec![tokio::spawn(node.clone().run_ticker())];
        for &peer in &node.inner.config.peers {
            handles.push(tokio::spawn(node.clone().run_replicator(peer)));
        }
        handles.push(tokio::spawn(node.clone().run_applier(apply_tx)));

        match node.inner.tasks.lock() {
            Ok(mut tasks) => tasks.extend(handles),
            Err(poisoned) => poisoned.into_inner().extend(handles),
        }

        if pending_snapshot {
            node.inner.apply_notify.notify_one();
        }

        Ok((node, apply_rx))
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Propose a command.
    ///
    /// Only the leader accepts; the entry is durable in the leader's log
    /// before this returns but may still be lost if leadership changes
    /// before it commits.
    pub async fn start(&self, command: Vec<u8>) -> Result<Proposal> {
        self.ensure_running()?;

        let mut state = self.inner.state.lock().await;
        if !state.is_leader() {
            return Err(RaftError::NotLeader {
                leader: state.current_leader,
            });
        }

        let term = state.current_term;
        let index = state.log.last_index() + 1;
        state.log.append(LogEntry::new(term, index, command))?;
        self.check(state.persist(self.inner.persister.as_ref()))?;

        tracing::debug!("Leader {} appended entry {} in term {}", self.inner.id, index, term);

        // A single-node cluster commits on its own
        if log::advance_commit_index(&mut state, self.inner.config.quorum()) {
            self.inner.apply_notify.notify_one();
        }
        drop(state);

        self.notify_replicators();
        Ok(Proposal { index, term })
    }

    /// Current term and whether this node believes it is the leader
    pub async fn get_state(&self) -> (Term, bool) {
        let state = self.inner.state.lock().await;
        (state.current_term, state.is_leader())
    }

    pub async fn status(&self) -> RaftStatus {
        let state = self.inner.state.lock().await;
        RaftStatus {
            node_id: self.inner.id,
            role: state.state,
            current_term: state.current_term,
            voted_for: state.voted_for,
            current_leader: state.current_leader,
            commit_index: state.commit_index,
            last_applied: state.last_applied,
            first_index: state.log.first_index(),
            last_log_index: state.log.last_index(),
            last_log_term: state.log.last_term(),
        }
    }

    /// The service has folded every command through `index` into `data`;
    /// discard the log up to there
    pub async fn snapshot(&self, index: LogIndex, data: Vec<u8>) -> Result<()> {
        self.ensure_running()?;

        let mut state = self.inner.state.lock().await;
        self.check(snapshot::compact_log(
            &mut state,
            self.inner.persister.as_ref(),
            index,
            data,
        ))?;
        Ok(())
    }

    /// Flip the killed flag. Background tasks exit at their next wake-up.
    pub fn stop(&self) {
        if !self.inner.shutdown.is_cancelled() {
            tracing::info!("Node {} stopping", self.inner.id);
            self.inner.shutdown.cancel();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Stop and wait for the background tasks to finish
    pub async fn shutdown(&self) {
        self.stop();

        let handles = match self.inner.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };

        for result in join_all(handles).await {
            if let Err(e) = result {
                tracing::warn!("Node {} background task ended abnormally: {}", self.inner.id, e);
            }
        }
    }

    pub async fn handle_request_vote(
        &self,
        request: RequestVoteRequest,
    ) -> Result<RequestVoteResponse> {
        self.ensure_running()?;

        let mut state = self.inner.state.lock().await;
        let was_leader = state.is_leader();
        let response = self.check(election::handle_request_vote(
            &mut state,
            self.inner.persister.as_ref(),
            request,
        ))?;

        if response.vote_granted {
            state.reset_election_deadline(self.inner.config.random_election_timeout());
        } else {
            self.rearm_after_step_down(&mut state, was_leader);
        }

        Ok(response)
    }

    pub async fn handle_append_entries(
        &self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        self.ensure_running()?;

        let request_term = request.term;
        let mut state = self.inner.state.lock().await;
        let was_leader = state.is_leader();
        let commit_before = state.commit_index;

        let response = self.check(log::handle_append_entries(
            &mut state,
            self.inner.persister.as_ref(),
            request,
        ))?;

        // A current leader suppresses our candidacy
        if request_term == state.current_term {
            state.reset_election_deadline(self.inner.config.random_election_timeout());
        } else {
            self.rearm_after_step_down(&mut state, was_leader);
        }

        if state.commit_index > commit_before {
            self.inner.apply_notify.notify_one();
        }

        Ok(response)
    }

    pub async fn handle_install_snapshot(
        &self,
        request: InstallSnapshotRequest,
    ) -> Result<InstallSnapshotResponse> {
        self.ensure_running()?;

        let request_term = request.term;
        let mut state = self.inner.state.lock().await;
        let was_leader = state.is_leader();

        let response = self.check(snapshot::handle_install_snapshot(
            &mut state,
            self.inner.persister.as_ref(),
            request,
        ))?;

        if request_term == state.current_term {
            state.reset_election_deadline(self.inner.config.random_election_timeout());
        } else {
            self.rearm_after_step_down(&mut state, was_leader);
        }

        if state.pending_snapshot {
            self.inner.apply_notify.notify_one();
        }

        Ok(response)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_stopped() {
            return Err(RaftError::Stopped);
        }
        Ok(())
    }

    /// Halt on persistence failures; the node cannot keep its promises
    /// without durable state
    fn check<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                tracing::error!("Node {} halting after persistence failure: {}", self.inner.id, e);
                self.inner.shutdown.cancel();
            }
        }
        result
    }

    fn notify_replicators(&self) {
        for notify in self.inner.replicate_notify.values() {
            notify.notify_one();
        }
    }

    /// A leader's election deadline went stale while it led. On stepping
    /// down it waits a full timeout for the new leader before campaigning.
    fn rearm_after_step_down(&self, state: &mut RaftState, was_leader: bool) {
        if was_leader && !state.is_leader() {
            state.reset_election_deadline(self.inner.config.random_election_timeout());
        }
    }

    fn become_leader(&self, state: &mut RaftState) {
        state.become_leader(&self.inner.config.peers);
        log::advance_commit_index(state, self.inner.config.quorum());
        self.notify_replicators();
    }

    /// Election timer. Sleeps until the election deadline (or one heartbeat
    /// interval while leading) and starts an election if it has passed.
    async fn run_ticker(self) {
        let shutdown = self.inner.shutdown.clone();
        let heartbeat = self.inner.config.heartbeat_interval();

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let wake_at = {
                let state = self.inner.state.lock().await;
                if state.is_leader() {
                    Instant::now() + heartbeat
                } else {
                    state.election_deadline
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep_until(wake_at) => {}
            }

            self.maybe_start_election().await;
        }

        tracing::debug!("Node {} election timer stopped", self.inner.id);
    }

    async fn maybe_start_election(&self) {
        let request = {
            let mut state = self.inner.state.lock().await;
            if state.is_leader() || Instant::now() < state.election_deadline {
                return;
            }

            state.become_candidate();
            state.reset_election_deadline(self.inner.config.random_election_timeout());

            tracing::info!(
                "Node {} starting election for term {}",
                self.inner.id,
                state.current_term
            );

            if self
                .check(state.persist(self.inner.persister.as_ref()))
                .is_err()
            {
                return;
            }

            if state.has_majority(self.inner.config.quorum()) {
                tracing::info!(
                    "Node {} won election in term {} unopposed",
                    self.inner.id,
                    state.current_term
                );
                self.become_leader(&mut state);
                return;
            }

            election::create_request_vote(&state)
        };

        for &peer in &self.inner.config.peers {
            let node = self.clone();
            let request = request.clone();
            tokio::spawn(async move { node.solicit_vote(peer, request).await });
        }
    }

    async fn solicit_vote(self, peer: NodeId, request: RequestVoteRequest) {
        if self.is_stopped() {
            return;
        }

        let election_term = request.term;
        let response = match self.inner.transport.request_vote(peer, request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::trace!("Node {} RequestVote to {} failed: {}", self.inner.id, peer, e);
                return;
            }
        };

        if self.is_stopped() {
            return;
        }

        let mut state = self.inner.state.lock().await;
        let won = election::handle_request_vote_response(
            &mut state,
            self.inner.persister.as_ref(),
            peer,
            election_term,
            response,
            self.inner.config.quorum(),
        );

        if let Ok(true) = self.check(won) {
            self.become_leader(&mut state);
        }
    }

    /// Pushes log entries (or the snapshot) to one follower while leading.
    /// Wakes on the heartbeat interval or when poked.
    async fn run_replicator(self, peer: NodeId) {
        let shutdown = self.inner.shutdown.clone();
        let heartbeat = self.inner.config.heartbeat_interval();
        let Some(notify) = self.inner.replicate_notify.get(&peer) else {
            return;
        };

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = notify.notified() => {}
                _ = tokio::time::sleep(heartbeat) => {}
            }

            while !shutdown.is_cancelled() && self.replicate_once(peer).await {}
        }

        tracing::debug!("Node {} replicator for {} stopped", self.inner.id, peer);
    }

    /// One round of replication to `peer`. Returns true when another round
    /// should follow immediately.
    async fn replicate_once(&self, peer: NodeId) -> bool {
        let outgoing = {
            let state = self.inner.state.lock().await;
            if !state.is_leader() {
                return false;
            }
            match log::create_append_entries(&state, peer) {
                Some(request) => Outgoing::Entries(request),
                None => Outgoing::Snapshot(snapshot::create_install_snapshot(&state)),
            }
        };

        match outgoing {
            Outgoing::Entries(request) => self.send_append_entries(peer, request).await,
            Outgoing::Snapshot(request) => self.send_snapshot(peer, request).await,
        }
    }

    async fn send_append_entries(&self, peer: NodeId, request: AppendEntriesRequest) -> bool {
        let request_term = request.term;
        let prev_log_index = request.prev_log_index;
        let sent_entries_count = request.entries.len();

        let response = match self.inner.transport.append_entries(peer, request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::trace!("Node {} AppendEntries to {} failed: {}", self.inner.id, peer, e);
                return false;
            }
        };

        if self.is_stopped() {
            return false;
        }

        let mut state = self.inner.state.lock().await;
        let was_leader = state.is_leader();
        let commit_before = state.commit_index;
        let retry = self.check(log::handle_append_entries_response(
            &mut state,
            self.inner.persister.as_ref(),
            peer,
            request_term,
            response,
            prev_log_index,
            sent_entries_count,
            self.inner.config.quorum(),
        ));

        self.rearm_after_step_down(&mut state, was_leader);
        if state.commit_index > commit_before {
            self.inner.apply_notify.notify_one();
        }

        retry.unwrap_or(false)
    }

    async fn send_snapshot(&self, peer: NodeId, request: InstallSnapshotRequest) -> bool {
        let request_term = request.term;
        let last_included_index = request.last_included_index;

        tracing::info!(
            "Node {} sending snapshot through {} to {}",
            self.inner.id,
            last_included_index,
            peer
        );

        let response = match self.inner.transport.install_snapshot(peer, request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::trace!("Node {} InstallSnapshot to {} failed: {}", self.inner.id, peer, e);
                return false;
            }
        };

        if self.is_stopped() {
            return false;
        }

        let mut state = self.inner.state.lock().await;
        let was_leader = state.is_leader();
        let handled = self.check(snapshot::handle_install_snapshot_response(
            &mut state,
            self.inner.persister.as_ref(),
            peer,
            request_term,
            response,
            last_included_index,
        ));
        self.rearm_after_step_down(&mut state, was_leader);

        // Follow up with the entries after the snapshot
        handled.is_ok() && state.is_leader()
    }

    /// Delivers committed entries and installed snapshots to the service in
    /// log order, without holding the state lock while a send is pending.
    async fn run_applier(self, apply_tx: mpsc::Sender<ApplyMsg>) {
        let shutdown = self.inner.shutdown.clone();

        'outer: loop {
            if shutdown.is_cancelled() {
                break;
            }

            let batch = {
                let mut state = self.inner.state.lock().await;
                collect_ready(&mut state)
            };

            if batch.is_empty() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = self.inner.apply_notify.notified() => {}
                }
                continue;
            }

            for msg in batch {
                let index = msg.index();

                tokio::select! {
                    _ = shutdown.cancelled() => break 'outer,
                    sent = apply_tx.send(msg) => {
                        if sent.is_err() {
                            tracing::debug!("Node {} apply receiver dropped", self.inner.id);
                            break 'outer;
                        }
                    }
                }

                let mut state = self.inner.state.lock().await;
                state.last_applied = std::cmp::max(state.last_applied, index);
            }
        }

        tracing::debug!("Node {} applier stopped", self.inner.id);
    }
}

/// Next run of messages for the service: a pending snapshot on its own,
/// otherwise every committed entry not yet applied
fn collect_ready(state: &mut RaftState) -> Vec<ApplyMsg> {
    if state.pending_snapshot {
        state.pending_snapshot = false;
        return vec![ApplyMsg::Snapshot {
            data: state.snapshot.clone(),
            last_included_index: state.log.snapshot_index(),
            last_included_term: state.log.snapshot_term(),
        }];
    }

    // Entries at or below the snapshot are already reflected in it
    if state.last_applied < state.log.snapshot_index() {
        state.last_applied = state.log.snapshot_index();
    }

    if state.commit_index <= state.last_applied {
        return Vec::new();
    }

    state
        .log
        .get_range(state.last_applied + 1, state.commit_index)
        .into_iter()
        .map(|entry| ApplyMsg::Command {
            index: entry.index,
            term: entry.term,
            command: entry.command,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::LocalNetwork;
    use crate::storage::MemPersister;
    use std::time::Duration;

    fn single_node_config() -> RaftConfig {
        RaftConfig {
            election_timeout_min_ms: 50,
            election_timeout_max_ms: 100,
            heartbeat_interval_ms: 20,
            ..RaftConfig::new(1, vec![])
        }
    }

    async fn wait_for_leader(node: &RaftNode) {
        for _ in 0..100 {
            if node.get_state().await.1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("node {} never became leader", node.id());
    }

    #[test]
    fn test_collect_ready_snapshot_first() {
        let mut state = RaftState::new(1);
        for i in 1..=5 {
            state.log.append(LogEntry::new(1, i, vec![i as u8])).unwrap();
        }
        state.log.compact(3, 1);
        state.snapshot = b"snap".to_vec();
        state.pending_snapshot = true;
        state.commit_index = 5;

        let first = collect_ready(&mut state);
        assert_eq!(
            first,
            vec![ApplyMsg::Snapshot {
                data: b"snap".to_vec(),
                last_included_index: 3,
                last_included_term: 1,
            }]
        );
        state.last_applied = 3;

        let second = collect_ready(&mut state);
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].index(), 4);
        assert_eq!(second[1].index(), 5);
    }

    #[test]
    fn test_collect_ready_nothing_committed() {
        let mut state = RaftState::new(1);
        state.log.append(LogEntry::new(1, 1, vec![])).unwrap();
        assert!(collect_ready(&mut state).is_empty());
    }

    #[tokio::test]
    async fn test_single_node_commits_and_applies() {
        let network = LocalNetwork::new();
        let persister = Arc::new(MemPersister::new());
        let (node, mut apply_rx) =
            RaftNode::spawn(single_node_config(), persister, network.endpoint(1)).unwrap();
        network.register(1, node.clone());

        wait_for_leader(&node).await;

        let proposal = node.start(b"hello".to_vec()).await.unwrap();
        assert_eq!(proposal.index, 1);

        let msg = tokio::time::timeout(Duration::from_secs(2), apply_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            msg,
            ApplyMsg::Command {
                index: 1,
                term: proposal.term,
                command: b"hello".to_vec(),
            }
        );

        let status = node.status().await;
        assert_eq!(status.commit_index, 1);
        assert_eq!(status.current_leader, Some(1));

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_stopped_node_refuses_work() {
        let network = LocalNetwork::new();
        let persister = Arc::new(MemPersister::new());
        let (node, _apply_rx) =
            RaftNode::spawn(single_node_config(), persister, network.endpoint(1)).unwrap();

        node.shutdown().await;
        node.stop();

        assert!(node.is_stopped());
        assert!(matches!(node.start(vec![1]).await, Err(RaftError::Stopped)));
        assert!(matches!(node.snapshot(1, vec![]).await, Err(RaftError::Stopped)));
        // State stays readable
        let _ = node.get_state().await;
    }

    #[tokio::test]
    async fn test_persistence_failure_halts_node() {
        let network = LocalNetwork::new();
        let persister = Arc::new(MemPersister::new());
        let (node, _apply_rx) =
            RaftNode::spawn(single_node_config(), persister.clone(), network.endpoint(1))
                .unwrap();

        wait_for_leader(&node).await;
        persister.set_fail_writes(true);

        let err = node.start(b"lost".to_vec()).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(node.is_stopped());

        node.shutdown().await;
    }

    fn two_node_config(node_id: NodeId, peer: NodeId, election_timeout_ms: u64) -> RaftConfig {
        RaftConfig {
            election_timeout_min_ms: election_timeout_ms,
            election_timeout_max_ms: 2 * election_timeout_ms,
            heartbeat_interval_ms: 50,
            ..RaftConfig::new(node_id, vec![peer])
        }
    }

    #[tokio::test]
    async fn test_deposed_leader_waits_before_campaigning() {
        let network = LocalNetwork::new();
        let (leader, _rx1) = RaftNode::spawn(
            two_node_config(1, 2, 300),
            Arc::new(MemPersister::new()),
            network.endpoint(1),
        )
        .unwrap();
        let (peer, _rx2) = RaftNode::spawn(
            two_node_config(2, 1, 10_000),
            Arc::new(MemPersister::new()),
            network.endpoint(2),
        )
        .unwrap();

        peer.inner.state.lock().await.current_term = 5;
        {
            // Leading since an election whose deadline is long gone
            let mut state = leader.inner.state.lock().await;
            state.current_term = 1;
            state.voted_for = Some(1);
            state.become_leader(&[2]);
            state.election_deadline = Instant::now() - Duration::from_secs(1);
        }

        for (id, node) in [(1, &leader), (2, &peer)] {
            network.register(id, node.clone());
            network.connect(id);
        }

        // The peer's reply to a heartbeat carries the higher term
        let mut stepped_down = false;
        for _ in 0..100 {
            let state = leader.inner.state.lock().await;
            if !state.is_leader() {
                assert_eq!(state.current_term, 5);
                assert!(state.election_deadline > Instant::now());
                stepped_down = true;
                break;
            }
            drop(state);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(stepped_down, "leader never saw the higher term");

        tokio::time::sleep(Duration::from_millis(150)).await;
        let status = leader.status().await;
        assert_eq!(status.role, NodeState::Follower);
        assert_eq!(status.current_term, 5);

        for id in [1, 2] {
            network.unregister(id);
        }
        leader.shutdown().await;
        peer.shutdown().await;
    }

    #[tokio::test]
    async fn test_deposed_leader_rearms_on_denied_vote() {
        let network = LocalNetwork::new();
        let (node, _apply_rx) = RaftNode::spawn(
            two_node_config(1, 2, 300),
            Arc::new(MemPersister::new()),
            network.endpoint(1),
        )
        .unwrap();

        {
            let mut state = node.inner.state.lock().await;
            state.current_term = 2;
            state.log.append(LogEntry::new(2, 1, vec![])).unwrap();
            state.become_leader(&[2]);
            state.election_deadline = Instant::now() - Duration::from_secs(1);
        }

        // Higher term, but a log too stale to win our vote
        let response = node
            .handle_request_vote(RequestVoteRequest {
                term: 3,
                candidate_id: 2,
                last_log_index: 0,
                last_log_term: 0,
            })
            .await
            .unwrap();
        assert!(!response.vote_granted);

        let state = node.inner.state.lock().await;
        assert!(state.is_follower());
        assert_eq!(state.current_term, 3);
        assert!(state.election_deadline > Instant::now() + Duration::from_millis(200));
        drop(state);

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let network = LocalNetwork::new();
        let config = RaftConfig::new(1, vec![1]);
        let result = RaftNode::spawn(config, Arc::new(MemPersister::new()), network.endpoint(1));
        assert!(matches!(result, Err(RaftError::InvalidConfig(_))));
    }
}
