use super::types::{LogIndex, NodeId, Term};
use crate::storage::{PersistentState, Persister, RaftLog};
use crate::util::errors::Result;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

/// The three states a Raft node can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Follower state - receives updates from leader
    Follower,
    /// Candidate state - requesting votes for leadership
    Candidate,
    /// Leader state - manages log replication
    Leader,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Follower => write!(f, "Follower"),
            NodeState::Candidate => write!(f, "Candidate"),
            NodeState::Leader => write!(f, "Leader"),
        }
    }
}

/// Complete state of a Raft node.
///
/// Lives behind the node's single mutex; every field is read and written by
/// the lock holder only.
#[derive(Debug)]
pub struct RaftState {
    // Persistent state on all servers
    /// Latest term server has seen (initialized to 0)
    pub current_term: Term,
    /// Candidate that received vote in current term (or None)
    pub voted_for: Option<NodeId>,
    /// Log entries, indexed from the snapshot boundary
    pub log: RaftLog,

    // Volatile state on all servers
    /// Index of highest log entry known to be committed
    pub commit_index: LogIndex,
    /// Index of highest log entry applied to state machine
    pub last_applied: LogIndex,
    /// Current role of this node
    pub state: NodeState,
    /// ID of the current leader (if known)
    pub current_leader: Option<NodeId>,
    /// This node's ID
    pub node_id: NodeId,
    /// When a Follower or Candidate starts the next election
    pub election_deadline: Instant,

    // Volatile state on leaders (reinitialized after election)
    /// For each server, index of the next log entry to send to that server
    pub next_index: HashMap<NodeId, LogIndex>,
    /// For each server, index of highest log entry known to be replicated on server
    pub match_index: HashMap<NodeId, LogIndex>,

    // Election state for candidates
    /// Set of nodes that voted for this candidate in current election
    pub votes_received: HashSet<NodeId>,

    // Snapshot state
    /// Latest snapshot covering the log up to `log.snapshot_index()`
    pub snapshot: Vec<u8>,
    /// The snapshot has not yet been handed to the apply loop
    pub pending_snapshot: bool,
}

impl RaftState {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            current_term: 0,
            voted_for: None,
            log: RaftLog::new(),
            commit_index: 0,
            last_applied: 0,
            state: NodeState::Follower,
            current_leader: None,
            node_id,
            election_deadline: Instant::now(),
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            votes_received: HashSet::new(),
            snapshot: Vec::new(),
            pending_snapshot: false,
        }
    }

    /// Rebuild from what a previous incarnation persisted.
    ///
    /// Everything up to the snapshot boundary is committed; the snapshot is
    /// queued so the service rebuilds from it before receiving entries.
    pub fn restore(
        node_id: NodeId,
        persisted: PersistentState,
        snapshot: Option<Vec<u8>>,
    ) -> Self {
        let mut state = Self::new(node_id);
        state.current_term = persisted.current_term;
        state.voted_for = persisted.voted_for;
        state.log = persisted.log;

        if let Some(snapshot) = snapshot {
            if state.log.snapshot_index() > 0 {
                state.commit_index = state.log.snapshot_index();
                state.snapshot = snapshot;
                state.pending_snapshot = true;
            }
        }

        state
    }

    /// Durably record `{current_term, voted_for, log}`
    pub fn persist(&self, persister: &dyn Persister) -> Result<()> {
        let encoded = PersistentState::encode_parts(self.current_term, self.voted_for, &self.log)?;
        persister.save(&encoded, None)
    }

    /// Durably record the persistent state together with the current snapshot
    pub fn persist_with_snapshot(&self, persister: &dyn Persister) -> Result<()> {
        let encoded = PersistentState::encode_parts(self.current_term, self.voted_for, &self.log)?;
        persister.save(&encoded, Some(&self.snapshot))
    }

    /// Transition to follower state.
    ///
    /// The vote is only forgotten when the term actually advances.
    pub fn become_follower(&mut self, term: Term, leader: Option<NodeId>) {
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
        }

        if self.state != NodeState::Follower {
            tracing::info!(
                "Node {} transitioning to Follower (term: {})",
                self.node_id,
                self.current_term
            );
        }

        self.state = NodeState::Follower;
        if leader.is_some() {
            self.current_leader = leader;
        }
        self.votes_received.clear();
        self.next_index.clear();
        self.match_index.clear();
    }

    /// Transition to candidate state
    pub fn become_candidate(&mut self) {
        self.current_term += 1;
        self.state = NodeState::Candidate;
        self.voted_for = Some(self.node_id);
        self.current_leader = None;
        self.votes_received.clear();
        self.votes_received.insert(self.node_id);

        tracing::info!(
            "Node {} transitioning to Candidate (term: {})",
            self.node_id,
            self.current_term
        );
    }

    /// Transition to leader state
    pub fn become_leader(&mut self, peer_ids: &[NodeId]) {
        tracing::info!(
            "Node {} transitioning to Leader (term: {})",
            self.node_id,
            self.current_term
        );

        self.state = NodeState::Leader;
        self.current_leader = Some(self.node_id);

        // Reinitialize leader state
        let next = self.log.last_index() + 1;
        self.next_index.clear();
        self.match_index.clear();

        for &peer_id in peer_ids {
            if peer_id != self.node_id {
                self.next_index.insert(peer_id, next);
                self.match_index.insert(peer_id, 0);
            }
        }

        self.votes_received.clear();
    }

    /// Add a vote for this node
    pub fn add_vote(&mut self, from: NodeId) {
        self.votes_received.insert(from);
    }

    /// Check if the votes received reach `quorum`
    pub fn has_majority(&self, quorum: usize) -> bool {
        self.votes_received.len() >= quorum
    }

    /// Update term if we see a higher term
    pub fn update_term(&mut self, term: Term) -> bool {
        if term > self.current_term {
            tracing::info!(
                "Node {} updating term from {} to {}",
                self.node_id,
                self.current_term,
                term
            );
            self.become_follower(term, None);
            true
        } else {
            false
        }
    }

    pub fn reset_election_deadline(&mut self, timeout: Duration) {
        self.election_deadline = Instant::now() + timeout;
    }

    /// Check if we're the leader
    pub fn is_leader(&self) -> bool {
        self.state == NodeState::Leader
    }

    /// Check if we're a candidate
    pub fn is_candidate(&self) -> bool {
        self.state == NodeState::Candidate
    }

    /// Check if we're a follower
    pub fn is_follower(&self) -> bool {
        self.state == NodeState::Follower
    }
}
