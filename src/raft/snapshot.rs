use super::rpc::{InstallSnapshotRequest, InstallSnapshotResponse};
use super::state::RaftState;
use super::types::{LogIndex, NodeId, Term};
use crate::storage::Persister;
use crate::util::errors::{RaftError, Result};

/// Compact the log up to `index` on behalf of the service.
///
/// The service must already have incorporated every command through `index`
/// into `data`. Requests at or below the current snapshot, or beyond the
/// commit index, are ignored and return false.
pub fn compact_log(
    raft_state: &mut RaftState,
    persister: &dyn Persister,
    index: LogIndex,
    data: Vec<u8>,
) -> Result<bool> {
    if index <= raft_state.log.snapshot_index() {
        tracing::debug!(
            "Node {} ignoring snapshot at {} - already compacted through {}",
            raft_state.node_id,
            index,
            raft_state.log.snapshot_index()
        );
        return Ok(false);
    }

    if index > raft_state.commit_index {
        tracing::warn!(
            "Node {} ignoring snapshot at {} - beyond commit index {}",
            raft_state.node_id,
            index,
            raft_state.commit_index
        );
        return Ok(false);
    }

    let term = raft_state.log.term(index).ok_or_else(|| {
        RaftError::InvalidState(format!("no log entry at snapshot index {}", index))
    })?;

    raft_state.log.compact(index, term);
    raft_state.snapshot = data;
    raft_state.persist_with_snapshot(persister)?;

    tracing::info!(
        "Node {} compacted log through index {} (term {}), {} entries remain",
        raft_state.node_id,
        index,
        term,
        raft_state.log.len()
    );

    Ok(true)
}

/// Handle incoming InstallSnapshot RPC.
///
/// A snapshot that does not reach past our commit index carries nothing new
/// and is ignored. Otherwise the log prefix is replaced, the commit index
/// jumps to the snapshot boundary and the snapshot is queued for the applier.
pub fn handle_install_snapshot(
    raft_state: &mut RaftState,
    persister: &dyn Persister,
    request: InstallSnapshotRequest,
) -> Result<InstallSnapshotResponse> {
    if request.term < raft_state.current_term {
        tracing::debug!(
            "Node {} rejected InstallSnapshot from {} - stale term ({} < {})",
            raft_state.node_id,
            request.leader_id,
            request.term,
            raft_state.current_term
        );
        return Ok(InstallSnapshotResponse {
            term: raft_state.current_term,
        });
    }

    let dirty = raft_state.update_term(request.term);
    raft_state.become_follower(request.term, Some(request.leader_id));

    if request.last_included_index <= raft_state.commit_index {
        tracing::debug!(
            "Node {} ignoring InstallSnapshot through {} - already committed {}",
            raft_state.node_id,
            request.last_included_index,
            raft_state.commit_index
        );
        if dirty {
            raft_state.persist(persister)?;
        }
        return Ok(InstallSnapshotResponse {
            term: raft_state.current_term,
        });
    }

    raft_state
        .log
        .compact(request.last_included_index, request.last_included_term);
    raft_state.snapshot = request.data;
    raft_state.commit_index = request.last_included_index;
    raft_state.pending_snapshot = true;
    raft_state.persist_with_snapshot(persister)?;

    tracing::info!(
        "Node {} installed snapshot from leader {} through index {} (term {})",
        raft_state.node_id,
        request.leader_id,
        request.last_included_index,
        request.last_included_term
    );

    Ok(InstallSnapshotResponse {
        term: raft_state.current_term,
    })
}

/// Handle InstallSnapshot response (for leaders)
pub fn handle_install_snapshot_response(
    raft_state: &mut RaftState,
    persister: &dyn Persister,
    from: NodeId,
    request_term: Term,
    response: InstallSnapshotResponse,
    last_included_index: LogIndex,
) -> Result<()> {
    if raft_state.update_term(response.term) {
        raft_state.persist(persister)?;
        return Ok(());
    }

    if !raft_state.is_leader() || raft_state.current_term != request_term {
        return Ok(());
    }

    if let Some(match_idx) = raft_state.match_index.get_mut(&from) {
        *match_idx = std::cmp::max(*match_idx, last_included_index);
    }
    if let Some(next_idx) = raft_state.next_index.get_mut(&from) {
        *next_idx = std::cmp::max(*next_idx, last_included_index + 1);
    }

    tracing::debug!(
        "Node {} advanced {} past snapshot through {}",
        raft_state.node_id,
        from,
        last_included_index
    );

    Ok(())
}

/// Create an InstallSnapshot request carrying our current snapshot
pub fn create_install_snapshot(raft_state: &RaftState) -> InstallSnapshotRequest {
    InstallSnapshotRequest {
        term: raft_state.current_term,
        leader_id: raft_state.node_id,
        last_included_index: raft_state.log.snapshot_index(),
        last_included_term: raft_state.log.snapshot_term(),
        data: raft_state.snapshot.clone(),
    }
}
