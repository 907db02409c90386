use super::rpc::{RequestVoteRequest, RequestVoteResponse};
use super::state::RaftState;
use super::types::{NodeId, Term};
use crate::storage::Persister;
use crate::util::errors::Result;

/// Handle incoming RequestVote RPC.
///
/// Any change to `current_term` or `voted_for` is persisted before the
/// response is returned.
pub fn handle_request_vote(
    raft_state: &mut RaftState,
    persister: &dyn Persister,
    request: RequestVoteRequest,
) -> Result<RequestVoteResponse> {
    tracing::debug!(
        "Node {} received RequestVote from {} (term: {})",
        raft_state.node_id,
        request.candidate_id,
        request.term
    );

    // Reply false if term < currentTerm
    if request.term < raft_state.current_term {
        tracing::debug!(
            "Node {} denied vote to {} - request term {} < current term {}",
            raft_state.node_id,
            request.candidate_id,
            request.term,
            raft_state.current_term
        );

        return Ok(RequestVoteResponse {
            term: raft_state.current_term,
            vote_granted: false,
        });
    }

    // If request term is greater, update our term and become follower
    let mut dirty = raft_state.update_term(request.term);

    let mut vote_granted = false;

    // Grant vote if:
    // 1. We haven't voted yet in this term, or we already voted for this candidate
    // 2. Candidate's log is at least as up-to-date as ours
    let can_vote =
        raft_state.voted_for.is_none() || raft_state.voted_for == Some(request.candidate_id);

    if can_vote {
        if raft_state
            .log
            .is_up_to_date(request.last_log_index, request.last_log_term)
        {
            vote_granted = true;
            if raft_state.voted_for != Some(request.candidate_id) {
                raft_state.voted_for = Some(request.candidate_id);
                dirty = true;
            }

            tracing::info!(
                "Node {} granted vote to {} in term {}",
                raft_state.node_id,
                request.candidate_id,
                request.term
            );
        } else {
            tracing::debug!(
                "Node {} denied vote to {} - log not up-to-date",
                raft_state.node_id,
                request.candidate_id
            );
        }
    } else {
        tracing::debug!(
            "Node {} denied vote to {} - already voted for {:?}",
            raft_state.node_id,
            request.candidate_id,
            raft_state.voted_for
        );
    }

    if dirty {
        raft_state.persist(persister)?;
    }

    Ok(RequestVoteResponse {
        term: raft_state.current_term,
        vote_granted,
    })
}

/// Handle a RequestVote response for the election started in `election_term`.
///
/// Returns true when this response gave the candidate its majority.
pub fn handle_request_vote_response(
    raft_state: &mut RaftState,
    persister: &dyn Persister,
    from: NodeId,
    election_term: Term,
    response: RequestVoteResponse,
    quorum: usize,
) -> Result<bool> {
    // If response term is greater, update our term and become follower
    if raft_state.update_term(response.term) {
        raft_state.persist(persister)?;
        return Ok(false);
    }

    // Ignore if we're not a candidate anymore, or the election moved on
    if !raft_state.is_candidate() || raft_state.current_term != election_term {
        return Ok(false);
    }

    // Record the vote if granted
    if response.vote_granted {
        raft_state.add_vote(from);

        tracing::debug!(
            "Node {} received vote from {} ({} votes, {} needed)",
            raft_state.node_id,
            from,
            raft_state.votes_received.len(),
            quorum
        );

        // Check if we won the election
        if raft_state.has_majority(quorum) {
            tracing::info!(
                "Node {} won election in term {} with {} votes",
                raft_state.node_id,
                raft_state.current_term,
                raft_state.votes_received.len()
            );
            return Ok(true);
        }
    }

    Ok(false)
}

/// Create a RequestVote request for this node
pub fn create_request_vote(raft_state: &RaftState) -> RequestVoteRequest {
    RequestVoteRequest {
        term: raft_state.current_term,
        candidate_id: raft_state.node_id,
        last_log_index: raft_state.log.last_index(),
        last_log_term: raft_state.log.last_term(),
    }
}
