use super::rpc::{AppendEntriesRequest, AppendEntriesResponse};
use super::state::RaftState;
use super::types::{NodeId, Term};
use crate::storage::Persister;
use crate::util::errors::Result;

/// Handle incoming AppendEntries RPC.
///
/// Term adoption and log changes are persisted before the response is
/// returned. `commit_index` only moves forward.
pub fn handle_append_entries(
    raft_state: &mut RaftState,
    persister: &dyn Persister,
    request: AppendEntriesRequest,
) -> Result<AppendEntriesResponse> {
    // Reply false if term < currentTerm
    if request.term < raft_state.current_term {
        tracing::debug!(
            "Node {} rejected AppendEntries from {} - stale term ({} < {})",
            raft_state.node_id,
            request.leader_id,
            request.term,
            raft_state.current_term
        );

        return Ok(AppendEntriesResponse::rejected(raft_state.current_term));
    }

    // If request term is greater, update our term and become follower
    let mut dirty = raft_state.update_term(request.term);

    // Valid leader for this term; a candidate in the same term steps down
    raft_state.become_follower(request.term, Some(request.leader_id));

    let AppendEntriesRequest {
        leader_id,
        mut prev_log_index,
        prev_log_term,
        mut entries,
        leader_commit,
        ..
    } = request;

    let snapshot_index = raft_state.log.snapshot_index();
    if prev_log_index < snapshot_index {
        // The start of this batch is already covered by our snapshot
        let skip = (snapshot_index - prev_log_index) as usize;
        if skip >= entries.len() {
            entries.clear();
        } else {
            entries.drain(..skip);
        }
        prev_log_index = snapshot_index;
    } else {
        // Check log consistency
        match raft_state.log.term(prev_log_index) {
            None => {
                // We don't have the entry at prev_log_index
                tracing::debug!(
                    "Node {} rejected AppendEntries - missing entry at index {}",
                    raft_state.node_id,
                    prev_log_index
                );

                if dirty {
                    raft_state.persist(persister)?;
                }
                return Ok(AppendEntriesResponse {
                    term: raft_state.current_term,
                    success: false,
                    conflict_index: Some(raft_state.log.last_index() + 1),
                    conflict_term: None,
                });
            }
            Some(term) if term != prev_log_term => {
                tracing::debug!(
                    "Node {} rejected AppendEntries - term mismatch at index {} ({} != {})",
                    raft_state.node_id,
                    prev_log_index,
                    term,
                    prev_log_term
                );

                // First index holding the conflicting term, so the leader can
                // skip the whole term at once
                let conflict_index = raft_state
                    .log
                    .first_index_of_term(term)
                    .unwrap_or_else(|| raft_state.log.first_index());

                if dirty {
                    raft_state.persist(persister)?;
                }
                return Ok(AppendEntriesResponse {
                    term: raft_state.current_term,
                    success: false,
                    conflict_index: Some(conflict_index),
                    conflict_term: Some(term),
                });
            }
            Some(_) => {}
        }
    }

    let last_new_entry_index = prev_log_index + entries.len() as u64;

    // Skip entries we already hold; the first mismatch truncates our suffix
    let mut first_new = None;
    for (i, new_entry) in entries.iter().enumerate() {
        match raft_state.log.term(new_entry.index) {
            Some(existing_term) if existing_term == new_entry.term => continue,
            Some(_) => {
                tracing::info!(
                    "Node {} found log conflict at index {}, truncating",
                    raft_state.node_id,
                    new_entry.index
                );
                raft_state.log.truncate(new_entry.index)?;
                first_new = Some(i);
                break;
            }
            None => {
                first_new = Some(i);
                break;
            }
        }
    }

    if let Some(i) = first_new {
        let remaining = entries.split_off(i);
        tracing::debug!(
            "Node {} appending {} entries from leader {}",
            raft_state.node_id,
            remaining.len(),
            leader_id
        );
        raft_state.log.extend(remaining)?;
        dirty = true;
    }

    if dirty {
        raft_state.persist(persister)?;
    }

    // Update commit index
    if leader_commit > raft_state.commit_index {
        let new_commit = std::cmp::min(leader_commit, last_new_entry_index);
        if new_commit > raft_state.commit_index {
            raft_state.commit_index = new_commit;

            tracing::debug!(
                "Node {} updated commit_index to {}",
                raft_state.node_id,
                raft_state.commit_index
            );
        }
    }

    Ok(AppendEntriesResponse {
        term: raft_state.current_term,
        success: true,
        conflict_index: None,
        conflict_term: None,
    })
}

/// Handle AppendEntries response (for leaders).
///
/// `request_term`, `prev_log_index` and `sent_entries_count` describe the
/// request this response answers. Returns true when a log-inconsistency
/// rejection moved `next_index`, so the follower should be retried without
/// waiting for the next heartbeat.
#[allow(clippy::too_many_arguments)]
pub fn handle_append_entries_response(
    raft_state: &mut RaftState,
    persister: &dyn Persister,
    from: NodeId,
    request_term: Term,
    response: AppendEntriesResponse,
    prev_log_index: u64,
    sent_entries_count: usize,
    quorum: usize,
) -> Result<bool> {
    // If response term is greater, update our term and step down
    if raft_state.update_term(response.term) {
        raft_state.persist(persister)?;
        return Ok(false);
    }

    // Ignore if we're not leader anymore, or this answers an older term
    if !raft_state.is_leader() || raft_state.current_term != request_term {
        return Ok(false);
    }

    if response.success {
        // Update next_index and match_index
        let new_match_index = prev_log_index + sent_entries_count as u64;

        if let Some(match_idx) = raft_state.match_index.get_mut(&from) {
            *match_idx = std::cmp::max(*match_idx, new_match_index);
        }

        if let Some(next_idx) = raft_state.next_index.get_mut(&from) {
            *next_idx = std::cmp::max(*next_idx, new_match_index + 1);
        }

        tracing::debug!(
            "Node {} updated match_index for {} to {}",
            raft_state.node_id,
            from,
            new_match_index
        );

        // Try to advance commit_index
        advance_commit_index(raft_state, quorum);
        return Ok(false);
    }

    let current_next = match raft_state.next_index.get(&from) {
        Some(next) => *next,
        None => return Ok(false),
    };
    let match_idx = raft_state.match_index.get(&from).copied().unwrap_or(0);

    // AppendEntries failed, move next_index back using the follower's hint
    let hinted = match (response.conflict_term, response.conflict_index) {
        (Some(conflict_term), Some(conflict_index)) => raft_state
            .log
            .last_index_of_term(conflict_term)
            .map(|last| last + 1)
            .unwrap_or(conflict_index),
        (None, Some(conflict_index)) => conflict_index,
        // Fallback: decrement by 1
        _ => current_next.saturating_sub(1),
    };

    let new_next = hinted
        .max(match_idx + 1)
        .min(raft_state.log.last_index() + 1);

    raft_state.next_index.insert(from, new_next);

    tracing::debug!(
        "Node {} moved next_index for {} from {} to {} (conflict)",
        raft_state.node_id,
        from,
        current_next,
        new_next
    );

    Ok(new_next != current_next)
}

/// Try to advance commit index based on match_index of followers.
///
/// An entry commits once `quorum` nodes, the leader included, hold it. Only
/// entries from the current term are counted directly; earlier entries
/// commit along with them.
pub fn advance_commit_index(raft_state: &mut RaftState, quorum: usize) -> bool {
    if !raft_state.is_leader() {
        return false;
    }

    let last_log_index = raft_state.log.last_index();

    // Highest index first; terms never decrease along the log
    for n in ((raft_state.commit_index + 1)..=last_log_index).rev() {
        match raft_state.log.term(n) {
            Some(term) if term == raft_state.current_term => {}
            Some(term) if term > raft_state.current_term => continue,
            _ => break,
        }

        // Count how many nodes have replicated this entry
        let count = 1 + raft_state
            .match_index
            .values()
            .filter(|match_idx| **match_idx >= n)
            .count();

        if count >= quorum {
            raft_state.commit_index = n;
            tracing::debug!(
                "Leader {} advanced commit_index to {}",
                raft_state.node_id,
                n
            );
            return true;
        }
    }

    false
}

/// Create AppendEntries request for a specific follower.
///
/// Returns `None` when the entries the follower needs have been compacted
/// into the snapshot; it must be sent InstallSnapshot instead.
pub fn create_append_entries(
    raft_state: &RaftState,
    follower_id: NodeId,
) -> Option<AppendEntriesRequest> {
    let last_log_index = raft_state.log.last_index();
    let next_index = raft_state
        .next_index
        .get(&follower_id)
        .copied()
        .unwrap_or(last_log_index + 1)
        .max(1);

    let prev_log_index = next_index - 1;
    let prev_log_term = raft_state.log.term(prev_log_index)?;

    // Get entries to send
    let entries = raft_state.log.entries_from(next_index);

    Some(AppendEntriesRequest {
        term: raft_state.current_term,
        leader_id: raft_state.node_id,
        prev_log_index,
        prev_log_term,
        entries,
        leader_commit: raft_state.commit_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raft::types::LogEntry;
    use crate::storage::MemPersister;

    fn state_with_terms(node_id: NodeId, current_term: Term, terms: &[Term]) -> RaftState {
        let mut raft_state = RaftState::new(node_id);
        raft_state.current_term = current_term;
        for (i, term) in terms.iter().enumerate() {
            raft_state
                .log
                .append(LogEntry::new(*term, i as u64 + 1, vec![i as u8]))
                .unwrap();
        }
        raft_state
    }

    fn entries(start: u64, terms: &[Term]) -> Vec<LogEntry> {
        terms
            .iter()
            .enumerate()
            .map(|(i, term)| LogEntry::new(*term, start + i as u64, vec![0xAA]))
            .collect()
    }

    fn request(
        term: Term,
        prev_log_index: u64,
        prev_log_term: Term,
        entries: Vec<LogEntry>,
        leader_commit: u64,
    ) -> AppendEntriesRequest {
        AppendEntriesRequest {
            term,
            leader_id: 2,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit,
        }
    }

    #[test]
    fn test_append_entries_success() {
        let persister = MemPersister::new();
        let mut raft_state = RaftState::new(1);
        raft_state.current_term = 1;

        let response = handle_append_entries(
            &mut raft_state,
            &persister,
            request(1, 0, 0, entries(1, &[1]), 0),
        )
        .unwrap();

        assert!(response.success);
        assert_eq!(raft_state.log.last_index(), 1);
        assert_eq!(raft_state.current_leader, Some(2));
        assert_eq!(persister.load_state().unwrap().log.last_index(), 1);
    }

    #[test]
    fn test_append_entries_reject_stale_term() {
        let persister = MemPersister::new();
        let mut raft_state = RaftState::new(1);
        raft_state.current_term = 2;

        let response =
            handle_append_entries(&mut raft_state, &persister, request(1, 0, 0, vec![], 0))
                .unwrap();

        assert!(!response.success);
        assert_eq!(response.term, 2);
        assert_eq!(raft_state.current_leader, None);
    }

    #[test]
    fn test_candidate_steps_down_for_same_term_leader() {
        let persister = MemPersister::new();
        let mut raft_state = RaftState::new(1);
        raft_state.become_candidate();

        let response =
            handle_append_entries(&mut raft_state, &persister, request(1, 0, 0, vec![], 0))
                .unwrap();

        assert!(response.success);
        assert!(raft_state.is_follower());
        assert_eq!(raft_state.voted_for, Some(1));
    }

    #[test]
    fn test_missing_prev_entry_hints_log_length() {
        let persister = MemPersister::new();
        let mut raft_state = state_with_terms(1, 1, &[1, 1]);

        let response = handle_append_entries(
            &mut raft_state,
            &persister,
            request(1, 5, 1, entries(6, &[1]), 0),
        )
        .unwrap();

        assert!(!response.success);
        assert_eq!(response.conflict_index, Some(3));
        assert_eq!(response.conflict_term, None);
    }

    #[test]
    fn test_term_mismatch_hints_first_index_of_term() {
        let persister = MemPersister::new();
        let mut raft_state = state_with_terms(1, 3, &[1, 2, 2, 2]);

        let response = handle_append_entries(
            &mut raft_state,
            &persister,
            request(3, 4, 3, entries(5, &[3]), 0),
        )
        .unwrap();

        assert!(!response.success);
        assert_eq!(response.conflict_term, Some(2));
        assert_eq!(response.conflict_index, Some(2));
        // Nothing was touched
        assert_eq!(raft_state.log.last_index(), 4);
    }

    #[test]
    fn test_conflicting_suffix_is_replaced() {
        let persister = MemPersister::new();
        let mut raft_state = state_with_terms(1, 2, &[1, 1, 2, 2]);

        let response = handle_append_entries(
            &mut raft_state,
            &persister,
            request(3, 2, 1, entries(3, &[3]), 0),
        )
        .unwrap();

        assert!(response.success);
        assert_eq!(raft_state.log.last_index(), 3);
        assert_eq!(raft_state.log.term(3), Some(3));
        assert_eq!(raft_state.current_term, 3);

        let persisted = persister.load_state().unwrap();
        assert_eq!(persisted.log, raft_state.log);
        assert_eq!(persisted.current_term, 3);
    }

    #[test]
    fn test_stale_duplicate_does_not_truncate() {
        let persister = MemPersister::new();
        let mut raft_state = state_with_terms(1, 1, &[1, 1, 1, 1]);

        // A delayed request carrying only a prefix of what we already hold
        let response = handle_append_entries(
            &mut raft_state,
            &persister,
            request(1, 1, 1, entries(2, &[1]), 0),
        )
        .unwrap();

        assert!(response.success);
        assert_eq!(raft_state.log.last_index(), 4);
    }

    #[test]
    fn test_commit_bounded_by_last_new_entry() {
        let persister = MemPersister::new();
        let mut raft_state = state_with_terms(1, 1, &[1, 1, 1, 1, 1]);

        // Heartbeat vouches only for the prefix up to index 2
        handle_append_entries(&mut raft_state, &persister, request(1, 2, 1, vec![], 10))
            .unwrap();
        assert_eq!(raft_state.commit_index, 2);

        handle_append_entries(&mut raft_state, &persister, request(1, 4, 1, vec![], 3))
            .unwrap();
        assert_eq!(raft_state.commit_index, 3);

        // Never moves backwards
        handle_append_entries(&mut raft_state, &persister, request(1, 5, 1, vec![], 1))
            .unwrap();
        assert_eq!(raft_state.commit_index, 3);
    }

    #[test]
    fn test_entries_inside_snapshot_are_skipped() {
        let persister = MemPersister::new();
        let mut raft_state = state_with_terms(1, 1, &[1, 1, 1, 1]);
        raft_state.log.compact(3, 1);
        raft_state.commit_index = 3;

        let response = handle_append_entries(
            &mut raft_state,
            &persister,
            request(1, 1, 1, entries(2, &[1, 1, 1, 1]), 3),
        )
        .unwrap();

        assert!(response.success);
        assert_eq!(raft_state.log.last_index(), 5);
        assert_eq!(raft_state.log.first_index(), 4);
    }

    fn leader_state() -> RaftState {
        let mut raft_state = state_with_terms(1, 2, &[1, 1, 2]);
        raft_state.state = crate::raft::state::NodeState::Leader;
        raft_state.become_leader(&[2, 3]);
        raft_state
    }

    #[test]
    fn test_response_success_advances_commit() {
        let persister = MemPersister::new();
        let mut raft_state = leader_state();

        let response = AppendEntriesResponse {
            term: 2,
            success: true,
            conflict_index: None,
            conflict_term: None,
        };
        let retry =
            handle_append_entries_response(&mut raft_state, &persister, 2, 2, response, 0, 3, 2)
                .unwrap();

        assert!(!retry);
        assert_eq!(raft_state.match_index[&2], 3);
        assert_eq!(raft_state.next_index[&2], 4);
        assert_eq!(raft_state.commit_index, 3);
    }

    #[test]
    fn test_prior_term_entries_not_committed_directly() {
        let mut raft_state = leader_state();
        raft_state.current_term = 3;

        // Majority holds index 3 (term 2) but nothing from term 3 yet
        raft_state.match_index.insert(2, 3);
        assert!(!advance_commit_index(&mut raft_state, 2));
        assert_eq!(raft_state.commit_index, 0);

        // Once a term-3 entry reaches the majority, everything before commits with it
        raft_state
            .log
            .append(LogEntry::new(3, 4, vec![]))
            .unwrap();
        raft_state.match_index.insert(2, 4);
        assert!(advance_commit_index(&mut raft_state, 2));
        assert_eq!(raft_state.commit_index, 4);
    }

    #[test]
    fn test_single_node_commits_alone() {
        let mut raft_state = state_with_terms(1, 1, &[1, 1]);
        raft_state.become_leader(&[]);
        assert!(advance_commit_index(&mut raft_state, 1));
        assert_eq!(raft_state.commit_index, 2);
    }

    #[test]
    fn test_response_failure_uses_conflict_term() {
        let persister = MemPersister::new();
        let mut raft_state = state_with_terms(1, 5, &[1, 1, 4, 4, 5, 5]);
        raft_state.become_leader(&[2, 3]);
        assert_eq!(raft_state.next_index[&2], 7);

        // Follower has term 4 at prev index; leader also has term 4, so jump
        // past its last term-4 entry
        let response = AppendEntriesResponse {
            term: 5,
            success: false,
            conflict_index: Some(3),
            conflict_term: Some(4),
        };
        let retry =
            handle_append_entries_response(&mut raft_state, &persister, 2, 5, response, 6, 0, 2)
                .unwrap();
        assert!(retry);
        assert_eq!(raft_state.next_index[&2], 5);

        // Follower term the leader never had: back to the follower's first index of it
        let response = AppendEntriesResponse {
            term: 5,
            success: false,
            conflict_index: Some(2),
            conflict_term: Some(3),
        };
        handle_append_entries_response(&mut raft_state, &persister, 2, 5, response, 4, 0, 2)
            .unwrap();
        assert_eq!(raft_state.next_index[&2], 2);

        // Short follower log
        let response = AppendEntriesResponse {
            term: 5,
            success: false,
            conflict_index: Some(1),
            conflict_term: None,
        };
        handle_append_entries_response(&mut raft_state, &persister, 3, 5, response, 6, 0, 2)
            .unwrap();
        assert_eq!(raft_state.next_index[&3], 1);
    }

    #[test]
    fn test_response_higher_term_steps_down() {
        let persister = MemPersister::new();
        let mut raft_state = leader_state();

        let response = AppendEntriesResponse::rejected(9);
        handle_append_entries_response(&mut raft_state, &persister, 2, 2, response, 0, 0, 2)
            .unwrap();

        assert!(raft_state.is_follower());
        assert_eq!(raft_state.current_term, 9);
        assert_eq!(persister.load_state().unwrap().current_term, 9);
    }

    #[test]
    fn test_response_from_old_term_ignored() {
        let persister = MemPersister::new();
        let mut raft_state = leader_state();

        let response = AppendEntriesResponse {
            term: 1,
            success: true,
            conflict_index: None,
            conflict_term: None,
        };
        handle_append_entries_response(&mut raft_state, &persister, 2, 1, response, 0, 3, 2)
            .unwrap();
        assert_eq!(raft_state.match_index[&2], 0);
    }

    #[test]
    fn test_create_append_entries() {
        let mut raft_state = leader_state();
        raft_state.next_index.insert(2, 2);

        let request = create_append_entries(&raft_state, 2).unwrap();
        assert_eq!(request.prev_log_index, 1);
        assert_eq!(request.prev_log_term, 1);
        assert_eq!(request.entries.len(), 2);
        assert_eq!(request.entries[0].index, 2);

        // Heartbeat for an up-to-date follower
        let request = create_append_entries(&raft_state, 3).unwrap();
        assert_eq!(request.prev_log_index, 3);
        assert!(request.entries.is_empty());
    }

    #[test]
    fn test_create_append_entries_needs_snapshot() {
        let mut raft_state = leader_state();
        raft_state.log.compact(2, 1);

        raft_state.next_index.insert(2, 2);
        assert!(create_append_entries(&raft_state, 2).is_none());

        // next_index == first_index still has a known prev term
        raft_state.next_index.insert(2, 3);
        let request = create_append_entries(&raft_state, 2).unwrap();
        assert_eq!(request.prev_log_index, 2);
        assert_eq!(request.prev_log_term, 1);
    }
}
