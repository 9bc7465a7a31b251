//! Outstanding fleet-query bookkeeping.
//!
//! Each `clients` call registers a pending query under a fresh MUID; the
//! bus dispatcher routes clients-response frames here by the MUID decoded
//! from the channel. The table replaces per-call bus listeners: one
//! dispatcher, many queries.

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;

use crate::protocol::Sid;

struct PendingQuery {
    /// Peer responses still expected.
    remaining: usize,
    /// Accumulated SIDs, seeded with the requester's local ones.
    /// Duplicates across peers are preserved.
    sids: Vec<Sid>,
    /// Fires once, when the last expected response arrives.
    done: Option<oneshot::Sender<Vec<Sid>>>,
}

/// Process-wide table of outstanding clients queries, keyed by MUID.
#[derive(Default)]
pub(crate) struct QueryTable {
    queries: DashMap<String, PendingQuery>,
}

impl QueryTable {
    /// Register a query expecting `remaining` peer responses. `seed` holds
    /// the requester's own local SIDs.
    pub(crate) fn insert(
        &self,
        muid: &str,
        remaining: usize,
        seed: Vec<Sid>,
        done: oneshot::Sender<Vec<Sid>>,
    ) {
        self.queries.insert(
            muid.to_string(),
            PendingQuery {
                remaining,
                sids: seed,
                done: Some(done),
            },
        );
    }

    /// Route one peer response into the query. Completes the query when the
    /// expected count reaches zero. Returns false when no query with this
    /// MUID is outstanding (late or foreign response).
    pub(crate) fn push_response(&self, muid: &str, sids: Vec<Sid>) -> bool {
        let Some(mut query) = self.queries.get_mut(muid) else {
            debug!(muid, "response for unknown query dropped");
            return false;
        };
        query.sids.extend(sids);
        query.remaining = query.remaining.saturating_sub(1);
        if query.remaining == 0 {
            if let Some(done) = query.done.take() {
                let collected = std::mem::take(&mut query.sids);
                let _ = done.send(collected);
            }
        }
        true
    }

    /// Remove a query, returning whatever it accumulated. Called by the
    /// requester on both the completion and the deadline path; afterwards
    /// late responses fall into the unknown-MUID case above.
    pub(crate) fn take(&self, muid: &str) -> Option<Vec<Sid>> {
        self.queries.remove(muid).map(|(_, query)| query.sids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sids(names: &[&str]) -> Vec<Sid> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn completes_after_the_expected_number_of_responses() {
        let table = QueryTable::default();
        let (done_tx, done_rx) = oneshot::channel();
        table.insert("q1", 2, sids(&["A1"]), done_tx);

        assert!(table.push_response("q1", sids(&["B1", "B2"])));
        assert!(table.push_response("q1", sids(&["C1"])));

        let mut collected = done_rx.await.unwrap();
        collected.sort();
        assert_eq!(collected, sids(&["A1", "B1", "B2", "C1"]));
    }

    #[tokio::test]
    async fn preserves_duplicate_sids_across_peers() {
        let table = QueryTable::default();
        let (done_tx, done_rx) = oneshot::channel();
        table.insert("q1", 2, Vec::new(), done_tx);

        table.push_response("q1", sids(&["X"]));
        table.push_response("q1", sids(&["X"]));

        assert_eq!(done_rx.await.unwrap(), sids(&["X", "X"]));
    }

    #[test]
    fn unknown_muid_is_reported() {
        let table = QueryTable::default();
        assert!(!table.push_response("nope", sids(&["A1"])));
    }

    #[tokio::test]
    async fn take_returns_the_partial_accumulation() {
        let table = QueryTable::default();
        let (done_tx, _done_rx) = oneshot::channel();
        table.insert("q1", 3, sids(&["A1"]), done_tx);
        table.push_response("q1", sids(&["B1"]));

        let mut collected = table.take("q1").unwrap();
        collected.sort();
        assert_eq!(collected, sids(&["A1", "B1"]));

        // Gone: a late response no longer routes.
        assert!(!table.push_response("q1", sids(&["C1"])));
        assert!(table.take("q1").is_none());
    }

    #[tokio::test]
    async fn completion_fires_exactly_once() {
        let table = QueryTable::default();
        let (done_tx, done_rx) = oneshot::channel();
        table.insert("q1", 1, Vec::new(), done_tx);

        table.push_response("q1", sids(&["B1"]));
        // An extra response before the requester removes the entry must not
        // panic or re-fire completion.
        table.push_response("q1", sids(&["B2"]));

        assert_eq!(done_rx.await.unwrap(), sids(&["B1"]));
    }
}
