//! Correlation table for in-flight coordinator requests.
//!
//! Every request frame carries an `i32` correlation id; the coordinator
//! echoes the id back on the response frame. Zero is reserved for pushes,
//! so allocated ids skip it. Waiters park on a [`oneshot`] channel keyed
//! by id and are woken exactly once when the matching response arrives.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};

use chatforge_protocol::CenterResponse;
use tokio::sync::oneshot;

/// Once the table grows past this, registration sweeps out entries whose
/// waiter has already given up. Keeps abandoned slots from piling up on a
/// link that answers slowly.
const PURGE_THRESHOLD: usize = 1024;

/// Maps correlation ids to the waiters parked on them.
#[derive(Debug, Default)]
pub(crate) struct PendingRequests {
    next_id: AtomicI32,
    entries: Mutex<HashMap<i32, oneshot::Sender<CenterResponse>>>,
}

impl PendingRequests {
    /// Hands out the next correlation id, skipping the push sentinel `0`.
    pub(crate) fn allocate_id(&self) -> i32 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if id != 0 {
                return id;
            }
        }
    }

    /// Parks a waiter under `id`.
    pub(crate) fn register(&self, id: i32, tx: oneshot::Sender<CenterResponse>) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= PURGE_THRESHOLD {
            entries.retain(|_, tx| !tx.is_closed());
        }
        entries.insert(id, tx);
    }

    /// Delivers a response to the waiter parked under `id`, if any.
    ///
    /// Each id completes at most once; the entry is removed before the
    /// send so a duplicate response finds nothing.
    pub(crate) fn complete(&self, id: i32, response: CenterResponse) {
        let waiter = self.entries.lock().unwrap().remove(&id);
        match waiter {
            Some(tx) => {
                if tx.send(response).is_err() {
                    tracing::debug!(correlation_id = id, "response waiter already gone");
                }
            }
            None => {
                tracing::debug!(correlation_id = id, "response matched no pending request");
            }
        }
    }

    /// Drops the waiter parked under `id` without delivering anything.
    pub(crate) fn discard(&self, id: i32) {
        self.entries.lock().unwrap().remove(&id);
    }

    /// Drops every parked waiter. Their receivers resolve with a channel
    /// error, which callers surface as a lost link.
    pub(crate) fn fail_all(&self) {
        self.entries.lock().unwrap().clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

// ===== Tests =====

#[cfg(test)]
mod tests {
    use super::*;
    use chatforge_protocol::CenterResponse;

    fn response(code: i32) -> CenterResponse {
        CenterResponse {
            code,
            message: String::new(),
            data: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_allocate_id_never_returns_zero() {
        let pending = PendingRequests::default();
        pending.next_id.store(-3, Ordering::Relaxed);
        let ids: Vec<i32> = (0..6).map(|_| pending.allocate_id()).collect();
        assert!(!ids.contains(&0));
        assert_eq!(ids, vec![-2, -1, 1, 2, 3, 4]);
    }

    #[test]
    fn test_allocate_id_skips_zero_across_wraparound() {
        let pending = PendingRequests::default();
        pending.next_id.store(i32::MAX - 1, Ordering::Relaxed);
        let ids: Vec<i32> = (0..4).map(|_| pending.allocate_id()).collect();
        assert_eq!(ids, vec![i32::MAX, i32::MIN, i32::MIN + 1, i32::MIN + 2]);
    }

    #[tokio::test]
    async fn test_complete_wakes_the_registered_waiter() {
        let pending = PendingRequests::default();
        let (tx, rx) = oneshot::channel();
        pending.register(7, tx);

        pending.complete(7, response(0));

        let got = rx.await.unwrap();
        assert_eq!(got.code, 0);
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn test_complete_delivers_each_id_at_most_once() {
        let pending = PendingRequests::default();
        let (tx, rx) = oneshot::channel();
        pending.register(7, tx);

        pending.complete(7, response(0));
        // A duplicate response for the same id must find nothing.
        pending.complete(7, response(99));

        assert_eq!(rx.await.unwrap().code, 0);
    }

    #[test]
    fn test_complete_with_unknown_id_is_a_no_op() {
        let pending = PendingRequests::default();
        pending.complete(42, response(0));
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn test_discard_drops_the_waiter() {
        let pending = PendingRequests::default();
        let (tx, rx) = oneshot::channel();
        pending.register(9, tx);

        pending.discard(9);

        assert!(rx.await.is_err());
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn test_fail_all_resolves_every_waiter_with_an_error() {
        let pending = PendingRequests::default();
        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();
        pending.register(1, tx_a);
        pending.register(2, tx_b);

        pending.fail_all();

        assert!(rx_a.await.is_err());
        assert!(rx_b.await.is_err());
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn test_register_purges_abandoned_entries_past_threshold() {
        let pending = PendingRequests::default();
        // Register-and-abandon far more waiters than the threshold; the
        // sweep on registration must keep the table bounded.
        for _ in 0..PURGE_THRESHOLD * 2 {
            let id = pending.allocate_id();
            let (tx, rx) = oneshot::channel();
            drop(rx);
            pending.register(id, tx);
        }
        assert!(pending.len() <= PURGE_THRESHOLD + 1);
    }

    #[test]
    fn test_register_keeps_live_entries_when_purging() {
        let pending = PendingRequests::default();
        let (tx, mut rx) = oneshot::channel();
        pending.register(-1, tx);

        for _ in 0..PURGE_THRESHOLD + 10 {
            let id = pending.allocate_id();
            let (tx, rx) = oneshot::channel();
            drop(rx);
            pending.register(id, tx);
        }

        // The live waiter survived every sweep and still gets its answer.
        pending.complete(-1, response(0));
        assert_eq!(rx.try_recv().unwrap().code, 0);
    }
}
