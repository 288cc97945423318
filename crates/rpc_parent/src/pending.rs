use std::{collections::HashMap, sync::Mutex};

use tokio::sync::{oneshot, Notify};

use rpc_protocol::Value;

use crate::error::RpcError;

/// What a pending call ultimately settles with: the decoded return value,
/// or any classified/remote error (spec.md §3 "Lifecycle of a pending
/// call").
pub type CallOutcome = Result<Value, RpcError>;

/// Parent-side registry of in-flight calls, keyed by the wire correlation
/// id of the *current attempt* (spec.md §3 "Pending-call registry").
///
/// A retry allocates a fresh id and a fresh entry; the old id is simply
/// never looked up again, which is what makes late/duplicate Responses to
/// an abandoned attempt silently drop (spec.md §8 invariant 7) without any
/// extra bookkeeping.
#[derive(Default)]
pub struct PendingCallRegistry {
    entries: Mutex<HashMap<u64, oneshot::Sender<CallOutcome>>>,
    empty: Notify,
}

impl PendingCallRegistry {
    pub fn insert(&self, id: u64) -> oneshot::Receiver<CallOutcome> {
        let (tx, rx) = oneshot::channel();
        self.entries.lock().expect("pending registry poisoned").insert(id, tx);
        rx
    }

    /// Removes an entry without sending anything into it (used when an
    /// attempt times out and is about to retry, or when encode/write
    /// failed before any frame reached the transport).
    pub fn remove(&self, id: u64) {
        let mut guard = self.entries.lock().expect("pending registry poisoned");
        guard.remove(&id);
        if guard.is_empty() {
            drop(guard);
            self.empty.notify_waiters();
        }
    }

    /// Settles a pending entry with its Response outcome. Returns `false`
    /// if no entry matched `id` — either it was never ours, or it already
    /// timed out/was retried away.
    pub fn resolve(&self, id: u64, outcome: CallOutcome) -> bool {
        let sender = {
            let mut guard = self.entries.lock().expect("pending registry poisoned");
            let sender = guard.remove(&id);
            if guard.is_empty() {
                drop(guard);
                self.empty.notify_waiters();
            }
            sender
        };
        match sender {
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Rejects every outstanding entry with `outcome` and clears the
    /// registry (spec.md §4.6 crash sweep, §8 invariant 1's "crash sweep"
    /// settlement path).
    pub fn drain_with(&self, mut outcome: impl FnMut() -> CallOutcome) {
        let drained: Vec<_> = {
            let mut guard = self.entries.lock().expect("pending registry poisoned");
            guard.drain().collect()
        };
        for (_, tx) in drained {
            let _ = tx.send(outcome());
        }
        self.empty.notify_waiters();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().expect("pending registry poisoned").is_empty()
    }

    /// Waits until no calls are outstanding, used by graceful shutdown
    /// (spec.md §4.6) to let in-flight Requests settle before closing the
    /// transport.
    pub async fn wait_empty(&self) {
        loop {
            if self.is_empty() {
                return;
            }
            let notified = self.empty.notified();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_settles_the_matching_entry() {
        let registry = PendingCallRegistry::default();
        let rx = registry.insert(1);
        assert!(registry.resolve(1, Ok(Value::Int(42))));
        assert_eq!(rx.await.unwrap().unwrap(), Value::Int(42));
    }

    #[tokio::test]
    async fn resolve_on_unknown_id_is_a_noop() {
        let registry = PendingCallRegistry::default();
        assert!(!registry.resolve(99, Ok(Value::Null)));
    }

    #[tokio::test]
    async fn late_response_after_remove_is_dropped() {
        let registry = PendingCallRegistry::default();
        let _rx = registry.insert(1);
        registry.remove(1);
        assert!(!registry.resolve(1, Ok(Value::Null)));
    }

    #[tokio::test]
    async fn drain_with_rejects_every_outstanding_entry() {
        let registry = PendingCallRegistry::default();
        let rx_a = registry.insert(1);
        let rx_b = registry.insert(2);
        registry.drain_with(|| Err(RpcError::Terminated));
        assert!(rx_a.await.unwrap().is_err());
        assert!(rx_b.await.unwrap().is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn wait_empty_resolves_once_drained() {
        let registry = std::sync::Arc::new(PendingCallRegistry::default());
        let _rx = registry.insert(1);
        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait_empty().await })
        };
        tokio::task::yield_now().await;
        registry.resolve(1, Ok(Value::Null));
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("wait_empty should resolve")
            .unwrap();
    }
}
