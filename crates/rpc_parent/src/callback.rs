use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

use rpc_protocol::Value;

/// A caller-supplied function passed as a method argument (spec.md §4.4
/// Call pipeline, §GLOSSARY "Callback reference").
///
/// Rust has no runtime reflection to detect "this argument happens to be
/// a function" while walking an arbitrary value tree, so the membrane's
/// implicit detection is realized explicitly: a caller wraps a closure in
/// [`crate::proxy::CallArg::Callback`] and it is registered before the
/// Request is ever encoded (`SPEC_FULL.md` AMBIENT translation notes).
pub type CallbackFn =
    std::sync::Arc<dyn Fn(Vec<Value>) -> BoxFuture<Result<Value, Value>> + Send + Sync>;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Parent-side callback registry (spec.md §3 "Callback registry").
///
/// Entries are keyed by a registry-wide callback id but owned by a
/// call-sequence number distinct from the wire correlation id, so that a
/// retried Request — which allocates a *new* correlation id each attempt —
/// still resolves to the *same* callback ids (spec.md §4.4 step 5: "A
/// retried Request reuses the registered callback IDs").
#[derive(Default)]
pub struct CallbackRegistry {
    next_id: AtomicU64,
    table: Mutex<HashMap<u64, CallbackFn>>,
    owners: Mutex<HashMap<u64, Vec<u64>>>,
}

impl CallbackRegistry {
    pub fn register(&self, call_seq: u64, f: CallbackFn) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.table.lock().expect("callback table poisoned").insert(id, f);
        self.owners
            .lock()
            .expect("callback owners poisoned")
            .entry(call_seq)
            .or_default()
            .push(id);
        id
    }

    pub fn lookup(&self, id: u64) -> Option<CallbackFn> {
        self.table.lock().expect("callback table poisoned").get(&id).cloned()
    }

    /// Reclaims every callback id registered for `call_seq` once that
    /// call settles, terminally (spec.md §3 "Lifetime: until the owning
    /// call settles").
    pub fn reclaim(&self, call_seq: u64) {
        let ids = self
            .owners
            .lock()
            .expect("callback owners poisoned")
            .remove(&call_seq)
            .unwrap_or_default();
        if ids.is_empty() {
            return;
        }
        let mut table = self.table.lock().expect("callback table poisoned");
        for id in ids {
            table.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_callback() -> CallbackFn {
        std::sync::Arc::new(|args: Vec<Value>| {
            Box::pin(async move { Ok(args.into_iter().next().unwrap_or(Value::Null)) })
        })
    }

    #[test]
    fn register_and_lookup_round_trip() {
        let registry = CallbackRegistry::default();
        let id = registry.register(1, echo_callback());
        assert!(registry.lookup(id).is_some());
    }

    #[test]
    fn reclaim_removes_every_id_owned_by_the_call() {
        let registry = CallbackRegistry::default();
        let a = registry.register(1, echo_callback());
        let b = registry.register(1, echo_callback());
        let other = registry.register(2, echo_callback());
        registry.reclaim(1);
        assert!(registry.lookup(a).is_none());
        assert!(registry.lookup(b).is_none());
        assert!(registry.lookup(other).is_some());
    }

    #[test]
    fn unknown_id_returns_none() {
        let registry = CallbackRegistry::default();
        assert!(registry.lookup(404).is_none());
    }
}
