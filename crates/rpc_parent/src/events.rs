use std::{
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use tracing::warn;

use rpc_protocol::Value;

pub type Listener = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// An id returned by [`EventBus::on`]/[`EventBus::once`], usable with
/// [`EventBus::off`] to remove exactly that registration.
pub type ListenerId = u64;

struct Registration {
    id: ListenerId,
    listener: Listener,
    once: bool,
}

/// Parent-side fan-out for `Event` envelopes (spec.md §4.5 "Events"). A
/// worker target with no event stream simply never emits any; this bus is
/// always present but stays empty in that case (`supports_events` on the
/// `Ready` envelope tells a caller whether to expect anything at all).
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    listeners: Mutex<std::collections::HashMap<String, Vec<Registration>>>,
}

impl EventBus {
    pub fn on(&self, event: impl Into<String>, listener: Listener) -> ListenerId {
        self.register(event.into(), listener, false)
    }

    pub fn once(&self, event: impl Into<String>, listener: Listener) -> ListenerId {
        self.register(event.into(), listener, true)
    }

    fn register(&self, event: String, listener: Listener, once: bool) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .lock()
            .expect("event bus poisoned")
            .entry(event)
            .or_default()
            .push(Registration { id, listener, once });
        id
    }

    /// Removes exactly the registration identified by `id`, if it still
    /// exists. No-op otherwise (spec.md §8: `off` on an id that has
    /// already fired `once` or was already removed does nothing).
    pub fn off(&self, id: ListenerId) {
        let mut guard = self.listeners.lock().expect("event bus poisoned");
        for registrations in guard.values_mut() {
            registrations.retain(|r| r.id != id);
        }
        guard.retain(|_, v| !v.is_empty());
    }

    pub fn remove_all_listeners(&self, event: Option<&str>) {
        let mut guard = self.listeners.lock().expect("event bus poisoned");
        match event {
            Some(event) => {
                guard.remove(event);
            }
            None => guard.clear(),
        }
    }

    /// Dispatches `args` to every listener registered for `event`, in
    /// registration order, then drops every `once` listener that fired.
    /// A listener panic is caught and logged rather than propagated — one
    /// misbehaving listener must not take down the reactor loop that
    /// drives every other pending call and event (spec.md §5 concurrency
    /// model: the engine keeps running independent of target/listener
    /// misbehavior).
    pub fn dispatch(&self, event: &str, args: &[Value]) {
        let to_run: Vec<Listener> = {
            let guard = self.listeners.lock().expect("event bus poisoned");
            match guard.get(event) {
                Some(registrations) => registrations.iter().map(|r| r.listener.clone()).collect(),
                None => return,
            }
        };
        for listener in &to_run {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| listener(args)));
            if result.is_err() {
                warn!("listener for event `{event}` panicked");
            }
        }
        let mut guard = self.listeners.lock().expect("event bus poisoned");
        if let Some(registrations) = guard.get_mut(event) {
            registrations.retain(|r| !r.once);
        }
        guard.retain(|_, v| !v.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn on_listener_fires_every_dispatch() {
        let bus = EventBus::default();
        let count = Arc::new(AtomicUsize::new(0));
        let counted = count.clone();
        bus.on("tick", Arc::new(move |_| { counted.fetch_add(1, Ordering::SeqCst); }));
        bus.dispatch("tick", &[]);
        bus.dispatch("tick", &[]);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn once_listener_fires_exactly_once() {
        let bus = EventBus::default();
        let count = Arc::new(AtomicUsize::new(0));
        let counted = count.clone();
        bus.once("tick", Arc::new(move |_| { counted.fetch_add(1, Ordering::SeqCst); }));
        bus.dispatch("tick", &[]);
        bus.dispatch("tick", &[]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn off_removes_only_the_named_registration() {
        let bus = EventBus::default();
        let count = Arc::new(AtomicUsize::new(0));
        let counted = count.clone();
        let id = bus.on("tick", Arc::new(move |_| { counted.fetch_add(1, Ordering::SeqCst); }));
        let other_count = Arc::new(AtomicUsize::new(0));
        let other_counted = other_count.clone();
        bus.on("tick", Arc::new(move |_| { other_counted.fetch_add(1, Ordering::SeqCst); }));
        bus.off(id);
        bus.dispatch("tick", &[]);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(other_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_on_unknown_event_is_a_noop() {
        let bus = EventBus::default();
        bus.dispatch("nothing-registered", &[]);
    }

    #[test]
    fn panicking_listener_does_not_stop_the_rest() {
        let bus = EventBus::default();
        bus.on("tick", Arc::new(|_| panic!("boom")));
        let count = Arc::new(AtomicUsize::new(0));
        let counted = count.clone();
        bus.on("tick", Arc::new(move |_| { counted.fetch_add(1, Ordering::SeqCst); }));
        bus.dispatch("tick", &[]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_all_listeners_for_one_event_leaves_others_intact() {
        let bus = EventBus::default();
        bus.on("a", Arc::new(|_| {}));
        bus.on("b", Arc::new(|_| {}));
        bus.remove_all_listeners(Some("a"));
        assert!(bus.listeners.lock().unwrap().get("a").is_none());
        assert!(bus.listeners.lock().unwrap().get("b").is_some());
    }
}
