use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
    time::Duration,
};

use tokio::sync::oneshot;
use tracing::warn;

use rpc_protocol::{encode_envelope, Codec, Envelope, Value};
use rpc_transport::Transport;

/// Worker-side stub for invoking a callback the parent passed as an
/// argument (spec.md §3 "Callback registry", reverse direction). A
/// target's [`crate::RpcTarget::call`] implementation is handed one of
/// these and calls [`CallbackChannel::invoke`] to run the parent-side
/// closure, budgeted by its own timeout independent of the call's own
/// (`SPEC_FULL.md` AMBIENT — "callback-stub invocation with its own
/// timeout budget").
pub struct CallbackChannel {
    transport: std::sync::Arc<Transport>,
    codec: std::sync::Arc<dyn Codec>,
    waiters: Mutex<HashMap<u64, oneshot::Sender<Result<Value, Value>>>>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl CallbackChannel {
    pub(crate) fn new(
        transport: std::sync::Arc<Transport>,
        codec: std::sync::Arc<dyn Codec>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            codec,
            waiters: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            timeout,
        }
    }

    /// Invokes `callback_id` with `args`, returning whatever the parent's
    /// closure resolves or rejects with. Times out independently of the
    /// enclosing method call's own timeout budget.
    pub async fn invoke(&self, callback_id: u64, args: Vec<Value>) -> Result<Value, Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().expect("callback waiters poisoned").insert(id, tx);

        let envelope = Envelope::CallbackInvoke { id, callback_id, args };
        let bytes = match encode_envelope(self.codec.as_ref(), &envelope) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.waiters.lock().expect("callback waiters poisoned").remove(&id);
                return Err(Value::Str(format!("failed to encode callback invoke: {err}")));
            }
        };
        if let Err(err) = self.transport.write(bytes) {
            self.waiters.lock().expect("callback waiters poisoned").remove(&id);
            return Err(Value::Str(format!("failed to send callback invoke: {err}")));
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Value::Str("callback channel closed before responding".to_string())),
            Err(_) => {
                self.waiters.lock().expect("callback waiters poisoned").remove(&id);
                Err(Value::Str(format!("callback timed out after {:?}", self.timeout)))
            }
        }
    }

    /// Settles the waiter matching `id` with an inbound `CallbackResult`.
    /// A `None` match (already timed out, or an id we never allocated) is
    /// logged and dropped.
    pub(crate) fn resolve(&self, id: u64, result: Result<Value, Value>) {
        let sender = self.waiters.lock().expect("callback waiters poisoned").remove(&id);
        match sender {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => warn!("callback result for unknown or expired id {id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpc_protocol::codec_for;
    use tokio::io::duplex;

    fn test_transport() -> std::sync::Arc<Transport> {
        // CallbackChannel only needs `Transport::write`; wrap the worker
        // side of a duplex pair so writes have somewhere to go.
        let (_client, _server) = duplex(4096);
        std::sync::Arc::new(Transport::from_stdio(rpc_protocol::DEFAULT_MAX_FRAME_BYTES))
    }

    #[tokio::test]
    async fn resolve_settles_the_matching_waiter() {
        let channel = CallbackChannel::new(
            test_transport(),
            std::sync::Arc::from(codec_for(rpc_protocol::SerializationMode::Rich)),
            Duration::from_millis(50),
        );
        let (tx, rx) = oneshot::channel();
        channel.waiters.lock().unwrap().insert(1, tx);
        channel.resolve(1, Ok(Value::Int(9)));
        assert_eq!(rx.await.unwrap().unwrap(), Value::Int(9));
    }

    #[tokio::test]
    async fn resolve_on_unknown_id_does_not_panic() {
        let channel = CallbackChannel::new(
            test_transport(),
            std::sync::Arc::from(codec_for(rpc_protocol::SerializationMode::Rich)),
            Duration::from_millis(50),
        );
        channel.resolve(404, Ok(Value::Null));
    }
}
