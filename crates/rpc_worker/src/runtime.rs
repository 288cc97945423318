use std::{sync::Arc, time::Duration};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error};

use rpc_protocol::{
    codec_for, decode_envelope, encode_envelope, Codec, Envelope, CallResult, DEFAULT_MAX_FRAME_BYTES,
};
use rpc_transport::Transport;

use crate::callback::CallbackChannel;
use crate::error::WorkerError;
use crate::target::RpcTarget;

const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Tunables for [`WorkerRuntime::run_with`] (`SPEC_FULL.md` AMBIENT —
/// configuration, worker side).
#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    pub max_frame_bytes: u32,
    pub callback_timeout: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
        }
    }
}

/// Drives the worker side of the protocol: the spawn handshake, then the
/// request/callback-result dispatch loop, until the transport (the
/// process's own stdio) closes (spec.md §4.6, §5).
pub struct WorkerRuntime;

impl WorkerRuntime {
    pub async fn run<T: RpcTarget>() -> Result<(), WorkerError> {
        Self::run_with::<T>(WorkerOptions::default()).await
    }

    pub async fn run_with<T: RpcTarget>(options: WorkerOptions) -> Result<(), WorkerError> {
        let transport = Arc::new(Transport::from_stdio(options.max_frame_bytes));

        let init_bytes = transport
            .recv()
            .await
            .ok_or_else(|| WorkerError::Protocol("transport closed before init".to_string()))?;
        // The handshake's very first frame has no negotiated codec yet;
        // both codecs decode an `init` envelope identically since its
        // only job is to announce which one the rest of the session uses.
        let handshake_codec = codec_for(rpc_protocol::SerializationMode::Rich);
        let init = match decode_envelope(handshake_codec.as_ref(), &init_bytes)
            .or_else(|_| decode_envelope(codec_for(rpc_protocol::SerializationMode::Portable).as_ref(), &init_bytes))?
        {
            Envelope::Init { serialization, args } => (serialization, args),
            other => {
                return Err(WorkerError::Protocol(format!(
                    "expected `init`, got `{}`",
                    other.kind()
                )))
            }
        };
        let (serialization, init_args) = init;
        let codec: Arc<dyn Codec> = Arc::from(codec_for(serialization));

        let target = T::construct(init_args)?;

        let callbacks = Arc::new(CallbackChannel::new(
            transport.clone(),
            codec.clone(),
            options.callback_timeout,
        ));

        let methods = T::methods();
        let initial_properties = target.properties();
        let ready = Envelope::Ready {
            codec: serialization,
            supports_handles: false,
            supports_events: target.supports_events(),
            methods: methods.clone(),
            properties: initial_properties.clone(),
        };
        let bytes = encode_envelope(codec.as_ref(), &ready)?;
        transport.write(bytes)?;

        let target = Arc::new(AsyncMutex::new(target));
        // Tracks the diff baseline independently of the target mutex so the
        // frame-reader loop below never has to wait on a dispatched call's
        // lock guard (see the `last_properties` note at the dispatch site).
        let last_properties = Arc::new(std::sync::Mutex::new(initial_properties));

        loop {
            let bytes = match transport.recv().await {
                Some(bytes) => bytes,
                None => break,
            };
            let envelope = match decode_envelope(codec.as_ref(), &bytes) {
                Ok(envelope) => envelope,
                Err(err) => {
                    // A malformed frame is a fatal `ProtocolError` (spec.md
                    // §7 "Fatal concerns that terminate the transport"),
                    // not a recoverable per-message failure.
                    return Err(WorkerError::Protocol(format!(
                        "malformed inbound frame: {err}"
                    )));
                }
            };
            match envelope {
                Envelope::Request { id, method, args } => {
                    if !methods.iter().any(|m| m == &method) {
                        let response = Envelope::Response {
                            id,
                            result: CallResult::Err(rpc_protocol::classified_error(
                                rpc_protocol::ClassifiedKind::UnknownMethod,
                                format!("unknown method `{method}`"),
                            )),
                        };
                        let bytes = encode_envelope(codec.as_ref(), &response)?;
                        transport.write(bytes)?;
                        continue;
                    }

                    let transport = transport.clone();
                    let codec = codec.clone();
                    let callbacks = callbacks.clone();
                    let target = target.clone();
                    let last_properties = last_properties.clone();
                    tokio::spawn(async move {
                        // The target mutex is held for the full duration of
                        // `call`, which may suspend awaiting a `CallbackResult`
                        // the parent can only deliver once the reader loop
                        // reads the next frame (spec.md §4.4 CallbackInvoke).
                        // That loop must never try to acquire this same lock,
                        // so the diff baseline lives in its own mutex, read
                        // right after this task wins the target lock (so its
                        // ordering matches the order calls actually ran in)
                        // and written back once the call settles.
                        let (prev, result, new_properties, events) = {
                            let mut guard = target.lock().await;
                            let prev = last_properties
                                .lock()
                                .expect("property baseline poisoned")
                                .clone();
                            let result = guard.call(&method, args, &callbacks).await;
                            let new_properties = guard.properties();
                            let events = guard.drain_events();
                            (prev, result, new_properties, events)
                        };
                        *last_properties.lock().expect("property baseline poisoned") =
                            new_properties.clone();

                        for (name, value) in diff_properties(&prev, &new_properties) {
                            let update = Envelope::PropertyUpdate { name, value };
                            if let Ok(bytes) = encode_envelope(codec.as_ref(), &update) {
                                let _ = transport.write(bytes);
                            }
                        }
                        for (event, args) in events {
                            let envelope = Envelope::Event { event, args };
                            if let Ok(bytes) = encode_envelope(codec.as_ref(), &envelope) {
                                let _ = transport.write(bytes);
                            }
                        }

                        let response = Envelope::Response {
                            id,
                            result: match result {
                                Ok(value) => CallResult::Ok(value),
                                Err(value) => CallResult::Err(value),
                            },
                        };
                        match encode_envelope(codec.as_ref(), &response) {
                            Ok(bytes) => {
                                let _ = transport.write(bytes);
                            }
                            Err(err) => error!("failed to encode response for `{method}`: {err}"),
                        }
                    });
                    // No lock is taken here: the frame-reader loop must stay
                    // free to read the next frame (a `CallbackResult` the
                    // in-flight call above may be waiting on) without ever
                    // contending with the target mutex held inside that task.
                }
                Envelope::CallbackResult { id, result } => {
                    let result = match result {
                        CallResult::Ok(value) => Ok(value),
                        CallResult::Err(value) => Err(value),
                    };
                    callbacks.resolve(id, result);
                }
                Envelope::Shutdown { mode } => {
                    debug!("received shutdown ({mode:?})");
                    break;
                }
                other => {
                    return Err(WorkerError::Protocol(format!(
                        "unexpected envelope kind `{}`",
                        other.kind()
                    )))
                }
            }
        }

        Ok(())
    }
}

fn diff_properties(
    before: &[(String, rpc_protocol::Value)],
    after: &[(String, rpc_protocol::Value)],
) -> Vec<(String, rpc_protocol::Value)> {
    after
        .iter()
        .filter(|(name, value)| {
            !before.iter().any(|(prev_name, prev_value)| prev_name == name && prev_value == value)
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpc_protocol::Value;

    #[test]
    fn diff_properties_reports_changed_and_new_entries() {
        let before = vec![("a".to_string(), Value::Int(1)), ("b".to_string(), Value::Int(2))];
        let after = vec![("a".to_string(), Value::Int(1)), ("b".to_string(), Value::Int(3)), ("c".to_string(), Value::Int(4))];
        let diff = diff_properties(&before, &after);
        assert_eq!(diff.len(), 2);
        assert!(diff.contains(&("b".to_string(), Value::Int(3))));
        assert!(diff.contains(&("c".to_string(), Value::Int(4))));
    }

    #[test]
    fn diff_properties_is_empty_when_nothing_changed() {
        let before = vec![("a".to_string(), Value::Int(1))];
        let after = before.clone();
        assert!(diff_properties(&before, &after).is_empty());
    }
}
