use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use tokio::process::Command;
use tracing::{debug, warn};

use rpc_protocol::{codec_for, Codec, Envelope, CallResult, SerializationMode, ShutdownMode};
use rpc_transport::{ExitInfo, Transport};

use crate::{
    callback::{BoxFuture, CallbackFn, CallbackRegistry},
    config::SpawnOptions,
    error::RpcError,
    events::{EventBus, Listener, ListenerId},
    mirror::PropertyMirror,
    pending::PendingCallRegistry,
};

/// One call argument: a plain value, or a closure the worker may invoke
/// as a callback (spec.md §3 "Callback registry", §4.4). Rust cannot
/// detect "this nested value happens to be a function" while walking an
/// arbitrary arg tree the way the membrane does, so callbacks are only
/// representable at the top level of a call's argument list.
pub enum CallArg {
    Value(rpc_protocol::Value),
    Callback(CallbackFn),
}

impl From<rpc_protocol::Value> for CallArg {
    fn from(value: rpc_protocol::Value) -> Self {
        CallArg::Value(value)
    }
}

/// Information advertised once, in the `Ready` envelope (spec.md §4.3,
/// `SPEC_FULL.md` SUPPLEMENT — capability advertisement).
struct ReadyInfo {
    supports_handles: bool,
    supports_events: bool,
    methods: Vec<String>,
}

struct Inner {
    transport: Transport,
    codec: Box<dyn Codec>,
    pending: PendingCallRegistry,
    callbacks: CallbackRegistry,
    mirror: PropertyMirror,
    events: EventBus,
    ready: ReadyInfo,
    next_id: AtomicU64,
    next_call_seq: AtomicU64,
    terminated: AtomicBool,
    timeout: std::time::Duration,
    retries: u32,
    shutdown_timeout: std::time::Duration,
}

/// The parent-side handle to a spawned worker (spec.md §3 "Proxy handle").
/// Cloning shares the same underlying worker; the last clone dropped does
/// not terminate the worker — call [`Proxy::terminate`] explicitly.
#[derive(Clone)]
pub struct Proxy {
    inner: Arc<Inner>,
}

impl Proxy {
    /// Spawns the worker process, performs the `Init`/`Ready` handshake,
    /// and starts the background reactor that drives every inbound
    /// envelope for the rest of this proxy's life (spec.md §4.6 spawn
    /// handshake).
    pub async fn spawn(options: SpawnOptions) -> Result<Self, RpcError> {
        let mut command = Command::new(options.command());
        command.args(options.command_args());
        for (key, value) in options.env_vars() {
            command.env(key, value);
        }
        if let Some(cwd) = options.cwd_path() {
            command.current_dir(cwd);
        }

        let transport = Transport::spawn_child(command, options.max_frame_bytes_value()).await?;
        let codec = codec_for(options.serialization_mode());

        let init = Envelope::Init {
            serialization: options.serialization_mode(),
            args: options.init_args_value().to_vec(),
        };
        let bytes = rpc_protocol::encode_envelope(codec.as_ref(), &init)?;
        transport.write(bytes)?;

        let ready = match tokio::time::timeout(options.init_timeout_value(), transport.recv()).await {
            Ok(Some(bytes)) => match rpc_protocol::decode_envelope(codec.as_ref(), &bytes)? {
                Envelope::Ready {
                    supports_handles,
                    supports_events,
                    methods,
                    properties,
                    ..
                } => (
                    ReadyInfo {
                        supports_handles,
                        supports_events,
                        methods,
                    },
                    properties,
                ),
                other => {
                    return Err(RpcError::Protocol(format!(
                        "expected `ready`, got `{}`",
                        other.kind()
                    )))
                }
            },
            Ok(None) => {
                let exit = transport.closed().await.unwrap_or_default();
                return Err(RpcError::WorkerCrashed { exit });
            }
            Err(_) => return Err(RpcError::Initialization(options.init_timeout_value())),
        };
        let (ready_info, properties) = ready;

        let inner = Arc::new(Inner {
            transport,
            codec,
            pending: PendingCallRegistry::default(),
            callbacks: CallbackRegistry::default(),
            mirror: PropertyMirror::seed(properties),
            events: EventBus::default(),
            ready: ready_info,
            next_id: AtomicU64::new(1),
            next_call_seq: AtomicU64::new(1),
            terminated: AtomicBool::new(false),
            timeout: options.timeout_value(),
            retries: options.retries_value(),
            shutdown_timeout: options.shutdown_timeout_value(),
        });

        tokio::spawn(reactor(inner.clone()));

        Ok(Self { inner })
    }

    /// Invokes a method on the worker target (spec.md §4.4 call pipeline):
    /// encode, send, await the matching `Response` within the per-call
    /// timeout, retrying up to the configured budget on timeout.
    pub async fn call(&self, method: &str, args: Vec<CallArg>) -> Result<rpc_protocol::Value, RpcError> {
        if self.inner.terminated.load(Ordering::SeqCst) {
            return Err(RpcError::Terminated);
        }

        let call_seq = self.inner.next_call_seq.fetch_add(1, Ordering::SeqCst);
        let values: Vec<rpc_protocol::Value> = args
            .into_iter()
            .map(|arg| match arg {
                CallArg::Value(v) => v,
                CallArg::Callback(f) => {
                    let id = self.inner.callbacks.register(call_seq, f);
                    rpc_protocol::Value::Callback(rpc_protocol::CallbackRef { id })
                }
            })
            .collect();

        let attempts = self.inner.retries + 1;
        for attempt in 0..attempts {
            let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
            let rx = self.inner.pending.insert(id);

            let request = Envelope::Request {
                id,
                method: method.to_string(),
                args: values.clone(),
            };
            let bytes = match rpc_protocol::encode_envelope(self.inner.codec.as_ref(), &request) {
                Ok(bytes) => bytes,
                Err(err) => {
                    self.inner.pending.remove(id);
                    self.inner.callbacks.reclaim(call_seq);
                    return Err(RpcError::Serialization(err));
                }
            };
            if let Err(err) = self.inner.transport.write(bytes) {
                self.inner.pending.remove(id);
                self.inner.callbacks.reclaim(call_seq);
                return Err(err.into());
            }

            match tokio::time::timeout(self.inner.timeout, rx).await {
                Ok(Ok(outcome)) => {
                    self.inner.callbacks.reclaim(call_seq);
                    return outcome;
                }
                Ok(Err(_)) => {
                    // Sender dropped without resolving; treat like a crash sweep.
                    self.inner.callbacks.reclaim(call_seq);
                    return Err(RpcError::Terminated);
                }
                Err(_) => {
                    debug!("call to `{method}` timed out on attempt {attempt}");
                    self.inner.pending.remove(id);
                    continue;
                }
            }
        }
        self.inner.callbacks.reclaim(call_seq);
        Err(RpcError::Timeout {
            method: method.to_string(),
            timeout_ms: self.inner.timeout.as_millis() as u64,
        })
    }

    pub fn property(&self, name: &str) -> Option<rpc_protocol::Value> {
        self.inner.mirror.get(name)
    }

    pub fn properties(&self) -> Vec<(String, rpc_protocol::Value)> {
        self.inner.mirror.snapshot()
    }

    pub fn on(&self, event: impl Into<String>, listener: Listener) -> ListenerId {
        self.inner.events.on(event, listener)
    }

    pub fn once(&self, event: impl Into<String>, listener: Listener) -> ListenerId {
        self.inner.events.once(event, listener)
    }

    pub fn off(&self, id: ListenerId) {
        self.inner.events.off(id)
    }

    pub fn remove_all_listeners(&self, event: Option<&str>) {
        self.inner.events.remove_all_listeners(event)
    }

    /// Terminates the worker (spec.md §4.6). Graceful mode lets
    /// in-flight calls settle (up to the configured shutdown timeout)
    /// before sending `Shutdown` and waiting for the process to exit;
    /// immediate mode sends `Shutdown` and escalates to a hard kill on
    /// the same timeout. Subsequent [`Proxy::call`]s fail with
    /// [`RpcError::Terminated`] (spec.md §8 invariant 6).
    pub async fn terminate(&self, mode: ShutdownMode) -> Result<(), RpcError> {
        if self.inner.terminated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if matches!(mode, ShutdownMode::Graceful) {
            let _ = tokio::time::timeout(self.inner.shutdown_timeout, self.inner.pending.wait_empty()).await;
        }

        let bytes = rpc_protocol::encode_envelope(self.inner.codec.as_ref(), &Envelope::Shutdown { mode })?;
        let _ = self.inner.transport.write(bytes);

        let exited = tokio::time::timeout(self.inner.shutdown_timeout, self.inner.transport.closed()).await;
        if exited.is_err() {
            warn!("worker did not exit within shutdown timeout, killing");
            self.inner.transport.kill()?;
        }

        self.inner.pending.drain_with(|| Err(RpcError::Terminated));
        Ok(())
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.transport.pid()
    }

    pub fn serialization_mode(&self) -> SerializationMode {
        self.inner.codec.mode()
    }

    pub fn is_handle_supported(&self) -> bool {
        self.inner.ready.supports_handles
    }

    pub fn supports_events(&self) -> bool {
        self.inner.ready.supports_events
    }

    pub fn exposed_methods(&self) -> &[String] {
        &self.inner.ready.methods
    }
}

/// Drives every inbound envelope for the lifetime of a proxy: settles
/// pending calls, applies property updates, fans out events, and services
/// callback invocations. Runs until the transport closes, at which point
/// every still-outstanding call is rejected with `WorkerCrashedError`
/// (spec.md §4.6 crash sweep, §8 invariant 1).
async fn reactor(inner: Arc<Inner>) {
    // A malformed frame or an envelope kind the parent should never receive
    // desynchronizes trust in the rest of the stream; spec.md §7 treats
    // this as a fatal `ProtocolError` that terminates the transport and
    // rejects every pending call, distinct from the crash-sweep path taken
    // when the worker simply exits (spec.md §4.6, §7 "Fatal concerns").
    let mut protocol_violation: Option<String> = None;

    loop {
        let bytes = match inner.transport.recv().await {
            Some(bytes) => bytes,
            None => break,
        };
        let envelope = match rpc_protocol::decode_envelope(inner.codec.as_ref(), &bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("protocol violation, terminating transport: {err}");
                protocol_violation = Some(err.to_string());
                break;
            }
        };
        match envelope {
            Envelope::Response { id, result } => {
                let outcome = match result {
                    CallResult::Ok(value) => Ok(value),
                    CallResult::Err(value) => Err(classify_remote_error(value)),
                };
                inner.pending.resolve(id, outcome);
            }
            Envelope::PropertyUpdate { name, value } => {
                inner.mirror.update(name, value);
            }
            Envelope::Event { event, args } => {
                inner.events.dispatch(&event, &args);
            }
            Envelope::CallbackInvoke { id, callback_id, args } => {
                let inner = inner.clone();
                tokio::spawn(async move {
                    service_callback_invoke(inner, id, callback_id, args).await;
                });
            }
            other => {
                warn!(
                    "parent reactor received unexpected envelope `{}`, terminating transport",
                    other.kind()
                );
                protocol_violation = Some(format!("unexpected envelope kind `{}`", other.kind()));
                break;
            }
        }
    }

    if let Some(reason) = protocol_violation {
        inner.terminated.store(true, Ordering::SeqCst);
        let _ = inner.transport.kill();
        inner.pending.drain_with(|| Err(RpcError::Protocol(reason.clone())));
        return;
    }

    let exit: Option<ExitInfo> = inner.transport.closed().await;
    let exit = exit.unwrap_or_default();
    inner.pending.drain_with(|| Err(RpcError::WorkerCrashed { exit }));
}

/// Reconstructs a classified dispatcher-generated error (spec.md §7
/// `UnknownMethodError`/`ProtocolError`) from the `Value` a `Response`
/// carried, falling back to the opaque `RpcError::Remote` for anything the
/// worker's own target method threw — those are propagated, not classified
/// (spec.md §7).
fn classify_remote_error(value: rpc_protocol::Value) -> RpcError {
    match rpc_protocol::decode_classified(&value) {
        Some((rpc_protocol::ClassifiedKind::UnknownMethod, detail)) => {
            RpcError::UnknownMethod(detail.to_string())
        }
        Some((rpc_protocol::ClassifiedKind::Protocol, detail)) => {
            RpcError::Protocol(detail.to_string())
        }
        None => RpcError::Remote(value),
    }
}

async fn service_callback_invoke(inner: Arc<Inner>, id: u64, callback_id: u64, args: Vec<rpc_protocol::Value>) {
    let result = match inner.callbacks.lookup(callback_id) {
        Some(callback) => {
            let fut: BoxFuture<_> = callback(args);
            match fut.await {
                Ok(value) => CallResult::Ok(value),
                Err(value) => CallResult::Err(value),
            }
        }
        None => CallResult::Err(rpc_protocol::Value::Str(format!(
            "unknown callback id {callback_id}"
        ))),
    };
    let envelope = Envelope::CallbackResult { id, result };
    match rpc_protocol::encode_envelope(inner.codec.as_ref(), &envelope) {
        Ok(bytes) => {
            let _ = inner.transport.write(bytes);
        }
        Err(err) => warn!("failed to encode callback result: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_arg_from_value_wraps_plainly() {
        let arg: CallArg = rpc_protocol::Value::Int(1).into();
        assert!(matches!(arg, CallArg::Value(rpc_protocol::Value::Int(1))));
    }

    #[test]
    fn classify_remote_error_recognizes_unknown_method() {
        let tagged = rpc_protocol::classified_error(
            rpc_protocol::ClassifiedKind::UnknownMethod,
            "unknown method `foo`",
        );
        match classify_remote_error(tagged) {
            RpcError::UnknownMethod(detail) => assert_eq!(detail, "unknown method `foo`"),
            other => panic!("expected UnknownMethod, got {other:?}"),
        }
    }

    #[test]
    fn classify_remote_error_falls_back_to_remote_for_user_errors() {
        let thrown = rpc_protocol::Value::Error(Box::new(rpc_protocol::ErrorValue::new(
            "ValidationError",
            "bad input",
        )));
        match classify_remote_error(thrown) {
            RpcError::Remote(rpc_protocol::Value::Error(err)) => assert_eq!(err.name, "ValidationError"),
            other => panic!("expected Remote, got {other:?}"),
        }
    }
}
