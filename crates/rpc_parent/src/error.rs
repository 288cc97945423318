use std::time::Duration;

use thiserror::Error;

use rpc_protocol::{CodecError, Value};
use rpc_transport::{ExitInfo, TransportError};

/// Error taxonomy surfaced to callers (spec.md §7).
#[derive(Debug, Error)]
pub enum RpcError {
    /// Per-attempt deadline expired and retries were exhausted.
    #[error("call to `{method}` timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    /// The transport closed before a `Response` arrived.
    #[error("worker crashed (exit code={code:?}, signal={signal:?})", code = exit.code, signal = exit.signal)]
    WorkerCrashed { exit: ExitInfo },

    /// Spawn did not reach `Ready` within the initialization budget.
    #[error("worker did not become ready within {0:?}")]
    Initialization(Duration),

    /// A codec refused a value.
    #[error("serialization failed: {0}")]
    Serialization(#[from] CodecError),

    /// The requested method does not exist on the target instance.
    #[error("unknown method `{0}`")]
    UnknownMethod(String),

    /// A malformed frame, unknown envelope kind, or unknown callback id.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The worker's target method threw; the value is the marshalled
    /// error (spec.md §7 "Errors thrown by the user's method body are
    /// propagated, not classified").
    #[error("worker method raised an error")]
    Remote(Value),

    /// `$terminate` has already completed; no further calls are accepted
    /// (spec.md §8 invariant 6).
    #[error("proxy has already terminated")]
    Terminated,

    /// The handle-passing extension point is reserved but not implemented
    /// (`SPEC_FULL.md` SUPPLEMENT — handle-passing extension point).
    #[error("handle passing is not supported by this worker")]
    HandlePassingUnsupported,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("invalid spawn configuration: {0}")]
    InvalidConfig(String),
}
