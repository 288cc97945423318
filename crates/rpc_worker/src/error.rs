use thiserror::Error;

use rpc_protocol::CodecError;
use rpc_transport::TransportError;

/// Failures raised by the hosted target itself, as distinct from engine
/// or transport failures (spec.md §7, `SPEC_FULL.md` AMBIENT — error
/// handling: "an analogous `TargetError`/`WorkerError` split... for
/// worker-local failures").
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("constructor rejected its arguments: {0}")]
    InvalidArgs(String),

    #[error("construction failed: {0}")]
    ConstructionFailed(String),
}

/// Worker-process-level failures (spec.md §5 concurrency model, §7).
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("serialization failed: {0}")]
    Serialization(#[from] CodecError),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("target construction failed: {0}")]
    Target(#[from] TargetError),
}
