use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to spawn worker process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("child process is missing a piped stdio handle: {0}")]
    MissingStdio(&'static str),
    #[error("write to a closed transport")]
    Closed,
    #[error("frame exceeded the configured maximum size: {0}")]
    Framing(#[from] rpc_protocol::FramingError),
}
