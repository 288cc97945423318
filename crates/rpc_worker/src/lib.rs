#![forbid(unsafe_code)]
//! Worker-side half of the RPC engine: the [`RpcTarget`] trait a hosted
//! type implements, the [`WorkerRuntime`] that drives the spawn handshake
//! and dispatch loop, and the [`CallbackChannel`] stub for invoking
//! callbacks the parent passed in as arguments (spec.md §4.4, §4.6, §5).

mod callback;
mod error;
mod runtime;
mod target;

pub use callback::CallbackChannel;
pub use error::{TargetError, WorkerError};
pub use runtime::{WorkerOptions, WorkerRuntime};
pub use target::RpcTarget;

pub use rpc_protocol::Value;
