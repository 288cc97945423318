#![forbid(unsafe_code)]
//! Parent-side half of the worker RPC engine: spawns a worker process,
//! performs the `Init`/`Ready` handshake, and exposes a [`Proxy`] that
//! mirrors method calls, property reads, and events onto the spawned
//! process (spec.md §3, §4.4, §4.6).

mod callback;
mod config;
mod error;
mod events;
mod mirror;
mod pending;
mod proxy;

pub use callback::{BoxFuture, CallbackFn};
pub use config::{RpcConfig, SpawnOptions};
pub use error::RpcError;
pub use events::{Listener, ListenerId};
pub use proxy::{CallArg, Proxy};

pub use rpc_protocol::{SerializationMode, ShutdownMode, Value};
