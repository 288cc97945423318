#![forbid(unsafe_code)]
//! Duplex, length-prefixed frame transport between a parent process and a
//! sibling worker process (spec.md §4.2, C2).
//!
//! This crate carries raw frame payloads only; `rpc_parent` and
//! `rpc_worker` layer [`rpc_protocol::Envelope`] encoding/decoding on top.

mod error;
mod transport;

pub use error::TransportError;
pub use transport::{ExitInfo, Transport};
