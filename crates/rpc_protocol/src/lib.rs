#![forbid(unsafe_code)]
//! Wire-level foundation for the worker RPC engine: the [`Value`] model
//! both codecs speak, the [`PortableCodec`]/[`RichCodec`] pair, the
//! [`Envelope`] message set, and length-prefixed framing.
//!
//! This crate has no process or async-runtime dependency of its own —
//! `rpc_transport` drives [`FrameReassembler`] from a live byte stream,
//! and `rpc_parent`/`rpc_worker` build the call machinery on top of
//! [`Envelope`] and [`Codec`].

mod classified;
mod codec;
mod envelope;
mod framing;
mod value;

pub use classified::{classified_error, decode_classified, ClassifiedKind};
pub use codec::{codec_for, Codec, CodecDirection, CodecError, PortableCodec, RichCodec, SerializationMode};
pub use envelope::{decode_envelope, encode_envelope, CallResult, Envelope, ShutdownMode};
pub use framing::{encode_frame, FrameReassembler, FramingError, DEFAULT_MAX_FRAME_BYTES};
pub use value::{CallbackRef, ErrorValue, GraphNode, TypedArray, Value, ValueGraph};
