use thiserror::Error;

/// The default ceiling on a single frame's payload size (spec.md §4.1):
/// a length prefix larger than this is treated as a protocol violation
/// rather than an attempt to allocate an unbounded buffer.
pub const DEFAULT_MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("frame length {len} exceeds configured maximum {max}")]
    TooLarge { len: u32, max: u32 },
}

/// Prefixes `payload` with its little-endian `u32` length (spec.md §4.1,
/// §6 wire protocol).
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(payload.len() + 4);
    framed.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    framed.extend_from_slice(payload);
    framed
}

/// Incremental frame reassembly over a byte stream that may deliver data in
/// arbitrary chunk sizes. Owns no I/O; callers feed it bytes as they arrive
/// (see `rpc_transport`, which drives this from a `tokio::io::AsyncRead`)
/// and drain complete frames in arrival order.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    buffer: Vec<u8>,
    max_frame_bytes: u32,
}

impl FrameReassembler {
    pub fn new(max_frame_bytes: u32) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_bytes,
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Pops one fully-buffered frame's payload, if present. A malformed
    /// length prefix (too large) is a terminal error: the transport must
    /// abort rather than keep reading (spec.md §4.1).
    pub fn try_take_frame(&mut self) -> Result<Option<Vec<u8>>, FramingError> {
        if self.buffer.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_le_bytes(self.buffer[0..4].try_into().expect("checked len >= 4"));
        if len > self.max_frame_bytes {
            return Err(FramingError::TooLarge {
                len,
                max: self.max_frame_bytes,
            });
        }
        let total = 4usize + len as usize;
        if self.buffer.len() < total {
            return Ok(None);
        }
        let payload = self.buffer[4..total].to_vec();
        self.buffer.drain(0..total);
        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_single_frame() {
        let frame = encode_frame(b"hello");
        let mut reassembler = FrameReassembler::new(DEFAULT_MAX_FRAME_BYTES);
        reassembler.feed(&frame);
        let payload = reassembler.try_take_frame().unwrap().unwrap();
        assert_eq!(payload, b"hello");
        assert!(reassembler.try_take_frame().unwrap().is_none());
    }

    #[test]
    fn reassembles_split_chunks() {
        let frame = encode_frame(b"worker-rpc");
        let mut reassembler = FrameReassembler::new(DEFAULT_MAX_FRAME_BYTES);
        for byte in &frame {
            reassembler.feed(std::slice::from_ref(byte));
        }
        let payload = reassembler.try_take_frame().unwrap().unwrap();
        assert_eq!(payload, b"worker-rpc");
    }

    #[test]
    fn drains_multiple_queued_frames_in_order() {
        let mut bytes = encode_frame(b"a");
        bytes.extend(encode_frame(b"bb"));
        bytes.extend(encode_frame(b"ccc"));
        let mut reassembler = FrameReassembler::new(DEFAULT_MAX_FRAME_BYTES);
        reassembler.feed(&bytes);
        assert_eq!(reassembler.try_take_frame().unwrap().unwrap(), b"a");
        assert_eq!(reassembler.try_take_frame().unwrap().unwrap(), b"bb");
        assert_eq!(reassembler.try_take_frame().unwrap().unwrap(), b"ccc");
        assert!(reassembler.try_take_frame().unwrap().is_none());
    }

    #[test]
    fn rejects_oversized_length_prefix() {
        let mut reassembler = FrameReassembler::new(8);
        let mut bytes = 100u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"short");
        reassembler.feed(&bytes);
        let err = reassembler.try_take_frame().unwrap_err();
        assert!(matches!(err, FramingError::TooLarge { len: 100, max: 8 }));
    }
}
