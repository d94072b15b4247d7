//! # Codec
//!
//! Turns frames into payload bytes and back. The framing layer in `io` moves
//! those payloads; it never looks inside them.
//!
//! ## Invariants
//! - **Symmetry**: `decode(encode(frame)) == frame` for every valid frame.
//! - **Panic Safety**: Decoding returns `Result`, never panicking on unknown data.

use serde::Deserialize;

use crate::error::Result;
use crate::frame::Frame;
use crate::frame::RequestId;

/// A symmetric frame serializer.
///
/// Object-safe so a client can hold `Arc<dyn Codec>`.
pub trait Codec: Send + Sync + 'static {
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>>;

    /// Decodes and validates a frame.
    fn decode(&self, bytes: &[u8]) -> Result<Frame>;

    /// Extracts just the correlation id from a payload.
    ///
    /// Used to route a failure to the right caller when the full frame does
    /// not decode.
    fn peek_id(&self, bytes: &[u8]) -> Result<RequestId>;
}

/// JSON payloads via `serde_json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

#[derive(Deserialize)]
struct IdOnly {
    id: RequestId,
}

impl Codec for JsonCodec {
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        frame.validate()?;
        Ok(serde_json::to_vec(frame)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Frame> {
        let frame: Frame = serde_json::from_slice(bytes)?;
        frame.validate()?;
        Ok(frame)
    }

    fn peek_id(&self, bytes: &[u8]) -> Result<RequestId> {
        let IdOnly { id } = serde_json::from_slice(bytes)?;
        Ok(id)
    }
}
