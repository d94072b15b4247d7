//! # farwire
//!
//! The envelope and framing layer for farcall.
//!
//! ## Architecture
//!
//! - `frame`: `Request`, `Response` and the top-level `Frame` envelope.
//! - `codec`: the `Codec` trait and its JSON implementation.
//! - `io`: 4-byte length-prefixed framing over any tokio byte stream.
//!
//! The client core only relies on two properties of this layer: the request id
//! round-trips unchanged, and the codec is symmetric.

pub mod codec;
pub mod error;
pub mod frame;
pub mod io;

pub use codec::Codec;
pub use codec::JsonCodec;
pub use error::Error;
pub use error::FaultKind;
pub use error::RemoteFault;
pub use error::Result;
pub use frame::Frame;
pub use frame::Request;
pub use frame::RequestId;
pub use frame::Response;
pub use io::DEFAULT_MAX_FRAME_LEN;
pub use io::read_frame;
pub use io::write_frame;

#[cfg(test)]
mod tests;
