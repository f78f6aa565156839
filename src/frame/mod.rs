//! Event frame decoding: bytes → raw frames → typed frames.

mod decoder;
mod types;

pub use decoder::{FrameDecoder, RawFrame};
pub use types::*;
