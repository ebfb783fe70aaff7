//! Video encoding.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                EncoderEngine trait                   │
//! │  open() → CodecParameters                            │
//! │  submit(frame) → Accepted | Rejected                 │
//! │  receive() → Packet | NeedsInput | EndOfStream       │
//! │  flush() / close()                                   │
//! └───────────────────────────┬──────────────────────────┘
//!                             │
//!                    ┌────────┴────────┐
//!                    │   H264Engine    │
//!                    │   (OpenH264)    │
//!                    └─────────────────┘
//! ```
//!
//! [`nal`] holds the Annex-B/AVCC helpers shared by the engine and the
//! container writers.

mod h264;
pub mod nal;
mod params;
mod traits;

pub use h264::H264Engine;
pub use params::CodecParameters;
pub use traits::{Drain, EncoderEngine, EncoderOutput, Packet, Submit};

use crate::format::CodecType;

/// Create the encoder engine for a codec.
pub fn engine_for(codec: CodecType) -> Box<dyn EncoderEngine> {
    match codec {
        CodecType::H264 => Box::new(H264Engine::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_for_h264() {
        let engine = engine_for(CodecType::H264);
        assert_eq!(engine.name(), "openh264");
        assert!(!engine.is_open());
    }
}
