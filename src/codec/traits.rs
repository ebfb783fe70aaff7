//! Encoder engine trait and the packets it produces.
//!
//! # Overview
//!
//! An [`EncoderEngine`] is a stateful encoder with decoupled input and
//! output: frames go in through [`submit`](EncoderEngine::submit), packets
//! come out through [`receive`](EncoderEngine::receive). The engine may hold
//! several frames before producing anything (B-frame reordering, lookahead),
//! so callers never assume one packet per frame.
//!
//! # Buffering Behavior
//!
//! - `receive()` returns [`EncoderOutput::NeedsInput`] when nothing is ready yet
//! - after [`flush`](EncoderEngine::flush), `receive()` yields the remaining
//!   packets and then [`EncoderOutput::EndOfStream`]
//! - neither condition is an error
//!
//! # Example
//!
//! ```rust,ignore
//! engine.open(&config, 1280, 720, time_base)?;
//!
//! for frame in frames {
//!     engine.submit(&frame)?;
//!     for packet in engine.drain() {
//!         muxer.write_packet(packet?)?;
//!     }
//! }
//!
//! engine.flush()?;
//! for packet in engine.drain() {
//!     muxer.write_packet(packet?)?;
//! }
//! ```

use bytes::Bytes;

use crate::config::CodecConfig;
use crate::error::Result;
use crate::frame::PlanarFrame;
use crate::temporal::TimeBase;

use super::CodecParameters;

/// A compressed video packet.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    /// Compressed data (Annex-B for H.264).
    pub data: Bytes,
    /// Presentation timestamp.
    pub pts: i64,
    /// Decode timestamp.
    pub dts: i64,
    /// Duration.
    pub duration: i64,
    /// Whether the packet can be decoded on its own.
    pub keyframe: bool,
    /// Index of the stream the packet belongs to.
    pub stream_index: usize,
}

impl Packet {
    /// Create a one-tick packet with `dts == pts`.
    pub fn new(data: impl Into<Bytes>, pts: i64) -> Self {
        Self {
            data: data.into(),
            pts,
            dts: pts,
            duration: 1,
            keyframe: false,
            stream_index: 0,
        }
    }

    /// Set the decode timestamp.
    pub fn with_dts(mut self, dts: i64) -> Self {
        self.dts = dts;
        self
    }

    /// Set the duration.
    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }

    /// Mark the packet as a keyframe.
    pub fn with_keyframe(mut self, keyframe: bool) -> Self {
        self.keyframe = keyframe;
        self
    }

    /// Set the stream index.
    pub fn with_stream_index(mut self, index: usize) -> Self {
        self.stream_index = index;
        self
    }

    /// Move pts, dts and duration from one time base to another.
    pub fn rescale(mut self, from: TimeBase, to: TimeBase) -> Self {
        self.pts = TimeBase::rescale(self.pts, from, to);
        self.dts = TimeBase::rescale(self.dts, from, to);
        self.duration = TimeBase::rescale(self.duration, from, to);
        self
    }

    /// Size of the payload in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.data.len())
            .field("pts", &self.pts)
            .field("dts", &self.dts)
            .field("duration", &self.duration)
            .field("keyframe", &self.keyframe)
            .field("stream_index", &self.stream_index)
            .finish()
    }
}

/// Outcome of [`EncoderEngine::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submit {
    /// The frame was taken.
    Accepted,
    /// The engine is full; drain packets and submit the frame again.
    Rejected,
}

/// Outcome of [`EncoderEngine::receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderOutput {
    /// A packet is ready.
    Packet(Packet),
    /// Nothing is ready until more frames are submitted.
    NeedsInput,
    /// The engine was flushed and every packet has been returned.
    EndOfStream,
}

/// A stateful video encoder with decoupled submit and receive.
pub trait EncoderEngine: Send {
    /// Short engine name for logs.
    fn name(&self) -> &str;

    /// Configure and open the encoder.
    ///
    /// `config` is applied once here and never changes afterwards.
    fn open(
        &mut self,
        config: &CodecConfig,
        width: u32,
        height: u32,
        time_base: TimeBase,
    ) -> Result<CodecParameters>;

    /// Whether the engine is open.
    fn is_open(&self) -> bool;

    /// Hand a frame to the encoder. `frame.pts` is in the encoder time base.
    fn submit(&mut self, frame: &PlanarFrame<'_>) -> Result<Submit>;

    /// Take the next packet, if one is ready.
    fn receive(&mut self) -> Result<EncoderOutput>;

    /// Signal end of stream. Callers must then drain until
    /// [`EncoderOutput::EndOfStream`].
    fn flush(&mut self) -> Result<()>;

    /// Release native encoder state. Idempotent.
    fn close(&mut self);
}

impl<'e> dyn EncoderEngine + 'e {
    /// Iterate over the packets that are ready.
    ///
    /// Ends on [`EncoderOutput::NeedsInput`] or [`EncoderOutput::EndOfStream`];
    /// yields `Err` once on a genuine failure and then ends.
    pub fn drain(&mut self) -> Drain<'_, 'e> {
        Drain {
            engine: self,
            end_of_stream: false,
            done: false,
        }
    }
}

/// Lazy iterator over ready packets, returned by `drain`.
pub struct Drain<'a, 'e> {
    engine: &'a mut (dyn EncoderEngine + 'e),
    end_of_stream: bool,
    done: bool,
}

impl Drain<'_, '_> {
    /// Whether the engine reported end of stream.
    pub fn reached_end_of_stream(&self) -> bool {
        self.end_of_stream
    }
}

impl Iterator for Drain<'_, '_> {
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.engine.receive() {
            Ok(EncoderOutput::Packet(packet)) => Some(Ok(packet)),
            Ok(EncoderOutput::NeedsInput) => {
                self.done = true;
                None
            }
            Ok(EncoderOutput::EndOfStream) => {
                self.done = true;
                self.end_of_stream = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::collections::VecDeque;

    struct Scripted {
        outputs: VecDeque<Result<EncoderOutput>>,
    }

    impl EncoderEngine for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }
        fn open(&mut self, _: &CodecConfig, w: u32, h: u32, tb: TimeBase) -> Result<CodecParameters> {
            CodecParameters::h264(w, h, tb.den())
        }
        fn is_open(&self) -> bool {
            true
        }
        fn submit(&mut self, _: &PlanarFrame<'_>) -> Result<Submit> {
            Ok(Submit::Accepted)
        }
        fn receive(&mut self) -> Result<EncoderOutput> {
            self.outputs
                .pop_front()
                .unwrap_or(Ok(EncoderOutput::NeedsInput))
        }
        fn flush(&mut self) -> Result<()> {
            Ok(())
        }
        fn close(&mut self) {}
    }

    #[test]
    fn test_packet_rescale() {
        let from = TimeBase::from_frame_rate(25).unwrap();
        let packet = Packet::new(vec![1, 2, 3], 3)
            .with_dts(2)
            .rescale(from, TimeBase::MILLISECONDS);
        assert_eq!(packet.pts, 120);
        assert_eq!(packet.dts, 80);
        assert_eq!(packet.duration, 40);
        assert_eq!(packet.len(), 3);
    }

    #[test]
    fn test_drain_stops_on_needs_input() {
        let mut engine = Scripted {
            outputs: VecDeque::from(vec![
                Ok(EncoderOutput::Packet(Packet::new(vec![0], 0))),
                Ok(EncoderOutput::Packet(Packet::new(vec![1], 1))),
                Ok(EncoderOutput::NeedsInput),
                Ok(EncoderOutput::Packet(Packet::new(vec![2], 2))),
            ]),
        };
        let engine: &mut dyn EncoderEngine = &mut engine;

        let packets: Vec<Packet> = engine.drain().collect::<Result<_>>().unwrap();
        assert_eq!(packets.len(), 2);

        // The remaining packet is picked up by the next drain.
        assert_eq!(engine.drain().count(), 1);
    }

    #[test]
    fn test_drain_reports_end_of_stream() {
        let mut engine = Scripted {
            outputs: VecDeque::from(vec![Ok(EncoderOutput::EndOfStream)]),
        };
        let engine: &mut dyn EncoderEngine = &mut engine;
        let mut drain = engine.drain();
        assert!(drain.next().is_none());
        assert!(drain.reached_end_of_stream());
    }

    #[test]
    fn test_drain_yields_error_once() {
        let mut engine = Scripted {
            outputs: VecDeque::from(vec![
                Err(Error::Encode("boom".to_string())),
                Ok(EncoderOutput::Packet(Packet::new(vec![0], 0))),
            ]),
        };
        let engine: &mut dyn EncoderEngine = &mut engine;
        let mut drain = engine.drain();
        assert!(matches!(drain.next(), Some(Err(Error::Encode(_)))));
        assert!(drain.next().is_none());
    }
}
