//! Frame sources and the fixed-interval capture loop.
//!
//! A [`FrameSource`] hands out RGB pictures (a screen grabber, a test
//! pattern). A [`CaptureLoop`] owns a worker thread that pulls one frame
//! per interval from a source and writes it into a [`Recorder`] it owns:
//!
//! ```text
//!  start(recorder, source, interval)
//!        │
//!        ▼
//!  ┌───────────── worker ─────────────┐
//!  │ every interval:                  │      stop()
//!  │   source.capture_frame()         │ ◀──── shutdown (kanal)
//!  │   recorder.write(frame)          │
//!  └──────────────┬───────────────────┘
//!                 ▼
//!          Recorder handed back
//! ```
//!
//! Late ticks are not caught up: if a write takes longer than the interval,
//! the next capture happens immediately and the schedule restarts from there.
//!
//! A frame the recorder refuses (bad size, failed conversion or encode) is
//! logged and skipped. Source errors and container failures stop the loop.

mod pattern;

pub use pattern::{Pattern, PatternSource};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use kanal::{Receiver, ReceiveErrorTimeout, Sender, bounded};

use crate::error::{Error, Result};
use crate::frame::{Frame, RgbImage};
use crate::recorder::{Recorder, RecorderState};

/// Something that produces screen frames.
pub trait FrameSource: Send {
    /// Grab the next frame. `Ok(None)` means the source has ended.
    fn capture_frame(&mut self) -> Result<Option<RgbImage>>;
}

impl<F> FrameSource for F
where
    F: FnMut() -> Result<Option<RgbImage>> + Send,
{
    fn capture_frame(&mut self) -> Result<Option<RgbImage>> {
        self()
    }
}

/// What the worker returns when it exits.
struct WorkerExit {
    recorder: Recorder,
    error: Option<Error>,
}

/// A running capture worker.
pub struct CaptureLoop {
    shutdown: Sender<()>,
    thread: Option<thread::JoinHandle<WorkerExit>>,
    frames: Arc<AtomicU64>,
    interval: Duration,
}

impl CaptureLoop {
    /// Start capturing from `source` into an open `recorder` every `interval`.
    ///
    /// Fails with [`Error::NotOpen`] if the recorder is not open, and with
    /// [`Error::InvalidParameter`] for a zero interval.
    pub fn start<S>(recorder: Recorder, source: S, interval: Duration) -> Result<Self>
    where
        S: FrameSource + 'static,
    {
        if recorder.state() != RecorderState::Open {
            return Err(Error::NotOpen(format!(
                "capture needs an open recorder, got {}",
                recorder.state()
            )));
        }
        if interval.is_zero() {
            return Err(Error::InvalidParameter(
                "capture interval must be non-zero".to_string(),
            ));
        }

        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let frames = Arc::new(AtomicU64::new(0));
        let counter = frames.clone();

        let thread = thread::Builder::new()
            .name("recorda-capture".to_string())
            .spawn(move || Self::capture_thread(recorder, source, interval, shutdown_rx, counter))?;

        tracing::info!(interval_ms = interval.as_millis() as u64, "Capture started");
        Ok(Self {
            shutdown: shutdown_tx,
            thread: Some(thread),
            frames,
            interval,
        })
    }

    fn capture_thread<S: FrameSource>(
        mut recorder: Recorder,
        mut source: S,
        interval: Duration,
        shutdown: Receiver<()>,
        frames: Arc<AtomicU64>,
    ) -> WorkerExit {
        let mut next_tick = Instant::now();

        let error = loop {
            match shutdown.recv_timeout(next_tick.saturating_duration_since(Instant::now())) {
                Err(ReceiveErrorTimeout::Timeout) => {}
                // Stop requested, or the handle is gone
                Ok(()) | Err(_) => break None,
            }

            let image = match source.capture_frame() {
                Ok(Some(image)) => image,
                Ok(None) => {
                    tracing::debug!("Frame source ended");
                    break None;
                }
                Err(e) => break Some(e),
            };
            match recorder.write(Frame::from(&image)) {
                Ok(_) => {
                    frames.fetch_add(1, Ordering::Relaxed);
                }
                // A bad frame is dropped; the recording goes on.
                Err(e @ (Error::InvalidFrame(_) | Error::Conversion(_) | Error::Encode(_))) => {
                    tracing::warn!(error = %e, "Dropped captured frame");
                }
                Err(e) => break Some(e),
            }

            next_tick += interval;
            let now = Instant::now();
            if next_tick < now {
                tracing::debug!(
                    late_us = (now - next_tick).as_micros() as u64,
                    "Capture tick overran"
                );
                next_tick = now;
            }
        };

        if let Some(e) = &error {
            tracing::error!(error = %e, "Capture stopped on error");
        }
        WorkerExit { recorder, error }
    }

    /// Frames written so far.
    pub fn frames_captured(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Capture interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the worker is still capturing.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the worker and take the recorder back, still open.
    ///
    /// If the worker stopped on an error, that error is returned and the
    /// recorder is dropped, which finalises the file.
    pub fn stop(mut self) -> Result<Recorder> {
        let _ = self.shutdown.send(());
        let thread = self
            .thread
            .take()
            .ok_or_else(|| Error::NotOpen("capture already stopped".to_string()))?;
        let exit = thread
            .join()
            .map_err(|_| Error::Encode("capture thread panicked".to_string()))?;

        tracing::info!(frames = self.frames_captured(), "Capture stopped");
        match exit.error {
            Some(e) => Err(e),
            None => Ok(exit.recorder),
        }
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl std::fmt::Debug for CaptureLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureLoop")
            .field("interval", &self.interval)
            .field("frames", &self.frames_captured())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{CodecType, OutputFormat};

    #[test]
    fn test_start_requires_open_recorder() {
        let recorder = Recorder::new(OutputFormat::Avi, CodecType::H264).unwrap();
        let result = CaptureLoop::start(
            recorder,
            PatternSource::new(64, 64),
            Duration::from_millis(10),
        );
        assert!(matches!(result, Err(Error::NotOpen(_))));
    }

    #[test]
    fn test_closure_source() {
        let mut calls = 0;
        let mut source = move || -> Result<Option<RgbImage>> {
            calls += 1;
            Ok((calls < 2).then(|| RgbImage::filled(2, 2, [9, 9, 9])))
        };
        assert!(source.capture_frame().unwrap().is_some());
        assert!(source.capture_frame().unwrap().is_none());
    }
}
