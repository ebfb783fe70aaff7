//! Metrics collection using metrics-rs.

use metrics::{Counter, Histogram, Unit, counter, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

const FRAMES_SUBMITTED: &str = "recorda_frames_submitted";
const PACKETS_MUXED: &str = "recorda_packets_muxed";
const BYTES_MUXED: &str = "recorda_bytes_muxed";
const KEYFRAMES_MUXED: &str = "recorda_keyframes_muxed";
const WRITE_TIME_NS: &str = "recorda_write_time_ns";

/// Initialize metrics descriptions.
///
/// Call this once at application startup, after installing a recorder.
/// Subsequent calls are no-ops.
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(
        FRAMES_SUBMITTED,
        Unit::Count,
        "Frames handed to the encoder"
    );
    metrics::describe_counter!(
        PACKETS_MUXED,
        Unit::Count,
        "Compressed packets written to the container"
    );
    metrics::describe_counter!(BYTES_MUXED, Unit::Bytes, "Compressed bytes written");
    metrics::describe_counter!(
        KEYFRAMES_MUXED,
        Unit::Count,
        "Keyframe packets written to the container"
    );
    metrics::describe_histogram!(
        WRITE_TIME_NS,
        Unit::Nanoseconds,
        "Time spent in one frame write (convert, encode, mux)"
    );
}

/// Metrics handles for one recording session, labelled by container format.
#[derive(Clone)]
pub struct RecordingMetrics {
    format: String,
    frames: Counter,
    packets: Counter,
    bytes: Counter,
    keyframes: Counter,
    write_time: Histogram,
}

impl RecordingMetrics {
    /// Create handles for a format (`"avi"`, `"matroska"`, `"mp4"`).
    pub fn new(format: &str) -> Self {
        Self {
            format: format.to_string(),
            frames: counter!(FRAMES_SUBMITTED, "format" => format.to_string()),
            packets: counter!(PACKETS_MUXED, "format" => format.to_string()),
            bytes: counter!(BYTES_MUXED, "format" => format.to_string()),
            keyframes: counter!(KEYFRAMES_MUXED, "format" => format.to_string()),
            write_time: histogram!(WRITE_TIME_NS, "format" => format.to_string()),
        }
    }

    /// Record a frame submitted to the encoder.
    #[inline]
    pub fn record_frame(&self) {
        self.frames.increment(1);
    }

    /// Record a packet written to the container.
    #[inline]
    pub fn record_packet(&self, bytes: usize, keyframe: bool) {
        self.packets.increment(1);
        self.bytes.increment(bytes as u64);
        if keyframe {
            self.keyframes.increment(1);
        }
    }

    /// Record the duration of one write.
    #[inline]
    pub fn record_write_time(&self, duration: Duration) {
        self.write_time.record(duration.as_nanos() as f64);
    }

    /// Start a timer that records the write time on drop.
    pub fn start_timer(&self) -> TimerGuard<'_> {
        TimerGuard {
            start: Instant::now(),
            metrics: self,
        }
    }

    /// Format label.
    pub fn format(&self) -> &str {
        &self.format
    }
}

impl std::fmt::Debug for RecordingMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingMetrics")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// Guard that records the write time when dropped.
pub struct TimerGuard<'a> {
    start: Instant,
    metrics: &'a RecordingMetrics,
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.metrics.record_write_time(self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        init_metrics();
        // Idempotent
        init_metrics();
    }

    #[test]
    fn test_recording_metrics() {
        // No recorder installed: every call is a no-op
        let metrics = RecordingMetrics::new("mp4");
        metrics.record_frame();
        metrics.record_packet(1200, true);
        metrics.record_packet(300, false);
        metrics.record_write_time(Duration::from_micros(50));
        assert_eq!(metrics.format(), "mp4");
    }

    #[test]
    fn test_timer_guard() {
        let metrics = RecordingMetrics::new("avi");
        {
            let _timer = metrics.start_timer();
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}
