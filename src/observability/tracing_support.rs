//! Tracing integration for structured logging and spans.

use std::path::Path;

use tracing::{Level, Span, span};

/// Create the span covering one recording session's `open` and `close`.
///
/// # Example
///
/// ```rust,ignore
/// use recorda::observability::span_recording;
///
/// let _guard = span_recording("mp4", path).entered();
/// // open the encoder and the container here
/// ```
#[inline]
pub fn span_recording(format: &str, sink: &Path) -> Span {
    span!(
        Level::INFO,
        "recording",
        format = %format,
        sink = %sink.display()
    )
}

/// Log a batch of packets drained from the encoder.
#[inline]
pub fn trace_drain(format: &str, packets: usize, end_of_stream: bool) {
    tracing::debug!(
        format = %format,
        packets = packets,
        end_of_stream = end_of_stream,
        "drained encoder"
    );
}

/// Log one packet handed to the muxer.
#[inline]
pub fn trace_packet(pts: i64, dts: i64, size: usize, keyframe: bool) {
    tracing::trace!(
        pts = pts,
        dts = dts,
        size = size,
        keyframe = keyframe,
        "packet muxed"
    );
}

/// Log a recorder state change.
#[inline]
pub fn trace_state_change(format: &str, from: &str, to: &str) {
    tracing::info!(
        format = %format,
        from = %from,
        to = %to,
        "recorder state changed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_creation() {
        let span = span_recording("matroska", Path::new("/tmp/out.mkv"));
        let _guard = span.entered();
    }

    #[test]
    fn test_trace_functions() {
        // No subscriber installed
        trace_drain("mp4", 3, false);
        trace_packet(0, -1, 100, true);
        trace_state_change("avi", "Created", "Open");
    }
}
