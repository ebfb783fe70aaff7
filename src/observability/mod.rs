//! Observability features: metrics and tracing.
//!
//! - **Metrics**: counters and histograms via `metrics-rs`
//! - **Tracing**: structured logging and spans via `tracing`
//!
//! ## Metrics
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `recorda_frames_submitted` | Counter | Frames handed to the encoder |
//! | `recorda_packets_muxed` | Counter | Packets written to the container |
//! | `recorda_bytes_muxed` | Counter | Compressed bytes written |
//! | `recorda_keyframes_muxed` | Counter | Keyframes written |
//! | `recorda_write_time_ns` | Histogram | Time per frame write |
//!
//! Every metric carries a `format` label. Without an installed recorder the
//! calls are no-ops.
//!
//! ## Tracing
//!
//! Each recording runs `open` and `close` inside a `recording` span carrying
//! the format and sink path. The library never installs a subscriber.
//!
//! ## Example
//!
//! ```rust,ignore
//! use recorda::observability::init_metrics;
//!
//! // After installing a metrics exporter
//! init_metrics();
//! ```

mod metrics;
mod tracing_support;

pub use metrics::{RecordingMetrics, TimerGuard, init_metrics};
pub use tracing_support::{span_recording, trace_drain, trace_packet, trace_state_change};
