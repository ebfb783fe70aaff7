//! # Record a Test Pattern
//!
//! Capture a synthetic screen at a fixed interval into a video file.
//!
//! ```text
//! [PatternSource] → [CaptureLoop] → [Recorder] → file
//! ```
//!
//! Run: `cargo run --example record_pattern -- out.mkv [seconds]`
//!
//! The container follows the file extension (`.avi`, `.mkv`, `.mp4`).
//! Set `RUST_LOG=recorda=debug` for per-packet logs.

use std::time::Duration;

use recorda::prelude::*;
use tracing_subscriber::EnvFilter;

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;
const FPS: u32 = 30;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("recorda=info")),
        )
        .init();
    // No-op until a metrics exporter is installed
    recorda::observability::init_metrics();

    let mut args = std::env::args().skip(1);
    let path = args.next().unwrap_or_else(|| "pattern.mp4".to_string());
    let seconds: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(3);

    let format = OutputFormat::from_path(&path)
        .ok_or_else(|| Error::UnsupportedFormat(format!("no known extension on '{}'", path)))?;

    println!("=== Recording {}s of test pattern to {} ===\n", seconds, path);

    let config = RecorderConfig::new().codec(CodecConfig::screen_capture());
    let mut recorder = Recorder::with_config(format, CodecType::H264, config)?;
    recorder.open(&path, WIDTH, HEIGHT, FPS)?;

    // Capture at a different size than the output to exercise scaling
    let source = PatternSource::new(1920, 1080)
        .with_pattern(Pattern::SweepingBars)
        .with_limit(seconds * FPS as u64);
    let capture = CaptureLoop::start(recorder, source, Duration::from_secs(1) / FPS)?;

    while capture.is_running() {
        std::thread::sleep(Duration::from_millis(100));
    }

    let mut recorder = capture.stop()?;
    recorder.close()?;

    let stats = recorder.stats();
    let file_size = std::fs::metadata(&path)?.len();
    println!("Frames:    {}", stats.frames);
    println!("Packets:   {}", stats.packets);
    println!("Keyframes: {}", stats.keyframes);
    println!("Size:      {} bytes", file_size);

    Ok(())
}
