//! Error types for recorda.

use thiserror::Error;

/// Result type alias using recorda's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for recording operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Unsupported output format or codec at construction time.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// No container writer exists for the requested format.
    #[error("unsupported output format: {0}")]
    UnsupportedFormat(String),

    /// `open` was called on a recorder that is already open.
    #[error("recorder is already open")]
    AlreadyOpen,

    /// `open` was called on a recorder that has been closed.
    #[error("recorder has been closed and cannot be reopened")]
    AlreadyClosed,

    /// An operation that needs an open recorder (or muxer) was called outside that state.
    #[error("not open: {0}")]
    NotOpen(String),

    /// A parameter passed to `open` is out of range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The encoder could not be configured or opened.
    #[error("failed to open encoder: {0}")]
    EncoderOpen(String),

    /// The container stream could not be created.
    #[error("failed to create stream: {0}")]
    StreamCreation(String),

    /// The container header could not be written.
    #[error("failed to write container header: {0}")]
    ContainerHeader(String),

    /// Color conversion failed (intermediate allocation).
    #[error("color conversion failed: {0}")]
    Conversion(String),

    /// A frame does not match the expected layout.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Submitting a frame or draining packets failed.
    #[error("encode failed: {0}")]
    Encode(String),

    /// A packet addressed a stream the container does not have.
    #[error("invalid stream index {index} (container has {available} stream(s))")]
    InvalidStream {
        /// Stream index carried by the packet.
        index: usize,
        /// Number of streams in the container.
        available: usize,
    },

    /// Flushing or writing the container trailer failed.
    #[error("failed to write container trailer: {0}")]
    TrailerWrite(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
