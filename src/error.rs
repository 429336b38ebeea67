//! Error type shared by the video device and its VNC components.

use thiserror::Error;

/// Errors surfaced to the host library by the VNC video device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VideoError {
    /// A framebuffer, palette or cursor buffer could not be allocated.
    #[error("couldn't allocate {what} ({bytes} bytes)")]
    OutOfMemory { what: &'static str, bytes: usize },

    /// A configuration value was malformed or out of range.
    #[error("{name} {reason}")]
    InvalidConfig { name: &'static str, reason: String },

    /// The requested colour depth has no pixel layout.
    #[error("unsupported colour depth: {0} bits per pixel")]
    UnsupportedDepth(u8),

    /// Cursor bitmaps are shorter than their dimensions require.
    #[error("cursor bitmap holds {actual} bytes, expected {expected}")]
    InvalidCursor { expected: usize, actual: usize },

    /// The requested mode has a zero or oversized dimension.
    #[error("invalid mode {width}x{height}")]
    InvalidMode { width: u32, height: u32 },

    /// A palette update reaches past the allocated entries.
    #[error("{count} colours from index {first} exceed the {size}-entry palette")]
    PaletteRange {
        first: usize,
        count: usize,
        size: usize,
    },

    /// The operation needs a running session and none has been started.
    #[error("no VNC session is active")]
    NoSession,

    /// The external RFB server reported a failure.
    #[error("VNC server error: {0}")]
    Backend(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, VideoError>;
