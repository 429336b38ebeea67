//! RFB video backend
//!
//! This crate is a video-output backend that shows a host application on VNC
//! viewers instead of a local screen, and feeds their keyboard and pointer
//! back to it. The RFB protocol itself is delegated to a server library.
//!
//! # Modules
//!
//! - `video`: the device implementing the host's video driver slots.
//! - `vnc`: keysym and pointer translation, cursors, framebuffer, server seam.
//! - `host`: the host library's pixel formats, surfaces and input events.
//! - `config`: environment-style options.

pub mod config;
pub mod error;
pub mod host;
pub mod video;
pub mod vnc;

pub use config::{Environment, VncConfig};
pub use error::{Result, VideoError};
pub use host::{HostEvent, Surface, VideoDriver};
pub use video::VncVideoDevice;
pub use vnc::backend::RfbBackend;

#[cfg(feature = "rustvncserver")]
pub use vnc::rustvnc::RustVncBackend;

/// Installs the logger once. Later calls are ignored.
///
/// The level defaults to `info` and can be changed through `RUST_LOG`.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .try_init();
}
