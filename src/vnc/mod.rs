//! VNC glue between the host video subsystem and an RFB server library.
//!
//! Nothing in here speaks the RFB protocol. The server library owns the
//! handshake, encodings and client connections; these modules prepare what it
//! serves and translate what it receives.
//!
//! # Components
//!
//! - **`keysym`**: remote keysyms to native key symbols, modifiers and text
//! - **`pointer`**: absolute pointer reports to motion and button events
//! - **`events`**: the input callbacks registered with the server
//! - **`cursor`**: monochrome bitmap cursors in the server's byte format
//! - **`framebuffer`**: pixel storage, true-colour layout or palette, readback
//! - **`backend`**: the [`RfbBackend`](backend::RfbBackend) seam to the server library
//! - **`rustvnc`**: a backend served by the `rustvncserver` crate (feature `rustvncserver`)
//!
//! # Data Flow
//!
//! ```text
//! host ──set_video_mode──▶ framebuffer ◀──reads── RfbBackend ──▶ viewers
//! host ◀──HostEvent queue── events (keysym, pointer) ◀──callbacks── RfbBackend
//! ```

pub mod backend;
pub mod cursor;
pub mod events;
pub mod framebuffer;
pub mod keysym;
pub mod pointer;

#[cfg(feature = "rustvncserver")]
pub mod rustvnc;
