//! The seam to the external RFB server library.
//!
//! The device never speaks the protocol itself. Everything wire-related
//! (handshake, encodings, authentication, client management) happens behind
//! [`RfbBackend`]; the device only tells it which framebuffer to serve, which
//! cursor to show, and where to send input.

use std::sync::Arc;

use crate::config::ListenConfig;
use crate::error::Result;
use crate::host::SharedFramebuffer;
use crate::vnc::cursor::CursorImage;
use crate::vnc::events::InputHandler;

/// Parameters of the first session start.
#[derive(Debug)]
pub struct SessionStart<'a> {
    pub framebuffer: SharedFramebuffer,
    pub listen: &'a ListenConfig,
    pub desktop_name: &'a str,
    /// Cursor shown until the host installs its own.
    pub cursor: Arc<CursorImage>,
    /// Input callbacks; `None` for view-only sessions.
    pub input: Option<InputHandler>,
}

/// A screen served by an RFB server library.
///
/// `start` runs once per device. It must return without blocking: the
/// library serves viewers and invokes the input callbacks on its own
/// threads until `shutdown`.
pub trait RfbBackend: Send {
    fn start(&mut self, session: SessionStart<'_>) -> Result<()>;

    /// The framebuffer contents were replaced by a new mode.
    fn new_framebuffer(&mut self, framebuffer: &SharedFramebuffer) -> Result<()>;

    /// Marks `x1..x2, y1..y2` as changed. Pixels must already be written.
    fn mark_rect_modified(&self, x1: u16, y1: u16, x2: u16, y2: u16);

    /// Palette entries `first..first + count` changed.
    fn set_colour_map(&self, first: usize, count: usize);

    fn set_cursor(&mut self, cursor: Arc<CursorImage>);

    fn set_desktop_name(&mut self, _name: &str) {}

    /// Stops listening and disconnects every viewer.
    fn shutdown(&mut self);
}

#[cfg(test)]
pub(crate) mod mock {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::error::VideoError;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Start {
            width: u16,
            height: u16,
            desktop_name: String,
            view_only: bool,
        },
        NewFramebuffer { width: u16, height: u16 },
        MarkRect(u16, u16, u16, u16),
        SetColourMap { first: usize, count: usize },
        SetCursor { width: u16, height: u16 },
        SetDesktopName(String),
        Shutdown,
    }

    #[derive(Default)]
    pub struct Recorded {
        pub calls: Vec<Call>,
        pub input: Option<InputHandler>,
        pub cursor: Option<Arc<CursorImage>>,
        pub fail_start: bool,
        pub fail_new_framebuffer: bool,
    }

    /// Records every call; tests keep a clone of `state` to inspect it.
    #[derive(Default, Clone)]
    pub struct RecordingBackend {
        pub state: Arc<Mutex<Recorded>>,
    }

    impl RecordingBackend {
        pub fn calls(&self) -> Vec<Call> {
            self.state.lock().unwrap().calls.clone()
        }

        pub fn cursor(&self) -> Option<Arc<CursorImage>> {
            self.state.lock().unwrap().cursor.clone()
        }

        /// Simulates a callback from the server thread.
        pub fn remote(&self, f: impl FnOnce(&mut InputHandler)) {
            let mut state = self.state.lock().unwrap();
            f(state.input.as_mut().expect("no input handler registered"));
        }

        fn record(&self, call: Call) {
            self.state.lock().unwrap().calls.push(call);
        }
    }

    impl RfbBackend for RecordingBackend {
        fn start(&mut self, session: SessionStart<'_>) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            if state.fail_start {
                return Err(VideoError::Backend("listen failed".into()));
            }
            let fb = session.framebuffer.read().unwrap();
            state.calls.push(Call::Start {
                width: fb.width(),
                height: fb.height(),
                desktop_name: session.desktop_name.to_string(),
                view_only: session.input.is_none(),
            });
            state.cursor = Some(session.cursor);
            state.input = session.input;
            Ok(())
        }

        fn new_framebuffer(&mut self, framebuffer: &SharedFramebuffer) -> Result<()> {
            if self.state.lock().unwrap().fail_new_framebuffer {
                return Err(VideoError::Backend("resize failed".into()));
            }
            let fb = framebuffer.read().unwrap();
            self.record(Call::NewFramebuffer {
                width: fb.width(),
                height: fb.height(),
            });
            Ok(())
        }

        fn mark_rect_modified(&self, x1: u16, y1: u16, x2: u16, y2: u16) {
            self.record(Call::MarkRect(x1, y1, x2, y2));
        }

        fn set_colour_map(&self, first: usize, count: usize) {
            self.record(Call::SetColourMap { first, count });
        }

        fn set_cursor(&mut self, cursor: Arc<CursorImage>) {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::SetCursor {
                width: cursor.width,
                height: cursor.height,
            });
            state.cursor = Some(cursor);
        }

        fn set_desktop_name(&mut self, name: &str) {
            self.record(Call::SetDesktopName(name.to_string()));
        }

        fn shutdown(&mut self) {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Shutdown);
            state.input = None;
        }
    }
}
