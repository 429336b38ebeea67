//! The VNC video device.
//!
//! [`VncVideoDevice`] implements the host's [`VideoDriver`] slots on top of an
//! [`RfbBackend`]. It owns the framebuffer and the server session, starts the
//! session on the first mode set and reconfigures it on later ones, and
//! registers the input callbacks that feed the host event queue.
//!
//! # Session lifecycle
//!
//! ```text
//! Uninitialized --set_video_mode--> Running --set_video_mode--> Running
//!       ^                              |
//!       +---------- video_quit --------+
//! ```

use std::mem;
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, info, trace, warn};
use tokio::sync::mpsc;

use crate::config::{Environment, VncConfig, DEFAULT_REPORTED_DEPTH};
use crate::error::Result;
use crate::host::{
    Color, HostEvent, ModeList, PixelFormat, Rect, SharedFramebuffer, Surface, VideoDriver,
};
use crate::vnc::backend::{RfbBackend, SessionStart};
use crate::vnc::cursor::{CursorImage, WmCursor};
use crate::vnc::events::InputHandler;
use crate::vnc::framebuffer::Framebuffer;

/// Name the host selects this driver by.
pub const DRIVER_NAME: &str = "vnc";
/// Human-readable driver description.
pub const DRIVER_DESCRIPTION: &str = "RFB (VNC) server video driver";

/// Depth reported before the first mode set.
const INITIAL_DEPTH: u8 = 8;

enum Session {
    Uninitialized,
    Running { framebuffer: SharedFramebuffer },
}

/// A video device that serves the host's screen to VNC viewers.
pub struct VncVideoDevice<B: RfbBackend> {
    backend: B,
    /// Validated once; an invalid configuration fails the first mode set.
    settings: Result<VncConfig>,
    session: Session,
    surface: Option<Surface>,
    hidden_cursor: Arc<CursorImage>,
    caption: String,
    events: mpsc::UnboundedSender<HostEvent>,
}

impl<B: RfbBackend> VncVideoDevice<B> {
    /// Creates a device reading its options from `env`.
    ///
    /// Translated input arrives on the returned receiver.
    pub fn new(backend: B, env: &Environment) -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let settings = VncConfig::from_env(env);
        if let Err(e) = &settings {
            warn!("Invalid VNC configuration, mode sets will fail: {}", e);
        }

        let (events, event_rx) = mpsc::unbounded_channel();
        let device = Self {
            backend,
            settings,
            session: Session::Uninitialized,
            surface: None,
            hidden_cursor: Arc::new(CursorImage::empty()),
            caption: String::from(DRIVER_DESCRIPTION),
            events,
        };
        (device, event_rx)
    }

    /// Creates a device configured from the process environment and installs
    /// the logger.
    pub fn from_env(backend: B) -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        crate::init_logging();
        Self::new(backend, &Environment::process())
    }

    /// True when remote input and cursor changes are ignored.
    pub fn view_only(&self) -> bool {
        self.settings.as_ref().is_ok_and(|c| c.view_only)
    }

    pub fn is_running(&self) -> bool {
        matches!(self.session, Session::Running { .. })
    }

    /// The screen surface of the current mode.
    pub fn surface(&self) -> Option<&Surface> {
        self.surface.as_ref()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Starts the server for the first mode.
    fn start_session(&mut self, framebuffer: Framebuffer) -> Result<SharedFramebuffer> {
        let config = self.settings.clone()?;
        let framebuffer = Arc::new(RwLock::new(framebuffer));

        // View-only sessions never register input callbacks.
        let input = if config.view_only {
            info!("View-only mode, remote input is ignored");
            None
        } else {
            debug!("Hooking up VNC input handlers");
            Some(InputHandler::new(self.events.clone()))
        };

        self.backend.start(SessionStart {
            framebuffer: Arc::clone(&framebuffer),
            listen: &config.listen,
            desktop_name: &self.caption,
            cursor: Arc::clone(&self.hidden_cursor),
            input,
        })?;

        info!("VNC server started: {:?}", config.listen.ports);
        self.session = Session::Running {
            framebuffer: Arc::clone(&framebuffer),
        };
        Ok(framebuffer)
    }
}

impl<B: RfbBackend> VideoDriver for VncVideoDevice<B> {
    fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn video_init(&mut self) -> Result<PixelFormat> {
        debug!("Initializing VNC video device");
        self.hidden_cursor = Arc::new(CursorImage::empty());
        PixelFormat::for_depth(INITIAL_DEPTH)
    }

    fn list_modes(&self, format: &PixelFormat) -> ModeList {
        let depth = self
            .settings
            .as_ref()
            .map_or(DEFAULT_REPORTED_DEPTH, |c| c.reported_depth);
        if depth == 0 || depth == format.bits_per_pixel {
            ModeList::Any
        } else {
            ModeList::None
        }
    }

    fn set_video_mode(&mut self, width: u16, height: u16, bits_per_pixel: u8) -> Result<&Surface> {
        info!("Setting mode {}x{}x{}", width, height, bits_per_pixel);

        let format = PixelFormat::for_depth(bits_per_pixel)?;
        // Allocate before touching the session so a failure leaves it intact.
        let framebuffer = Framebuffer::allocate(width, height, &format)?;

        let shared = match &self.session {
            Session::Running { framebuffer: current } => {
                let current = Arc::clone(current);
                let previous = mem::replace(
                    &mut *current.write().unwrap_or_else(PoisonError::into_inner),
                    framebuffer,
                );
                if let Err(e) = self.backend.new_framebuffer(&current) {
                    warn!("Server rejected the new mode, keeping the current one: {}", e);
                    *current.write().unwrap_or_else(PoisonError::into_inner) = previous;
                    return Err(e);
                }
                drop(previous);
                debug!("VNC framebuffer reconfigured");
                current
            }
            Session::Uninitialized => self.start_session(framebuffer)?,
        };

        let surface = Surface {
            width,
            height,
            pitch: usize::from(width) * usize::from(format.bytes_per_pixel),
            format,
            pixels: Some(shared),
        };
        Ok(self.surface.insert(surface))
    }

    fn set_colors(&mut self, first: usize, colors: &[Color]) -> bool {
        let Session::Running { framebuffer } = &self.session else {
            warn!("Palette update without an active VNC session");
            return false;
        };

        let mut guard = framebuffer.write().unwrap_or_else(PoisonError::into_inner);
        if guard.is_true_colour() {
            return true;
        }
        debug!(
            "Updating colours {}..{} of {}",
            first,
            first.saturating_add(colors.len()),
            guard.palette_len()
        );
        if let Err(e) = guard.set_palette(first, colors) {
            warn!("Rejected palette update: {}", e);
            return false;
        }
        drop(guard);

        self.backend.set_colour_map(first, colors.len());
        true
    }

    fn update_rects(&self, rects: &[Rect]) {
        if !self.is_running() {
            return;
        }
        for r in rects {
            self.backend.mark_rect_modified(
                r.x,
                r.y,
                r.x.saturating_add(r.w),
                r.y.saturating_add(r.h),
            );
        }
    }

    fn set_caption(&mut self, title: &str, _icon: &str) {
        self.caption = title.to_string();
        if self.is_running() {
            self.backend.set_desktop_name(title);
        }
    }

    fn create_wm_cursor(
        &mut self,
        data: &[u8],
        mask: &[u8],
        width: u16,
        height: u16,
        hot_x: u16,
        hot_y: u16,
    ) -> Result<WmCursor> {
        let image = CursorImage::from_bitmaps(data, mask, width, height, hot_x, hot_y)?;
        Ok(WmCursor::new(image))
    }

    fn show_wm_cursor(&mut self, cursor: Option<&WmCursor>) -> bool {
        // Claim success so the host doesn't fall back to drawing the cursor
        // into the framebuffer.
        if self.view_only() {
            return true;
        }
        if !self.is_running() {
            return false;
        }
        let image = match cursor {
            Some(cursor) => Arc::clone(cursor.image()),
            None => Arc::clone(&self.hidden_cursor),
        };
        self.backend.set_cursor(image);
        true
    }

    fn free_wm_cursor(&mut self, cursor: WmCursor) {
        cursor.release();
    }

    fn pump_events(&mut self) {
        // Input arrives from the server's own thread.
        trace!("pump_events");
    }

    fn video_quit(&mut self) {
        let Session::Running { framebuffer } = mem::replace(&mut self.session, Session::Uninitialized)
        else {
            return;
        };

        info!("Stopping VNC server");
        self.backend.shutdown();

        if let Some(surface) = self.surface.as_mut() {
            surface.pixels = None;
        }
        // An update in flight on the server thread may still hold a reference;
        // the buffer is freed when the last one goes.
        debug!(
            "Releasing framebuffer ({} references left)",
            Arc::strong_count(&framebuffer) - 1
        );
        drop(framebuffer);
    }
}

impl<B: RfbBackend> Drop for VncVideoDevice<B> {
    fn drop(&mut self) {
        self.video_quit();
    }
}
