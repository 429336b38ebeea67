//! The host library's side of the video backend contract.
//!
//! The host drives a video device through the [`VideoDriver`] capability set
//! and receives input as [`HostEvent`]s. Key symbols, modifier bits and
//! pixel formats here are in the host's native model, which the VNC
//! components translate to and from.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bitflags::bitflags;

use crate::error::{Result, VideoError};
use crate::vnc::cursor::WmCursor;
use crate::vnc::framebuffer::Framebuffer;

/// Native key symbols. Printable keys use their ASCII value.
pub mod key {
    pub const UNKNOWN: u32 = 0;
    pub const BACKSPACE: u32 = 8;
    pub const TAB: u32 = 9;
    pub const CLEAR: u32 = 12;
    pub const RETURN: u32 = 13;
    pub const PAUSE: u32 = 19;
    pub const ESCAPE: u32 = 27;
    pub const SPACE: u32 = 32;
    pub const A: u32 = 97;
    pub const Z: u32 = 122;
    pub const DELETE: u32 = 127;

    // Numeric keypad
    pub const KP0: u32 = 256;
    pub const KP9: u32 = 265;
    pub const KP_PERIOD: u32 = 266;
    pub const KP_DIVIDE: u32 = 267;
    pub const KP_MULTIPLY: u32 = 268;
    pub const KP_MINUS: u32 = 269;
    pub const KP_PLUS: u32 = 270;
    pub const KP_ENTER: u32 = 271;

    // Arrows and the navigation cluster
    pub const UP: u32 = 273;
    pub const DOWN: u32 = 274;
    pub const RIGHT: u32 = 275;
    pub const LEFT: u32 = 276;
    pub const INSERT: u32 = 277;
    pub const HOME: u32 = 278;
    pub const END: u32 = 279;
    pub const PAGEUP: u32 = 280;
    pub const PAGEDOWN: u32 = 281;

    // Function keys, contiguous
    pub const F1: u32 = 282;
    pub const F15: u32 = 296;

    // Modifier and lock keys
    pub const NUMLOCK: u32 = 300;
    pub const CAPSLOCK: u32 = 301;
    pub const SCROLLOCK: u32 = 302;
    pub const RSHIFT: u32 = 303;
    pub const LSHIFT: u32 = 304;
    pub const RCTRL: u32 = 305;
    pub const LCTRL: u32 = 306;
    pub const RALT: u32 = 307;
    pub const LALT: u32 = 308;
    pub const RMETA: u32 = 309;
    pub const LMETA: u32 = 310;
    pub const LSUPER: u32 = 311;
    pub const RSUPER: u32 = 312;
    pub const MODE: u32 = 313;
    pub const COMPOSE: u32 = 314;

    // Miscellaneous function keys
    pub const HELP: u32 = 315;
    pub const PRINT: u32 = 316;
    pub const SYSREQ: u32 = 317;
    pub const BREAK: u32 = 318;
    pub const MENU: u32 = 319;
    pub const EURO: u32 = 321;
    pub const UNDO: u32 = 322;
}

bitflags! {
    /// Native keyboard modifier state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u16 {
        const LSHIFT = 0x0001;
        const RSHIFT = 0x0002;
        const LCTRL  = 0x0040;
        const RCTRL  = 0x0080;
        const LALT   = 0x0100;
        const RALT   = 0x0200;
        const LMETA  = 0x0400;
        const RMETA  = 0x0800;
        const NUM    = 0x1000;
        const CAPS   = 0x2000;
        const MODE   = 0x4000;
        const SHIFT  = Self::LSHIFT.bits() | Self::RSHIFT.bits();
    }
}

/// Whether a key or button went down or up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonState {
    Pressed,
    Released,
}

/// A keyboard event in the host's model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub state: ButtonState,
    pub sym: u32,
    pub modifiers: Modifiers,
    /// Text produced by the key, `0` when not printable and on release.
    pub unicode: u32,
    pub scancode: u8,
}

/// An input event queued for the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    Key(KeyEvent),
    /// Absolute pointer motion. `buttons` is the button mask held while moving.
    MouseMotion { buttons: u8, x: u16, y: u16 },
    /// A button transition. Buttons are numbered from 1 (left, middle, right,
    /// wheel up, wheel down, ...).
    MouseButton { button: u8, state: ButtonState },
}

/// An RGB palette entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// A screen rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: u16,
    pub y: u16,
    pub w: u16,
    pub h: u16,
}

impl Rect {
    pub fn new(x: u16, y: u16, w: u16, h: u16) -> Self {
        Self { x, y, w, h }
    }
}

/// Answer to a mode enumeration query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeList {
    /// Any resolution is accepted at this depth.
    Any,
    /// This depth is not offered.
    None,
}

/// Pixel layout of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    pub bytes_per_pixel: u8,
    pub r_mask: u32,
    pub g_mask: u32,
    pub b_mask: u32,
    pub r_shift: u8,
    pub g_shift: u8,
    pub b_shift: u8,
}

impl PixelFormat {
    /// Derives the default layout for a depth, as the host does when no
    /// explicit channel masks are requested.
    pub fn for_depth(bits_per_pixel: u8) -> Result<Self> {
        let (r_mask, g_mask, b_mask) = match bits_per_pixel {
            1..=8 => (0, 0, 0),
            12 => (0x0F00, 0x00F0, 0x000F),
            15 => (0x7C00, 0x03E0, 0x001F),
            16 => (0xF800, 0x07E0, 0x001F),
            24 | 32 => (0x00FF_0000, 0x0000_FF00, 0x0000_00FF),
            other => return Err(VideoError::UnsupportedDepth(other)),
        };
        Ok(Self {
            bits_per_pixel,
            bytes_per_pixel: bits_per_pixel.div_ceil(8),
            r_mask,
            g_mask,
            b_mask,
            r_shift: mask_shift(r_mask),
            g_shift: mask_shift(g_mask),
            b_shift: mask_shift(b_mask),
        })
    }

    /// True when pixels index a palette.
    pub fn is_indexed(&self) -> bool {
        self.bits_per_pixel <= 8
    }
}

fn mask_shift(mask: u32) -> u8 {
    if mask == 0 {
        0
    } else {
        mask.trailing_zeros() as u8
    }
}

/// Shared pixel storage of the screen surface.
pub type SharedFramebuffer = Arc<RwLock<Framebuffer>>;

/// The screen surface handed back by a mode set.
#[derive(Debug, Clone)]
pub struct Surface {
    pub width: u16,
    pub height: u16,
    /// Bytes per row.
    pub pitch: usize,
    pub format: PixelFormat,
    /// The live framebuffer; `None` once the device has released it.
    pub pixels: Option<SharedFramebuffer>,
}

impl Surface {
    /// Locks the pixels for writing.
    pub fn lock(&self) -> Option<RwLockWriteGuard<'_, Framebuffer>> {
        self.pixels.as_ref()?.write().ok()
    }

    /// Locks the pixels for reading.
    pub fn read(&self) -> Option<RwLockReadGuard<'_, Framebuffer>> {
        self.pixels.as_ref()?.read().ok()
    }
}

/// The capability set a video backend offers to the host library.
///
/// Hardware surface slots have defaults: the backend exposes no hardware
/// surfaces besides the screen.
pub trait VideoDriver {
    /// Short driver name used for selection.
    fn name(&self) -> &'static str;

    /// Prepares the device and returns the initial pixel format.
    fn video_init(&mut self) -> Result<PixelFormat>;

    /// Reports whether modes at `format`'s depth are available.
    fn list_modes(&self, format: &PixelFormat) -> ModeList;

    /// Sets the display mode, returning the configured screen surface.
    fn set_video_mode(&mut self, width: u16, height: u16, bits_per_pixel: u8) -> Result<&Surface>;

    /// Updates palette entries starting at `first`.
    fn set_colors(&mut self, first: usize, colors: &[Color]) -> bool;

    /// Announces that the given regions of the screen changed.
    fn update_rects(&self, rects: &[Rect]);

    fn set_caption(&mut self, title: &str, icon: &str);

    /// Builds a cursor from packed monochrome data and mask bitmaps.
    fn create_wm_cursor(
        &mut self,
        data: &[u8],
        mask: &[u8],
        width: u16,
        height: u16,
        hot_x: u16,
        hot_y: u16,
    ) -> Result<WmCursor>;

    /// Shows `cursor`, or hides the pointer when `None`.
    fn show_wm_cursor(&mut self, cursor: Option<&WmCursor>) -> bool;

    fn free_wm_cursor(&mut self, cursor: WmCursor);

    fn pump_events(&mut self);

    fn video_quit(&mut self);

    fn alloc_hw_surface(&mut self, _surface: &Surface) -> bool {
        false
    }

    fn free_hw_surface(&mut self, _surface: &Surface) {}

    fn lock_hw_surface(&mut self, _surface: &Surface) -> bool {
        true
    }

    fn unlock_hw_surface(&mut self, _surface: &Surface) {}
}
