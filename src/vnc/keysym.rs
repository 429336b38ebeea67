//! Remote keysym to native key translation.
//!
//! RFB clients report keys as X11 keysyms. Most printable keysyms coincide
//! with the host's native symbols, so anything not covered here passes
//! through unchanged. Modifier, control and keypad keysyms live in the
//! private `0xFFxx` range and are remapped through [`KEYSYM_MAP`]; letters,
//! keypad digits and function keys are remapped arithmetically afterwards.

use std::collections::HashMap;

use log::{trace, warn};
use once_cell::sync::Lazy;

use crate::host::{key, ButtonState, KeyEvent, Modifiers};

/// X11 keysym values used by the translator.
pub mod xk {
    pub const BACKSPACE: u32 = 0xff08;
    pub const TAB: u32 = 0xff09;
    pub const CLEAR: u32 = 0xff0b;
    pub const RETURN: u32 = 0xff0d;
    pub const PAUSE: u32 = 0xff13;
    pub const SCROLL_LOCK: u32 = 0xff14;
    pub const SYS_REQ: u32 = 0xff15;
    pub const ESCAPE: u32 = 0xff1b;
    pub const MULTI_KEY: u32 = 0xff20;
    pub const HOME: u32 = 0xff50;
    pub const LEFT: u32 = 0xff51;
    pub const UP: u32 = 0xff52;
    pub const RIGHT: u32 = 0xff53;
    pub const DOWN: u32 = 0xff54;
    pub const PAGE_UP: u32 = 0xff55;
    pub const PAGE_DOWN: u32 = 0xff56;
    pub const END: u32 = 0xff57;
    pub const PRINT: u32 = 0xff61;
    pub const INSERT: u32 = 0xff63;
    pub const UNDO: u32 = 0xff65;
    pub const MENU: u32 = 0xff67;
    pub const HELP: u32 = 0xff6a;
    pub const BREAK: u32 = 0xff6b;
    pub const MODE_SWITCH: u32 = 0xff7e;
    pub const NUM_LOCK: u32 = 0xff7f;
    pub const KP_ENTER: u32 = 0xff8d;
    pub const KP_MULTIPLY: u32 = 0xffaa;
    pub const KP_ADD: u32 = 0xffab;
    pub const KP_SUBTRACT: u32 = 0xffad;
    pub const KP_DECIMAL: u32 = 0xffae;
    pub const KP_DIVIDE: u32 = 0xffaf;
    pub const KP_0: u32 = 0xffb0;
    pub const KP_9: u32 = 0xffb9;
    pub const F1: u32 = 0xffbe;
    pub const F15: u32 = 0xffcc;
    pub const SHIFT_L: u32 = 0xffe1;
    pub const SHIFT_R: u32 = 0xffe2;
    pub const CONTROL_L: u32 = 0xffe3;
    pub const CONTROL_R: u32 = 0xffe4;
    pub const CAPS_LOCK: u32 = 0xffe5;
    pub const META_L: u32 = 0xffe7;
    pub const META_R: u32 = 0xffe8;
    pub const ALT_L: u32 = 0xffe9;
    pub const ALT_R: u32 = 0xffea;
    pub const SUPER_L: u32 = 0xffeb;
    pub const SUPER_R: u32 = 0xffec;
    pub const DELETE: u32 = 0xffff;
    pub const EURO_SIGN: u32 = 0x20ac;
    pub const UPPER_A: u32 = 0x0041;
    pub const UPPER_Z: u32 = 0x005a;
    pub const LOWER_A: u32 = 0x0061;
}

/// Keysyms above this value are vendor or private codes. They are only
/// forwarded when something below maps them to a native symbol.
pub const HIGH_KEYSYM_THRESHOLD: u32 = 0xF000;

/// A native symbol and, for printable keypad operators, its text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub sym: u32,
    pub unicode: Option<u32>,
}

const fn plain(sym: u32) -> Mapping {
    Mapping { sym, unicode: None }
}

const fn printable(sym: u32, unicode: u32) -> Mapping {
    Mapping {
        sym,
        unicode: Some(unicode),
    }
}

/// Keysyms whose native symbol differs from the keysym value.
pub static KEYSYM_MAP: Lazy<HashMap<u32, Mapping>> = Lazy::new(|| {
    HashMap::from([
        (xk::SHIFT_L, plain(key::LSHIFT)),
        (xk::SHIFT_R, plain(key::RSHIFT)),
        (xk::CONTROL_L, plain(key::LCTRL)),
        (xk::CONTROL_R, plain(key::RCTRL)),
        (xk::META_L, plain(key::LMETA)),
        (xk::META_R, plain(key::RMETA)),
        (xk::ALT_L, plain(key::LALT)),
        (xk::ALT_R, plain(key::RALT)),
        (xk::SUPER_L, plain(key::LSUPER)),
        (xk::SUPER_R, plain(key::RSUPER)),
        (xk::ESCAPE, plain(key::ESCAPE)),
        (xk::BACKSPACE, plain(key::BACKSPACE)),
        (xk::RETURN, plain(key::RETURN)),
        (xk::SYS_REQ, plain(key::SYSREQ)),
        (xk::PAUSE, plain(key::PAUSE)),
        (xk::TAB, plain(key::TAB)),
        (xk::CLEAR, plain(key::CLEAR)),
        (xk::MENU, plain(key::MENU)),
        (xk::EURO_SIGN, plain(key::EURO)),
        (xk::UNDO, plain(key::UNDO)),
        (xk::PRINT, plain(key::PRINT)),
        (xk::HELP, plain(key::HELP)),
        (xk::BREAK, plain(key::BREAK)),
        (xk::MODE_SWITCH, plain(key::MODE)),
        (xk::MULTI_KEY, plain(key::COMPOSE)),
        (xk::INSERT, plain(key::INSERT)),
        (xk::DELETE, plain(key::DELETE)),
        (xk::HOME, plain(key::HOME)),
        (xk::END, plain(key::END)),
        (xk::PAGE_UP, plain(key::PAGEUP)),
        (xk::PAGE_DOWN, plain(key::PAGEDOWN)),
        (xk::LEFT, plain(key::LEFT)),
        (xk::RIGHT, plain(key::RIGHT)),
        (xk::UP, plain(key::UP)),
        (xk::DOWN, plain(key::DOWN)),
        (xk::NUM_LOCK, plain(key::NUMLOCK)),
        (xk::CAPS_LOCK, plain(key::CAPSLOCK)),
        (xk::SCROLL_LOCK, plain(key::SCROLLOCK)),
        (xk::KP_DECIMAL, printable(key::KP_PERIOD, 0x002E)),
        (xk::KP_DIVIDE, printable(key::KP_DIVIDE, 0x00F7)),
        (xk::KP_MULTIPLY, printable(key::KP_MULTIPLY, 0x00D7)),
        (xk::KP_SUBTRACT, printable(key::KP_MINUS, 0x2212)),
        (xk::KP_ADD, printable(key::KP_PLUS, 0x002B)),
        (xk::KP_ENTER, printable(key::KP_ENTER, 0x000D)),
    ])
});

/// Translates a remote keysym into a native key event.
///
/// Returns `None` when the keysym is in the private range and nothing maps
/// it; such codes are dropped rather than forwarded.
pub fn translate(keysym: u32, down: bool) -> Option<KeyEvent> {
    let mut modifiers = Modifiers::empty();
    let mut unicode = None;
    let mut sym = match KEYSYM_MAP.get(&keysym) {
        Some(mapping) => {
            unicode = mapping.unicode;
            Some(mapping.sym)
        }
        None => None,
    };

    // Case is a separate symbol remotely but a modifier natively.
    if (xk::UPPER_A..=xk::UPPER_Z).contains(&keysym) {
        sym = Some(keysym + (xk::LOWER_A - xk::UPPER_A));
        modifiers |= Modifiers::SHIFT;
    }

    if (xk::KP_0..=xk::KP_9).contains(&keysym) {
        let digit = keysym - xk::KP_0;
        sym = Some(key::KP0 + digit);
        unicode = Some(u32::from(b'0') + digit);
    }

    if (xk::F1..=xk::F15).contains(&keysym) {
        sym = Some(keysym - xk::F1 + key::F1);
    }

    let sym = match sym {
        Some(sym) => sym,
        None if keysym > HIGH_KEYSYM_THRESHOLD => {
            warn!("Dropping unknown high keysym {:#x}", keysym);
            return None;
        }
        None => keysym,
    };

    let unicode = if !down {
        0
    } else if let Some(text) = unicode {
        text
    } else if keysym > HIGH_KEYSYM_THRESHOLD {
        0
    } else {
        keysym
    };

    trace!("keysym {:#x} -> sym {} unicode {:#x}", keysym, sym, unicode);

    Some(KeyEvent {
        state: if down {
            ButtonState::Pressed
        } else {
            ButtonState::Released
        },
        sym,
        modifiers,
        unicode,
        scancode: (keysym & 0xFF) as u8,
    })
}
