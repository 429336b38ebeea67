//! Absolute pointer reports to motion and button events.

use log::trace;

use crate::host::{ButtonState, HostEvent};

/// Remembers the button mask of the previous pointer report for one session.
#[derive(Debug, Default, Clone)]
pub struct PointerTracker {
    last_mask: u8,
}

impl PointerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mask reported by the most recent callback.
    pub fn last_mask(&self) -> u8 {
        self.last_mask
    }

    /// Converts one pointer report into host events, passing each to `emit`.
    ///
    /// Motion comes first and carries the previous mask. Releases are then
    /// emitted before presses, each in ascending bit order.
    pub fn update(&mut self, button_mask: u8, x: u16, y: u16, mut emit: impl FnMut(HostEvent)) {
        emit(HostEvent::MouseMotion {
            buttons: self.last_mask,
            x,
            y,
        });

        let changed = self.last_mask ^ button_mask;
        if changed != 0 {
            let released = changed & self.last_mask;
            let pressed = changed & button_mask;
            trace!("pointer buttons released {:#04x} pressed {:#04x}", released, pressed);

            for (bits, state) in [(released, ButtonState::Released), (pressed, ButtonState::Pressed)] {
                for bit in 0..u8::BITS {
                    if bits & (1 << bit) != 0 {
                        emit(HostEvent::MouseButton {
                            button: bit as u8 + 1,
                            state,
                        });
                    }
                }
            }
        }

        self.last_mask = button_mask;
    }
}
