//! Input callbacks registered with the RFB server.
//!
//! The server invokes an [`InputHandler`] from its own thread. The handler
//! never touches video state: it translates each report and queues the
//! result on the host's event channel.

use log::{debug, trace};
use tokio::sync::mpsc;

use crate::host::HostEvent;
use crate::vnc::keysym;
use crate::vnc::pointer::PointerTracker;

/// An input report from a remote viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteInput {
    Key { down: bool, keysym: u32 },
    Pointer { button_mask: u8, x: u16, y: u16 },
}

/// Translates remote input and forwards it to the host event queue.
#[derive(Debug)]
pub struct InputHandler {
    pointer: PointerTracker,
    queue: mpsc::UnboundedSender<HostEvent>,
}

impl InputHandler {
    pub fn new(queue: mpsc::UnboundedSender<HostEvent>) -> Self {
        Self {
            pointer: PointerTracker::new(),
            queue,
        }
    }

    /// Keyboard callback.
    pub fn key_event(&mut self, down: bool, keysym: u32) {
        if let Some(event) = keysym::translate(keysym, down) {
            self.push(HostEvent::Key(event));
        }
    }

    /// Pointer callback. Coordinates are absolute.
    pub fn pointer_event(&mut self, button_mask: u8, x: u16, y: u16) {
        let queue = &self.queue;
        self.pointer.update(button_mask, x, y, |event| {
            if queue.send(event).is_err() {
                trace!("host event queue closed, dropping {:?}", event);
            }
        });
    }

    pub fn handle(&mut self, input: RemoteInput) {
        match input {
            RemoteInput::Key { down, keysym } => self.key_event(down, keysym),
            RemoteInput::Pointer { button_mask, x, y } => self.pointer_event(button_mask, x, y),
        }
    }

    fn push(&self, event: HostEvent) {
        if self.queue.send(event).is_err() {
            debug!("host event queue closed, dropping {:?}", event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{key, ButtonState, Modifiers};
    use crate::vnc::keysym::xk;
    use pretty_assertions::assert_eq;

    fn drain(rx: &mut mpsc::UnboundedReceiver<HostEvent>) -> Vec<HostEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn key_reports_are_queued() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handler = InputHandler::new(tx);
        handler.handle(RemoteInput::Key { down: true, keysym: u32::from(b'B') });

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        let HostEvent::Key(event) = events[0] else {
            panic!("expected a key event, got {:?}", events[0]);
        };
        assert_eq!(event.sym, u32::from(b'b'));
        assert_eq!(event.modifiers, Modifiers::SHIFT);
        assert_eq!(event.state, ButtonState::Pressed);
    }

    #[test]
    fn dropped_keysyms_queue_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handler = InputHandler::new(tx);
        handler.key_event(true, 0xfe50);
        handler.key_event(false, xk::F1);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], HostEvent::Key(k) if k.sym == key::F1));
    }

    #[test]
    fn pointer_state_persists_between_reports() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handler = InputHandler::new(tx);
        handler.pointer_event(0b001, 3, 4);
        handler.pointer_event(0b000, 5, 6);
        assert_eq!(
            drain(&mut rx),
            vec![
                HostEvent::MouseMotion { buttons: 0, x: 3, y: 4 },
                HostEvent::MouseButton { button: 1, state: ButtonState::Pressed },
                HostEvent::MouseMotion { buttons: 0b001, x: 5, y: 6 },
                HostEvent::MouseButton { button: 1, state: ButtonState::Released },
            ]
        );
    }

    #[test]
    fn closed_queue_is_not_fatal() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut handler = InputHandler::new(tx);
        handler.key_event(true, u32::from(b'a'));
        handler.pointer_event(1, 0, 0);
    }
}
