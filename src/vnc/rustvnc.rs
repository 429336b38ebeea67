//! [`RfbBackend`] served by the `rustvncserver` crate.
//!
//! The server runs on a process-wide Tokio runtime. Each session gets its own
//! shutdown signal, a listener task and an event task that feeds remote input
//! into the registered [`InputHandler`].
//!
//! `rustvncserver` stores RGBA32, so every dirty region is read back from the
//! host-format framebuffer before it is handed over.

use std::future::Future;
use std::io;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use once_cell::sync::OnceCell;
use rustvncserver::server::{ServerEvent, VncServer};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::{broadcast, mpsc};

use crate::config::{ListenConfig, PortSelection, SERVER_PORT_OFFSET};
use crate::error::{Result, VideoError};
use crate::host::{Rect, SharedFramebuffer};
use crate::video::VncVideoDevice;
use crate::vnc::backend::{RfbBackend, SessionStart};
use crate::vnc::cursor::CursorImage;
use crate::vnc::events::InputHandler;

/// Global Tokio runtime for VNC sessions.
static VNC_RUNTIME: OnceCell<Runtime> = OnceCell::new();

/// Displays tried when no port is configured.
const AUTO_PORT_DISPLAYS: u16 = 100;

/// Upper bound on waiting for viewers to be disconnected.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn get_or_init_vnc_runtime() -> Result<&'static Runtime> {
    VNC_RUNTIME.get_or_try_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("vnc-server")
            .build()
            .map_err(|e| VideoError::Backend(format!("failed to build VNC runtime: {}", e)))
    })
}

/// Runs `task` on the VNC runtime and waits for it.
///
/// When called from inside a Tokio context, blocking would panic, so the task
/// is spawned instead and its failure is only logged.
fn run_on_vnc_runtime<F>(what: &'static str, task: F) -> std::result::Result<(), String>
where
    F: Future<Output = std::result::Result<(), String>> + Send + 'static,
{
    let runtime = get_or_init_vnc_runtime().map_err(|e| e.to_string())?;
    if Handle::try_current().is_ok() {
        trace!("{} deferred, already inside a Tokio context", what);
        runtime.spawn(async move {
            if let Err(e) = task.await {
                error!("Failed to {}: {}", what, e);
            }
        });
        return Ok(());
    }
    runtime.block_on(task)
}

/// A live `rustvncserver` session.
struct Running {
    server: Arc<VncServer>,
    framebuffer: SharedFramebuffer,
    shutdown: broadcast::Sender<()>,
}

/// Serves the device framebuffer with `rustvncserver`.
///
/// Every call may be made from any thread, including runtime worker threads:
/// server work is then queued on the VNC runtime instead of awaited.
#[derive(Default)]
pub struct RustVncBackend {
    session: Option<Running>,
    cursor: Option<Arc<CursorImage>>,
}

impl RustVncBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes `rect` of the framebuffer to the server.
    fn push_region(&self, rect: Rect) {
        let Some(running) = &self.session else {
            return;
        };
        let (rgba, rect) = {
            let fb = running.framebuffer.read().unwrap_or_else(PoisonError::into_inner);
            let Some(rect) = fb.clip(rect) else {
                return;
            };
            (fb.to_rgba(rect), rect)
        };

        let server = Arc::clone(&running.server);
        let update = async move {
            server
                .framebuffer()
                .update_cropped(&rgba, rect.x, rect.y, rect.w, rect.h)
                .await
        };
        if let Err(e) = run_on_vnc_runtime("update framebuffer", update) {
            error!("Failed to update framebuffer: {}", e);
        }
    }

    /// Pushes the whole framebuffer, e.g. after a palette change.
    fn push_all(&self) {
        self.push_region(Rect::new(0, 0, u16::MAX, u16::MAX));
    }
}

/// Ports to try, in order.
fn candidate_ports(listen: &ListenConfig) -> Vec<u16> {
    if listen.iface.is_some() || listen.iface6.is_some() {
        warn!("Listen interface overrides are not supported, listening on all interfaces");
    }
    if !listen.always_shared {
        warn!("Exclusive sessions are not supported, viewers will share the display");
    }

    match listen.ports {
        PortSelection::Fixed { v4, v6 } => {
            if v4 != v6 {
                warn!("Separate IPv6 port {} is not supported, using {}", v6, v4);
            }
            vec![v4]
        }
        PortSelection::Auto => (0..AUTO_PORT_DISPLAYS)
            .map(|display| SERVER_PORT_OFFSET + display)
            .collect(),
    }
}

/// Listens on the first port that can be bound.
///
/// `listen` only returns on a bind failure; a taken port moves on to the
/// next candidate.
async fn serve(server: Arc<VncServer>, ports: Vec<u16>) {
    for port in ports {
        info!("Listening on display {}", port - SERVER_PORT_OFFSET);
        match server.listen(port).await {
            Ok(()) => return,
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                warn!("Port {} is taken, trying the next display", port);
            }
            Err(e) => {
                error!("VNC server listen error on port {}: {}", port, e);
                return;
            }
        }
    }
    error!("No free VNC display");
}

/// Forwards server events to the input handler until shutdown.
fn spawn_event_handler(
    runtime: &Runtime,
    mut event_rx: mpsc::UnboundedReceiver<ServerEvent>,
    mut input: Option<InputHandler>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    runtime.spawn(async move {
        debug!("VNC event handler started");
        loop {
            tokio::select! {
                Some(event) = event_rx.recv() => handle_server_event(event, input.as_mut()),
                _ = shutdown_rx.recv() => {
                    debug!("Event handler received shutdown signal");
                    break;
                }
                else => break,
            }
        }
        debug!("VNC event handler stopped");
    });
}

fn handle_server_event(event: ServerEvent, input: Option<&mut InputHandler>) {
    match event {
        ServerEvent::ClientConnected { client_id } => {
            info!("Client {} connected", client_id);
        }
        ServerEvent::ClientDisconnected { client_id } => {
            info!("Client {} disconnected", client_id);
        }
        ServerEvent::KeyPress { down, key, .. } => match input {
            Some(input) => input.key_event(down, key),
            None => trace!("view-only, ignoring key {:#x}", key),
        },
        ServerEvent::PointerMove {
            x, y, button_mask, ..
        } => match input {
            Some(input) => input.pointer_event(button_mask, x, y),
            None => trace!("view-only, ignoring pointer at {},{}", x, y),
        },
        ServerEvent::CutText { client_id, text } => {
            // The host has no clipboard slot.
            debug!("Ignoring {} bytes of cut text from client {}", text.len(), client_id);
        }
        ServerEvent::RfbMessageSent {
            client_id, success, ..
        } => {
            debug!("Repeater ID sent for client {} (success: {})", client_id, success);
        }
        ServerEvent::HandshakeComplete {
            client_id, success, ..
        } => {
            debug!("Repeater handshake for client {} (success: {})", client_id, success);
        }
    }
}

impl RfbBackend for RustVncBackend {
    fn start(&mut self, session: SessionStart<'_>) -> Result<()> {
        let runtime = get_or_init_vnc_runtime()?;
        let ports = candidate_ports(session.listen);

        let (width, height) = {
            let fb = session.framebuffer.read().unwrap_or_else(PoisonError::into_inner);
            (fb.width(), fb.height())
        };
        info!("Starting VNC server: {}x{}", width, height);

        let (server, event_rx) =
            VncServer::new(width, height, session.desktop_name.to_string(), None);
        let server = Arc::new(server);
        let (shutdown, _) = broadcast::channel(4);

        spawn_event_handler(runtime, event_rx, session.input, shutdown.subscribe());

        let listener = Arc::clone(&server);
        let mut shutdown_rx = shutdown.subscribe();
        runtime.spawn(async move {
            tokio::select! {
                _ = serve(listener, ports) => {}
                _ = shutdown_rx.recv() => {
                    info!("VNC server received shutdown signal");
                }
            }
        });

        self.cursor = Some(session.cursor);
        self.session = Some(Running {
            server,
            framebuffer: session.framebuffer,
            shutdown,
        });
        self.push_all();
        Ok(())
    }

    fn new_framebuffer(&mut self, framebuffer: &SharedFramebuffer) -> Result<()> {
        let Some(running) = &mut self.session else {
            return Err(VideoError::NoSession);
        };

        let (width, height) = {
            let fb = framebuffer.read().unwrap_or_else(PoisonError::into_inner);
            (fb.width(), fb.height())
        };
        let server = Arc::clone(&running.server);
        let resize = async move { server.framebuffer().resize(width, height).await };
        run_on_vnc_runtime("resize framebuffer", resize)
            .map_err(|e| VideoError::Backend(format!("failed to resize framebuffer: {}", e)))?;
        running.framebuffer = Arc::clone(framebuffer);

        info!("Framebuffer resized to {}x{}", width, height);
        self.push_all();
        Ok(())
    }

    fn mark_rect_modified(&self, x1: u16, y1: u16, x2: u16, y2: u16) {
        self.push_region(Rect::new(
            x1,
            y1,
            x2.saturating_sub(x1),
            y2.saturating_sub(y1),
        ));
    }

    fn set_colour_map(&self, first: usize, count: usize) {
        debug!("Palette entries {}..{} changed", first, first + count);
        self.push_all();
    }

    fn set_cursor(&mut self, cursor: Arc<CursorImage>) {
        // rustvncserver draws no server-side cursor; keep the image alive
        // while it is the active one.
        trace!("Active cursor {}x{}", cursor.width, cursor.height);
        self.cursor = Some(cursor);
    }

    fn set_desktop_name(&mut self, name: &str) {
        debug!("Desktop name {:?} applies to new sessions only", name);
    }

    fn shutdown(&mut self) {
        if let Some(running) = self.session.take() {
            let _ = running.shutdown.send(());

            // Stopping the accept loop leaves connected viewers running.
            let server = Arc::clone(&running.server);
            let disconnect = async move {
                tokio::time::timeout(DISCONNECT_TIMEOUT, server.disconnect_all_clients())
                    .await
                    .map_err(|_| format!("timed out after {:?}", DISCONNECT_TIMEOUT))
            };
            if let Err(e) = run_on_vnc_runtime("disconnect clients", disconnect) {
                warn!("Failed to disconnect clients: {}", e);
            }
            info!("VNC server stopped");
        }
        self.cursor = None;
    }
}

impl VncVideoDevice<RustVncBackend> {
    /// Creates a device served by `rustvncserver`, configured from the
    /// process environment.
    pub fn with_rustvncserver() -> (Self, mpsc::UnboundedReceiver<crate::host::HostEvent>) {
        Self::from_env(RustVncBackend::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{ButtonState, HostEvent};
    use pretty_assertions::assert_eq;

    fn listen(ports: PortSelection) -> ListenConfig {
        ListenConfig {
            ports,
            iface: None,
            iface6: None,
            always_shared: true,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<HostEvent>) -> Vec<HostEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn fixed_port_is_the_only_candidate() {
        let ports = candidate_ports(&listen(PortSelection::Fixed { v4: 5901, v6: 5901 }));
        assert_eq!(ports, vec![5901]);
    }

    #[test]
    fn separate_v6_port_falls_back_to_v4() {
        let ports = candidate_ports(&listen(PortSelection::Fixed { v4: 5903, v6: 5907 }));
        assert_eq!(ports, vec![5903]);
    }

    #[test]
    fn auto_port_tries_every_display_in_order() {
        let ports = candidate_ports(&listen(PortSelection::Auto));
        assert_eq!(ports.len(), usize::from(AUTO_PORT_DISPLAYS));
        assert_eq!(ports.first(), Some(&5900));
        assert_eq!(ports.last(), Some(&5999));
        assert!(ports.windows(2).all(|w| w[1] == w[0] + 1));
    }

    #[test]
    fn server_input_reaches_the_handler() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut input = InputHandler::new(tx);

        handle_server_event(
            ServerEvent::KeyPress {
                client_id: 1,
                down: true,
                key: 0xff0d,
            },
            Some(&mut input),
        );
        handle_server_event(
            ServerEvent::PointerMove {
                client_id: 1,
                x: 4,
                y: 5,
                button_mask: 0b001,
            },
            Some(&mut input),
        );

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], HostEvent::Key(k) if k.sym == crate::host::key::RETURN));
        assert_eq!(events[1], HostEvent::MouseMotion { buttons: 0, x: 4, y: 5 });
        assert_eq!(
            events[2],
            HostEvent::MouseButton { button: 1, state: ButtonState::Pressed }
        );
    }

    #[test]
    fn connection_and_clipboard_events_queue_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut input = InputHandler::new(tx);

        handle_server_event(ServerEvent::ClientConnected { client_id: 7 }, Some(&mut input));
        handle_server_event(
            ServerEvent::CutText {
                client_id: 7,
                text: "hello".into(),
            },
            Some(&mut input),
        );
        handle_server_event(ServerEvent::ClientDisconnected { client_id: 7 }, Some(&mut input));

        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn view_only_sessions_ignore_input() {
        handle_server_event(
            ServerEvent::KeyPress {
                client_id: 1,
                down: true,
                key: u32::from(b'a'),
            },
            None,
        );
        handle_server_event(
            ServerEvent::PointerMove {
                client_id: 1,
                x: 0,
                y: 0,
                button_mask: 0xff,
            },
            None,
        );
    }

    #[test]
    fn shutdown_disconnects_connected_viewers() {
        use std::io::Read;
        use std::net::{Ipv4Addr, TcpListener, TcpStream};

        let port = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let fb = Arc::new(std::sync::RwLock::new(
            crate::vnc::framebuffer::Framebuffer::allocate(
                16,
                16,
                &crate::host::PixelFormat::for_depth(32).unwrap(),
            )
            .unwrap(),
        ));
        let listen = listen(PortSelection::Fixed { v4: port, v6: port });

        let mut backend = RustVncBackend::new();
        backend
            .start(SessionStart {
                framebuffer: fb,
                listen: &listen,
                desktop_name: "test",
                cursor: Arc::new(CursorImage::empty()),
                input: None,
            })
            .unwrap();

        let mut viewer = (0..50)
            .find_map(|_| {
                TcpStream::connect((Ipv4Addr::LOCALHOST, port)).ok().or_else(|| {
                    std::thread::sleep(Duration::from_millis(50));
                    None
                })
            })
            .expect("server never started listening");
        viewer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut banner = [0u8; 12];
        viewer.read_exact(&mut banner).unwrap();
        assert_eq!(&banner[..4], b"RFB ");

        backend.shutdown();

        // Closed (EOF) or reset, but never left waiting for the handshake.
        let mut rest = [0u8; 1];
        match viewer.read(&mut rest) {
            Ok(n) => assert_eq!(n, 0),
            Err(e) => assert!(
                !matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut),
                "viewer still connected: {}",
                e
            ),
        }
    }

    #[test]
    fn calls_without_a_session_are_harmless() {
        let mut backend = RustVncBackend::new();
        backend.mark_rect_modified(0, 0, 10, 10);
        backend.set_colour_map(0, 16);
        backend.shutdown();

        let fb = Arc::new(std::sync::RwLock::new(
            crate::vnc::framebuffer::Framebuffer::allocate(
                8,
                8,
                &crate::host::PixelFormat::for_depth(32).unwrap(),
            )
            .unwrap(),
        ));
        assert_eq!(backend.new_framebuffer(&fb), Err(VideoError::NoSession));
    }
}
