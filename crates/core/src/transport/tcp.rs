use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::datastore::DocumentStore;
use crate::device::Device;
use crate::server::ServerConfig;
use crate::session::{Action, SessionEngine, SessionEvent};

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts with a 50ms poll interval so
/// that [`crate::server::Server::stop`] can terminate it promptly. While a
/// session is active, further connections are closed on arrival.
pub fn accept_loop(
    listener: TcpListener,
    config: Arc<ServerConfig>,
    device: Arc<dyn Device>,
    running: Arc<AtomicBool>,
    session_active: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                if session_active
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    tracing::warn!(%peer_addr, "session already active, refusing connection");
                    drop(stream);
                    continue;
                }
                if stream.set_nonblocking(false).is_err() {
                    session_active.store(false, Ordering::SeqCst);
                    continue;
                }
                let c = config.clone();
                let d = device.clone();
                let r = running.clone();
                let guard = session_active.clone();
                thread::spawn(move || {
                    handle_connection(stream, peer_addr, c, d, r);
                    guard.store(false, Ordering::SeqCst);
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// One manager connection: wire a fresh engine to the stream and pump
/// bytes until the session ends.
fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<ServerConfig>,
    device: Arc<dyn Device>,
    running: Arc<AtomicBool>,
) {
    tracing::info!(%peer_addr, "manager connected");

    if stream.set_read_timeout(Some(config.session_timeout)).is_err() {
        return;
    }

    let store = DocumentStore::new(&config.datastore_path, config.max_message_len);
    let mut engine = SessionEngine::new(store, device, config.max_message_len);

    let mut stream = stream;
    let reason = pump(&mut stream, &mut engine, &running);
    let _ = stream.shutdown(Shutdown::Both);

    tracing::info!(%peer_addr, reason, "manager disconnected");
}

/// Outcome of applying one batch of engine actions to the stream.
enum Flow {
    Continue,
    Close,
    WriteError,
}

/// Byte pump between a stream and the session engine. Returns the reason
/// for exiting. Shared by the TCP and TLS transports.
pub(crate) fn pump<S: Read + Write>(
    stream: &mut S,
    engine: &mut SessionEngine,
    running: &Arc<AtomicBool>,
) -> &'static str {
    match apply(stream, engine.on_event(SessionEvent::Connected)) {
        Flow::Continue => {}
        Flow::Close => return "session closed",
        Flow::WriteError => return "write error",
    }

    let mut buf = [0u8; 1024];
    while running.load(Ordering::SeqCst) {
        match stream.read(&mut buf) {
            Ok(0) => {
                engine.on_event(SessionEvent::Closed);
                return "connection closed by peer";
            }
            Ok(n) => match apply(stream, engine.on_event(SessionEvent::DataIn(&buf[..n]))) {
                Flow::Continue => {}
                Flow::Close => return "session closed",
                Flow::WriteError => return "write error",
            },
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                let _ = apply(stream, engine.on_event(SessionEvent::Timeout));
                return "session timed out";
            }
            Err(_) => {
                engine.on_event(SessionEvent::Closed);
                return "read error";
            }
        }
    }
    "server shutting down"
}

fn apply<S: Write>(stream: &mut S, actions: Vec<Action>) -> Flow {
    for action in actions {
        match action {
            Action::Send(bytes) => {
                if stream.write_all(&bytes).is_err() {
                    return Flow::WriteError;
                }
            }
            Action::Close => return Flow::Close,
        }
    }
    Flow::Continue
}
