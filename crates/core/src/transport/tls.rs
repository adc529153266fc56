//! TLS listener (RFC 7589-style NETCONF over TLS).
//!
//! Wraps the same byte pump the TCP transport uses in a rustls record
//! layer. Selection is a configuration switch; session behavior is
//! identical either way.

use std::fs::File;
use std::io::BufReader;
use std::net::{Shutdown, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use rustls::{ServerConnection, StreamOwned};

use crate::datastore::DocumentStore;
use crate::device::Device;
use crate::error::{AgentError, Result};
use crate::server::{ServerConfig, TlsIdentity};
use crate::session::SessionEngine;
use crate::transport::tcp::pump;

/// Build the rustls server configuration from PEM-encoded identity files.
pub fn make_tls_config(identity: &TlsIdentity) -> Result<Arc<rustls::ServerConfig>> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(&identity.cert_chain)?))
        .collect::<std::io::Result<Vec<_>>>()?;
    if certs.is_empty() {
        return Err(AgentError::TlsIdentity(format!(
            "no certificates in {}",
            identity.cert_chain.display()
        )));
    }
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(&identity.private_key)?))?
        .ok_or_else(|| {
            AgentError::TlsIdentity(format!(
                "no private key in {}",
                identity.private_key.display()
            ))
        })?;
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Arc::new(config))
}

/// TLS accept loop; mirrors [`super::tcp::accept_loop`] with the stream
/// wrapped in a [`StreamOwned`] before it reaches the pump.
pub fn accept_loop(
    listener: TcpListener,
    tls: Arc<rustls::ServerConfig>,
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
                if stream.set_nonblocking(false).is_err()
                    || stream
                        .set_read_timeout(Some(config.session_timeout))
                        .is_err()
                {
                    session_active.store(false, Ordering::SeqCst);
                    continue;
                }
                let conn = match ServerConnection::new(tls.clone()) {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "TLS session setup failed");
                        session_active.store(false, Ordering::SeqCst);
                        continue;
                    }
                };
                let c = config.clone();
                let d = device.clone();
                let r = running.clone();
                let guard = session_active.clone();
                thread::spawn(move || {
                    tracing::info!(%peer_addr, "manager connected (TLS)");

                    let store = DocumentStore::new(&c.datastore_path, c.max_message_len);
                    let mut engine = SessionEngine::new(store, d, c.max_message_len);
                    let mut tls_stream = StreamOwned::new(conn, stream);

                    let reason = pump(&mut tls_stream, &mut engine, &r);
                    tls_stream.conn.send_close_notify();
                    let _ = tls_stream.sock.shutdown(Shutdown::Both);

                    tracing::info!(%peer_addr, reason, "manager disconnected");
                    guard.store(false, Ordering::SeqCst);
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TLS accept error");
                }
            }
        }
    }
    tracing::debug!("TLS accept loop exited");
}
