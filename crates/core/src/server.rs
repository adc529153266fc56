use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::datastore::{ByteStream, FileStream};
use crate::device::{Device, StubDevice};
use crate::error::{AgentError, Result};
use crate::transport::tcp;

/// Default cap for inbound messages and scratch buffers, sized for the
/// small configuration documents this agent handles.
pub const DEFAULT_MAX_MESSAGE: usize = 8192;

/// Inactivity timeout after which an idle session is torn down.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Server-level configuration shared with the transport layer.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path of the persistent running configuration.
    pub datastore_path: PathBuf,
    /// Maximum inbound message size; larger messages close the session.
    pub max_message_len: usize,
    /// Idle time before the session is torn down.
    pub session_timeout: Duration,
    /// PEM identity enabling the TLS listener instead of plain TCP.
    #[cfg(feature = "tls")]
    pub tls: Option<TlsIdentity>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            datastore_path: PathBuf::from("config.xml"),
            max_message_len: DEFAULT_MAX_MESSAGE,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            #[cfg(feature = "tls")]
            tls: None,
        }
    }
}

/// Certificate chain and private key files for the TLS listener.
#[cfg(feature = "tls")]
#[derive(Debug, Clone)]
pub struct TlsIdentity {
    pub cert_chain: PathBuf,
    pub private_key: PathBuf,
}

/// High-level NETCONF agent orchestrator.
///
/// Owns the listener thread and the single-session guard; each accepted
/// connection gets a fresh [`SessionEngine`](crate::session::SessionEngine)
/// over the shared datastore path and device.
pub struct Server {
    bind_addr: String,
    config: Arc<ServerConfig>,
    device: Arc<dyn Device>,
    running: Arc<AtomicBool>,
    session_active: Arc<AtomicBool>,
}

impl Server {
    pub fn new(bind_addr: &str) -> Self {
        Self::with_config(bind_addr, ServerConfig::default())
    }

    /// Create an agent with custom datastore/transport configuration.
    pub fn with_config(bind_addr: &str, config: ServerConfig) -> Self {
        Self::with_device(bind_addr, config, Arc::new(StubDevice::new()))
    }

    /// Create an agent wired to real hardware.
    pub fn with_device(bind_addr: &str, config: ServerConfig, device: Arc<dyn Device>) -> Self {
        Server {
            bind_addr: bind_addr.to_string(),
            config: Arc::new(config),
            device,
            running: Arc::new(AtomicBool::new(false)),
            session_active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(AgentError::AlreadyRunning);
        }

        // Boot-time datastore initialization: start from an empty running
        // configuration, creating the backing file if needed.
        let mut store = FileStream::new(&self.config.datastore_path);
        store.truncate()?;

        let listener = TcpListener::bind(&self.bind_addr)?;
        listener.set_nonblocking(true)?;

        #[cfg(feature = "tls")]
        let tls_config = match &self.config.tls {
            Some(identity) => Some(crate::transport::tls::make_tls_config(identity)?),
            None => None,
        };

        self.running.store(true, Ordering::SeqCst);

        let config = self.config.clone();
        let device = self.device.clone();
        let running = self.running.clone();
        let session_active = self.session_active.clone();

        #[cfg(feature = "tls")]
        if let Some(tls_config) = tls_config {
            tracing::info!(addr = %self.bind_addr, "NETCONF agent listening (TLS)");
            thread::spawn(move || {
                crate::transport::tls::accept_loop(
                    listener,
                    tls_config,
                    config,
                    device,
                    running,
                    session_active,
                );
            });
            return Ok(());
        }

        tracing::info!(addr = %self.bind_addr, "NETCONF agent listening");
        thread::spawn(move || {
            tcp::accept_loop(listener, config, device, running, session_active);
        });

        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("agent stopping");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether a manager session is currently active.
    pub fn session_active(&self) -> bool {
        self.session_active.load(Ordering::SeqCst)
    }

    /// Returns the server's configuration.
    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }
}
