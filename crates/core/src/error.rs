//! Error types for the NETCONF agent library.

use std::fmt;

/// Errors that can occur in the NETCONF agent library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Framing**: [`Framing`](Self::Framing) — the peer violated the
///   chunked framing grammar (RFC 6242 §4.2).
/// - **Parsing**: [`Xml`](Self::Xml), [`XmlAttr`](Self::XmlAttr) —
///   malformed XML inside a well-framed message.
/// - **Datastore**: [`BufferFull`](Self::BufferFull) — a scratch stream
///   hit its configured cap; [`Io`](Self::Io) — file or socket failure.
/// - **Server**: [`NotStarted`](Self::NotStarted),
///   [`AlreadyRunning`](Self::AlreadyRunning).
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer violated the wire framing (RFC 6242 §4.2). The session is
    /// torn down without a reply.
    #[error("framing error: {kind}")]
    Framing { kind: FramingErrorKind },

    /// The XML reader rejected a well-framed message.
    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// An attribute inside a start tag could not be parsed.
    #[error("XML attribute error: {0}")]
    XmlAttr(#[from] quick_xml::events::attributes::AttrError),

    /// A scratch stream exceeded its configured capacity.
    #[error("scratch buffer full (cap {cap} bytes)")]
    BufferFull { cap: usize },

    /// [`Server::start`](crate::Server::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// TLS configuration or record-layer failure.
    #[cfg(feature = "tls")]
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// The configured TLS certificate or key file could not be used.
    #[cfg(feature = "tls")]
    #[error("invalid TLS identity: {0}")]
    TlsIdentity(String),
}

/// Specific kind of framing violation (RFC 6242 §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingErrorKind {
    /// A chunk or end-of-chunks marker did not start with LF.
    ExpectedLineFeed,
    /// The byte after the leading LF was not `#`.
    ExpectedHash,
    /// The chunk length contained a non-digit, a leading zero, or was empty.
    InvalidChunkLength,
    /// The message grew past the configured maximum size.
    Oversized,
}

impl fmt::Display for FramingErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExpectedLineFeed => write!(f, "expected line feed"),
            Self::ExpectedHash => write!(f, "expected '#'"),
            Self::InvalidChunkLength => write!(f, "invalid chunk length"),
            Self::Oversized => write!(f, "message too large"),
        }
    }
}

/// Convenience alias for `Result<T, AgentError>`.
pub type Result<T> = std::result::Result<T, AgentError>;
