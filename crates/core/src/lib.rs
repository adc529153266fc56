//! # netconf — minimal NETCONF agent library
//!
//! A Rust library implementing a server-side agent for a NETCONF subset
//! (RFC 6241) aimed at resource-constrained devices: one manager session at
//! a time, a single `running` datastore persisted to a small file, and a
//! whitelisted configuration model applied to local hardware.
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 6241](https://tools.ietf.org/html/rfc6241) | NETCONF 1.1 | hello exchange, rpc/rpc-reply envelopes, get/get-config/copy-config/lock semantics, rpc-error taxonomy |
//! | [RFC 6242](https://tools.ietf.org/html/rfc6242) | Framing | `]]>]]>` end-of-message and `\n#len\n` chunked message delimiting |
//! | [RFC 7589](https://tools.ietf.org/html/rfc7589) | NETCONF over TLS | optional `tls` feature wrapping the same session in rustls |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  CLI / embedding code                         │
//! ├──────────────────────────────────────────────┤
//! │  Server        — public API, orchestrator     │
//! ├──────────────────────────────────────────────┤
//! │  Session       — typed-event engine           │
//! │  Protocol      — framer, XML events, handler  │
//! ├──────────────────────────────────────────────┤
//! │  Transport     — TCP (or TLS) byte pump       │
//! │  Datastore     — input/draft/running/output   │
//! │  Device        — LCD + operational sensors    │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Bytes flow: transport → [`protocol::Framer`] → complete document →
//! XML events → [`protocol::RpcHandler`] → reply bytes →
//! [`protocol::ReplySender`] → transport. The whole exchange is driven by
//! [`session::SessionEngine`], a deterministic core that consumes typed
//! events and produces send/close actions, so every protocol path is
//! testable without a socket.
//!
//! ## Quick start
//!
//! ```no_run
//! use netconf::Server;
//!
//! let mut server = Server::new("0.0.0.0:6513");
//! server.start().unwrap();
//! ```
//!
//! ## Crate layout
//!
//! - [`server`] — High-level [`Server`] orchestrator and [`ServerConfig`].
//! - [`session`] — [`Session`] state and the [`SessionEngine`] event loop.
//! - [`protocol`] — framing, XML event adapter, state machine, replies.
//! - [`datastore`] — [`ByteStream`](datastore::ByteStream) abstraction over
//!   the four working streams.
//! - [`device`] — [`Device`] seam for the LCD and operational sensors.
//! - [`transport`] — TCP listener (TLS behind the `tls` feature).
//! - [`error`] — [`AgentError`] enum and [`Result`] alias.

pub mod datastore;
pub mod device;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use device::{Device, StubDevice, TEMP_UNAVAILABLE};
pub use error::{AgentError, Result};
#[cfg(feature = "tls")]
pub use server::TlsIdentity;
pub use server::{Server, ServerConfig};
pub use session::{Action, Session, SessionEngine, SessionEvent};
