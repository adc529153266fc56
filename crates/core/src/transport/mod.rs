//! Network transport layer for the NETCONF session.
//!
//! The agent accepts a single persistent stream and pumps its bytes through
//! the [`SessionEngine`](crate::session::SessionEngine); the engine never
//! sees a socket. Two listeners share that pump:
//!
//! - **TCP** ([`tcp`]): a plain stream socket.
//! - **TLS** (`tls`, behind the `tls` cargo feature): the same byte pump
//!   inside a rustls record layer — behavior is otherwise identical.
//!
//! A second concurrent connection is refused by closing it immediately;
//! the active session is never disturbed.

pub mod tcp;
#[cfg(feature = "tls")]
pub mod tls;
