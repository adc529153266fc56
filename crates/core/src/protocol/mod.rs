//! NETCONF protocol implementation (RFC 6241/6242 subset).
//!
//! This module handles the XML-based NETCONF signaling protocol — wire
//! framing, the streaming event adapter, the session state machine, and
//! reply generation.
//!
//! ## Message exchange (RFC 6241 §4)
//!
//! Both sides open with a `<hello>` advertising capabilities; afterwards the
//! manager drives request/response pairs:
//!
//! ```text
//! <rpc message-id="101" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
//!   <get-config><source><running/></source></get-config>
//! </rpc>
//! ```
//!
//! Every reply echoes the `message-id` (and any other `<rpc>` attributes)
//! on its `<rpc-reply>` envelope.
//!
//! ## Supported operations
//!
//! | Operation | RFC 6241 section | Purpose |
//! |-----------|------------------|---------|
//! | get-config | §7.1 | Retrieve the running configuration |
//! | copy-config | §7.3 | Replace the running configuration |
//! | lock / unlock | §7.5, §7.6 | Exclusive configuration access |
//! | get | §7.7 | Running configuration plus operational state |
//! | close-session | §7.8 | Orderly session teardown |
//!
//! `kill-session` and `<filter>` are recognized but refused with an
//! `rpc-error`; everything else is `unknown-element`.

pub mod framing;
pub mod handler;
pub mod xml;

pub use framing::{FeedOutcome, Framer, Framing, ReplySender};
pub use handler::{RpcHandler, Teardown};
pub use xml::{Attr, ReplyWriter, XmlEvent};

/// Capability URI that switches both sides to chunked framing (RFC 6242 §4.1).
pub const CAPABILITY_BASE_1_1: &str = "urn:ietf:params:netconf:base:1.1";

/// Base NETCONF namespace, echoed by peers on their `<rpc>` elements.
pub const BASE_NAMESPACE: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

/// Greeting pushed to the peer as soon as the transport comes up
/// (RFC 6241 §8.1). The advertised session id is always 1 — the agent
/// accepts a single session.
pub const SERVER_HELLO: &str = "<?xml version='1.0' encoding='UTF-8'?>\
<hello xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\">\
<capabilities>\
<capability>urn:ietf:params:netconf:base:1.1</capability>\
</capabilities>\
<session-id>1</session-id>\
</hello>";

/// `<error-type>` values (RFC 6241 §4.3, Appendix A).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    Application,
    Rpc,
    Protocol,
}

impl ErrorType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Application => "application",
            Self::Rpc => "rpc",
            Self::Protocol => "protocol",
        }
    }
}

/// `<error-tag>` values (RFC 6241 Appendix A).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorTag {
    InUse,
    InvalidValue,
    TooBig,
    MissingAttribute,
    BadAttribute,
    UnknownAttribute,
    MissingElement,
    BadElement,
    UnknownElement,
    UnknownNamespace,
    AccessDenied,
    LockDenied,
    OperationNotSupported,
    OperationFailed,
}

impl ErrorTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InUse => "in-use",
            Self::InvalidValue => "invalid-value",
            Self::TooBig => "too-big",
            Self::MissingAttribute => "missing-attribute",
            Self::BadAttribute => "bad-attribute",
            Self::UnknownAttribute => "unknown-attribute",
            Self::MissingElement => "missing-element",
            Self::BadElement => "bad-element",
            Self::UnknownElement => "unknown-element",
            Self::UnknownNamespace => "unknown-namespace",
            Self::AccessDenied => "access-denied",
            Self::LockDenied => "lock-denied",
            Self::OperationNotSupported => "operation-not-supported",
            Self::OperationFailed => "operation-failed",
        }
    }
}
