//! NETCONF session management.
//!
//! A session is the server-side state for the one manager connection the
//! agent accepts at a time. It tracks:
//!
//! - Whether a transport is up, and whether the peer's hello advertised
//!   `base:1.1` (which flips the wire framing to chunked).
//! - The state-machine position carried between documents.
//! - The current request's `message-id` and echoed attributes.
//! - The `running` lock flag.
//!
//! ## Session lifecycle
//!
//! ```text
//! transport up     -> server hello pushed, framing = end-of-message
//! peer hello       -> framing switches to chunked iff base:1.1 advertised
//! rpc exchange     -> one reply per request, in order
//! close-session    -> ok reply, then transport closed
//! timeout / close  -> lock cleared, framer reset, back to idle listening
//! ```
//!
//! [`SessionEngine`] is the deterministic core: it consumes typed
//! [`SessionEvent`]s and produces [`Action`]s, so the whole protocol is
//! testable without a socket. The transport layer is a thin pump around it.

use std::sync::Arc;

use crate::datastore::{ByteStream, DocumentStore};
use crate::device::Device;
use crate::error::Result;
use crate::protocol::framing::{FeedOutcome, Framer, Framing, ReplySender, SENTINEL};
use crate::protocol::handler::{
    HandlerState, RpcHandler, Teardown, copy_config_compliant, write_error_reply,
};
use crate::protocol::xml::{Attr, ReplyWriter, XmlEvent, parse_document};
use crate::protocol::{ErrorTag, ErrorType, SERVER_HELLO};

/// Inbound event delivered to the engine by the transport.
#[derive(Debug)]
pub enum SessionEvent<'a> {
    /// Transport came up; the server hello goes out.
    Connected,
    /// Bytes arrived from the peer.
    DataIn(&'a [u8]),
    /// The transport can accept more bytes. Replies are emitted eagerly,
    /// so this only matters for transports that defer writes.
    Writable,
    /// The peer closed the transport.
    Closed,
    /// The inactivity timer fired.
    Timeout,
}

/// Effect the transport must apply, in order.
#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    Send(Vec<u8>),
    Close,
}

/// Protocol-visible state of the (single) session.
#[derive(Debug)]
pub struct Session {
    /// A transport is up. A second concurrent connect is refused upstream.
    pub connected: bool,
    /// The peer's hello advertised `urn:ietf:params:netconf:base:1.1`.
    pub peer_supports_chunked: bool,
    /// State-machine position, carried between documents.
    pub state: HandlerState,
    /// `message-id` of the request currently being answered.
    pub message_id: Option<String>,
    /// Non-`message-id` attributes of the current `<rpc>`, echoed on the
    /// reply envelope.
    pub reply_attrs: Vec<Attr>,
    /// The `running` datastore lock.
    pub locked: bool,
}

impl Session {
    pub fn new() -> Self {
        Session {
            connected: false,
            peer_supports_chunked: false,
            state: HandlerState::Uninitialized,
            message_id: None,
            reply_attrs: Vec::new(),
            locked: false,
        }
    }

    /// Framing in effect: end-of-message until the peer hello is parsed,
    /// chunked afterwards iff the peer advertised base:1.1.
    pub fn framing(&self) -> Framing {
        if self.peer_supports_chunked {
            Framing::Chunked
        } else {
            Framing::EndOfMessage
        }
    }

    fn reset(&mut self) {
        *self = Session::new();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// The deterministic protocol core: framer + state machine + reply
/// emission, driven by typed events.
pub struct SessionEngine {
    session: Session,
    framer: Framer,
    store: DocumentStore,
    device: Arc<dyn Device>,
}

impl SessionEngine {
    pub fn new(store: DocumentStore, device: Arc<dyn Device>, max_message: usize) -> Self {
        SessionEngine {
            session: Session::new(),
            framer: Framer::new(max_message),
            store,
            device,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Consume one event, returning the actions the transport must apply
    /// in order.
    pub fn on_event(&mut self, event: SessionEvent<'_>) -> Vec<Action> {
        let mut actions = Vec::new();
        match event {
            SessionEvent::Connected => {
                self.session.reset();
                self.framer.reset();
                self.clear_scratch();
                self.session.connected = true;
                let mut hello = SERVER_HELLO.as_bytes().to_vec();
                hello.extend_from_slice(SENTINEL);
                actions.push(Action::Send(hello));
                tracing::info!("session established, hello sent");
            }
            SessionEvent::DataIn(bytes) => {
                self.pump(bytes, &mut actions);
            }
            SessionEvent::Writable => {}
            SessionEvent::Closed => {
                tracing::info!("peer closed the session");
                self.session.reset();
                self.framer.reset();
                self.clear_scratch();
            }
            SessionEvent::Timeout => {
                tracing::info!("session timed out");
                self.session.reset();
                self.framer.reset();
                self.clear_scratch();
                actions.push(Action::Close);
            }
        }
        actions
    }

    /// Feed wire bytes through the framer, processing every complete
    /// message — including ones replayed from the draft stream.
    fn pump(&mut self, bytes: &[u8], actions: &mut Vec<Action>) {
        let mut current = bytes.to_vec();
        loop {
            let outcome = match self.framer.feed(&mut self.store, &current) {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(error = %e, "framer failure");
                    self.teardown(actions);
                    return;
                }
            };
            match outcome {
                FeedOutcome::NeedMore => return,
                FeedOutcome::ProtocolError(kind) => {
                    tracing::warn!(%kind, "framing violation, closing session");
                    self.teardown(actions);
                    return;
                }
                FeedOutcome::MessageReady => {
                    let closing = match self.process_document(actions) {
                        Ok(closing) => closing,
                        Err(e) => {
                            tracing::error!(error = %e, "reply generation failed");
                            self.teardown(actions);
                            return;
                        }
                    };
                    if closing || self.store.draft.is_empty() {
                        return;
                    }
                    current = self.store.draft.take();
                }
            }
        }
    }

    /// Parse and execute the message waiting in `input`. Returns true when
    /// the session is closing and no further messages should be processed.
    fn process_document(&mut self, actions: &mut Vec<Action>) -> Result<bool> {
        let doc = self.store.input.take();
        let (events, parse_err) = parse_document(&doc);

        if let Some(err) = parse_err {
            tracing::warn!(error = %err, "malformed message, closing session");
            self.session.message_id = salvage_message_id(&events);
            self.session.reply_attrs.clear();
            let mut writer = ReplyWriter::new();
            write_error_reply(
                &self.session,
                &mut writer,
                ErrorType::Protocol,
                ErrorTag::OperationFailed,
                "malformed message",
            )?;
            self.send_reply(writer.into_bytes()?, actions)?;
            self.teardown(actions);
            return Ok(true);
        }

        let compliant = copy_config_compliant(&events);
        let mut writer = ReplyWriter::new();
        let handler = RpcHandler::new(
            &mut self.session,
            &mut writer,
            self.store.running.as_mut(),
            self.device.as_ref(),
            compliant,
        );
        let teardown = handler.run(&events)?;

        if teardown == Teardown::Abort {
            tracing::warn!("protocol violation, closing session without reply");
            self.teardown(actions);
            return Ok(true);
        }

        // Between documents the machine waits for the next request; the
        // per-request allocations die with the reply.
        self.session.state = HandlerState::RcvdHello;
        self.session.message_id = None;
        self.session.reply_attrs = Vec::new();

        if writer.has_content() {
            self.send_reply(writer.into_bytes()?, actions)?;
        }
        self.framer.set_mode(self.session.framing());

        if teardown == Teardown::AfterReply {
            self.teardown(actions);
            return Ok(true);
        }
        Ok(false)
    }

    /// Stage the reply in the output stream and drain it to the transport
    /// in framed segments.
    fn send_reply(&mut self, payload: Vec<u8>, actions: &mut Vec<Action>) -> Result<()> {
        self.store.output.truncate()?;
        self.store.output.write(&payload)?;
        let mut sender = ReplySender::new(self.session.framing(), self.store.output.take());
        while let Some(segment) = sender.next_segment() {
            actions.push(Action::Send(segment));
        }
        Ok(())
    }

    fn teardown(&mut self, actions: &mut Vec<Action>) {
        self.session.reset();
        self.framer.reset();
        self.clear_scratch();
        actions.push(Action::Close);
    }

    fn clear_scratch(&mut self) {
        self.store.input.clear();
        self.store.draft.clear();
        self.store.output.clear();
    }
}

/// Recover the `message-id` from a partially parsed document so the error
/// reply can still echo it.
fn salvage_message_id(events: &[XmlEvent]) -> Option<String> {
    events.iter().find_map(|event| match event {
        XmlEvent::Open { name, attrs } if name == "rpc" => attrs
            .first()
            .filter(|attr| attr.name == "message-id")
            .map(|attr| attr.value.clone()),
        _ => None,
    })
}
