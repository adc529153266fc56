//! The session state machine: consumes XML events from one inbound
//! document and produces the reply.
//!
//! One [`RpcHandler`] is built per document. It walks the event stream
//! through the hello / rpc / per-operation sub-states, writing the reply
//! into a [`ReplyWriter`] as side effects fire. The first error inside a
//! document moves the machine to its terminal `Error` state, which absorbs
//! every remaining event — nothing after an `rpc-error` can touch the
//! running configuration or the lock.
//!
//! ## Session lifecycle
//!
//! ```text
//! Uninitialized --<hello>--> Hello --</hello>--> RcvdHello
//! RcvdHello --<rpc message-id=..>--> Rpc --operation--> sub-states --> Rpc
//! Rpc --</rpc>--> RcvdHello            (next request on the same session)
//! any --error--> Error                 (reply flushed, then recovered or closed)
//! ```
//!
//! The caller resets the state to `RcvdHello` between documents; `Error`
//! is terminal only for the document that produced it.

use std::net::Ipv6Addr;

use crate::datastore::{ByteStream, read_config};
use crate::device::{Device, TEMP_UNAVAILABLE};
use crate::error::Result;
use crate::protocol::xml::{ReplyWriter, XmlEvent, escape_text};
use crate::protocol::{CAPABILITY_BASE_1_1, ErrorTag, ErrorType};
use crate::session::Session;

/// Error message used for unexpected tags, matching the wire format
/// managers already parse.
const INVALID_TAG: &str = "invalid tag";

/// Elements allowed inside a `<copy-config>` request.
const CONFIG_WHITELIST: [&str; 8] = [
    "target", "running", "source", "config", "contact", "location", "name", "lcd",
];

/// Per-session position in the protocol exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    /// Transport up, no hello seen yet.
    Uninitialized,
    /// Inside the peer's `<hello>`.
    Hello,
    /// Hello complete; between requests.
    RcvdHello,
    /// Inside `<rpc>`, awaiting the operation element.
    Rpc,
    /// Inside `<get-config>`.
    GetConfig,
    /// Inside `<get-config><source>`.
    Source,
    /// Inside `<copy-config>`.
    CopyConfig,
    /// Inside `<copy-config><target>`.
    CopyConfigTarget,
    /// `<target>` validated, awaiting `<source>`.
    CopyConfigSource,
    /// Inside `<copy-config>...<source>`, awaiting `<config>`.
    CopyConfigRunning,
    /// Streaming `<config>` children into the running configuration.
    CopyConfigRunningConfig,
    /// Inside `<lock>` or `<unlock>`.
    Lock,
    /// Inside `<lock><target>` / `<unlock><target>`.
    LockTarget,
    /// Inside `<get>`.
    Get,
    /// Terminal for the current document; all further events are absorbed.
    Error,
}

/// What the transport should do once the document's reply (if any) has
/// been flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// Session continues.
    None,
    /// Orderly close after the reply is sent (`<close-session>`).
    AfterReply,
    /// Close immediately, discarding any partial reply (hello violation,
    /// malformed `<rpc>`).
    Abort,
}

/// Which hardware sink the current `<config>` child feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigSink {
    None,
    Lcd,
}

/// Whether the current `<lock>`/`<unlock>` acquires or releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockOp {
    Acquire,
    Release,
}

/// Pre-pass over a document deciding whether a `<copy-config>` carries
/// only recognized elements and no attributes in its body.
///
/// Runs before the state machine so the decision is already made when the
/// `<config>` element opens and the running configuration would be
/// truncated. A document without `<copy-config>` is trivially compliant.
pub fn copy_config_compliant(events: &[XmlEvent]) -> bool {
    let mut inside = false;
    for event in events {
        if !inside {
            if matches!(event, XmlEvent::Open { name, .. } if name == "copy-config") {
                inside = true;
            }
            continue;
        }
        match event {
            XmlEvent::Open { name, attrs } => {
                if !CONFIG_WHITELIST.contains(&name.as_str()) {
                    tracing::warn!(element = %name, "unrecognized element in copy-config");
                    return false;
                }
                if !attrs.is_empty() {
                    tracing::warn!(element = %name, "attribute in copy-config body");
                    return false;
                }
            }
            XmlEvent::Close { name } if name == "copy-config" => break,
            _ => {}
        }
    }
    true
}

/// Drives the state machine over one document's events.
pub struct RpcHandler<'a> {
    session: &'a mut Session,
    writer: &'a mut ReplyWriter,
    running: &'a mut dyn ByteStream,
    device: &'a dyn Device,
    compliant: bool,
    teardown: Teardown,
    locking: LockOp,
    sink: ConfigSink,
    source_is_running: bool,
}

impl<'a> RpcHandler<'a> {
    pub fn new(
        session: &'a mut Session,
        writer: &'a mut ReplyWriter,
        running: &'a mut dyn ByteStream,
        device: &'a dyn Device,
        compliant: bool,
    ) -> Self {
        RpcHandler {
            session,
            writer,
            running,
            device,
            compliant,
            teardown: Teardown::None,
            locking: LockOp::Acquire,
            sink: ConfigSink::None,
            source_is_running: false,
        }
    }

    /// Consume the whole document, returning what the transport should do
    /// after the reply (if any) has been flushed.
    pub fn run(mut self, events: &[XmlEvent]) -> Result<Teardown> {
        for event in events {
            self.on_event(event)?;
            if self.teardown == Teardown::Abort {
                break;
            }
        }
        Ok(self.teardown)
    }

    fn on_event(&mut self, event: &XmlEvent) -> Result<()> {
        match self.session.state {
            HandlerState::Error => Ok(()),
            HandlerState::Uninitialized => self.on_uninitialized(event),
            HandlerState::Hello => self.on_hello(event),
            HandlerState::RcvdHello => self.on_rcvd_hello(event),
            HandlerState::Rpc => self.on_rpc(event),
            HandlerState::GetConfig => self.on_get_config(event),
            HandlerState::Source => self.on_source(event),
            HandlerState::CopyConfig => self.on_copy_config(event),
            HandlerState::CopyConfigTarget => self.on_copy_config_target(event),
            HandlerState::CopyConfigSource => self.on_copy_config_source(event),
            HandlerState::CopyConfigRunning => self.on_copy_config_running(event),
            HandlerState::CopyConfigRunningConfig => self.on_copy_config_running_config(event),
            HandlerState::Lock => self.on_lock(event),
            HandlerState::LockTarget => self.on_lock_target(event),
            HandlerState::Get => self.on_get(event),
        }
    }

    fn on_uninitialized(&mut self, event: &XmlEvent) -> Result<()> {
        if let XmlEvent::Open { name, .. } = event {
            if name == "hello" {
                self.session.state = HandlerState::Hello;
            } else {
                tracing::warn!(element = %name, "expected hello, closing");
                self.abort();
            }
        }
        Ok(())
    }

    fn on_hello(&mut self, event: &XmlEvent) -> Result<()> {
        match event {
            XmlEvent::Open { name, .. } => {
                if name != "capabilities" && name != "capability" {
                    tracing::warn!(element = %name, "unexpected element in hello, closing");
                    self.abort();
                }
            }
            XmlEvent::Characters(text) => {
                if text.trim() == CAPABILITY_BASE_1_1 {
                    self.session.peer_supports_chunked = true;
                    tracing::debug!("peer advertises base:1.1, will switch to chunked framing");
                }
            }
            XmlEvent::Close { name } => {
                if name == "hello" {
                    self.session.state = HandlerState::RcvdHello;
                    tracing::info!(
                        chunked = self.session.peer_supports_chunked,
                        "hello received"
                    );
                }
            }
        }
        Ok(())
    }

    fn on_rcvd_hello(&mut self, event: &XmlEvent) -> Result<()> {
        if let XmlEvent::Open { name, attrs } = event {
            if name != "rpc" {
                return Ok(());
            }
            match attrs.first() {
                Some(first) if first.name == "message-id" => {
                    self.session.message_id = Some(first.value.clone());
                    self.session.reply_attrs = attrs[1..].to_vec();
                    self.session.state = HandlerState::Rpc;
                }
                _ => {
                    tracing::warn!("rpc without leading message-id attribute, closing");
                    self.abort();
                }
            }
        }
        Ok(())
    }

    fn on_rpc(&mut self, event: &XmlEvent) -> Result<()> {
        match event {
            XmlEvent::Open { name, .. } => match name.as_str() {
                "close-session" => {
                    self.reply_ok()?;
                    self.teardown = Teardown::AfterReply;
                    tracing::info!("close-session requested");
                    Ok(())
                }
                "get-config" => {
                    self.session.state = HandlerState::GetConfig;
                    Ok(())
                }
                "copy-config" => {
                    self.session.state = HandlerState::CopyConfig;
                    Ok(())
                }
                "lock" => {
                    self.session.state = HandlerState::Lock;
                    self.locking = LockOp::Acquire;
                    Ok(())
                }
                "unlock" => {
                    self.session.state = HandlerState::Lock;
                    self.locking = LockOp::Release;
                    Ok(())
                }
                "get" => {
                    self.session.state = HandlerState::Get;
                    Ok(())
                }
                "kill-session" => {
                    tracing::warn!("kill-session refused on a single-session agent");
                    self.reply_error(ErrorType::Rpc, ErrorTag::InvalidValue, INVALID_TAG)
                }
                other => {
                    tracing::warn!(operation = %other, "unsupported operation");
                    self.reply_error(
                        ErrorType::Application,
                        ErrorTag::UnknownElement,
                        "not supported",
                    )
                }
            },
            XmlEvent::Close { name } => match name.as_str() {
                "rpc" => {
                    self.session.state = HandlerState::RcvdHello;
                    Ok(())
                }
                "close-session" => Ok(()),
                _ => self.reply_error(ErrorType::Rpc, ErrorTag::BadElement, INVALID_TAG),
            },
            XmlEvent::Characters(_) => Ok(()),
        }
    }

    fn on_get_config(&mut self, event: &XmlEvent) -> Result<()> {
        match event {
            XmlEvent::Open { name, .. } => match name.as_str() {
                "source" => {
                    self.session.state = HandlerState::Source;
                    Ok(())
                }
                "filter" => self.reply_error(
                    ErrorType::Application,
                    ErrorTag::UnknownElement,
                    "filtering not supported",
                ),
                _ => self.reply_error(ErrorType::Rpc, ErrorTag::BadElement, INVALID_TAG),
            },
            XmlEvent::Close { name } if name == "get-config" => {
                self.session.state = HandlerState::Rpc;
                Ok(())
            }
            XmlEvent::Close { .. } => {
                self.reply_error(ErrorType::Rpc, ErrorTag::BadElement, INVALID_TAG)
            }
            XmlEvent::Characters(_) => Ok(()),
        }
    }

    fn on_source(&mut self, event: &XmlEvent) -> Result<()> {
        match event {
            XmlEvent::Open { name, .. } => {
                if name == "running" {
                    self.source_is_running = true;
                    Ok(())
                } else {
                    self.reply_error(ErrorType::Rpc, ErrorTag::BadElement, "only running supported")
                }
            }
            XmlEvent::Close { name } => match name.as_str() {
                "running" => Ok(()),
                "source" => {
                    if self.source_is_running {
                        self.source_is_running = false;
                        self.reply_config_data()?;
                    }
                    if self.session.state != HandlerState::Error {
                        self.session.state = HandlerState::GetConfig;
                    }
                    Ok(())
                }
                _ => self.reply_error(ErrorType::Rpc, ErrorTag::BadElement, INVALID_TAG),
            },
            XmlEvent::Characters(_) => Ok(()),
        }
    }

    fn on_copy_config(&mut self, event: &XmlEvent) -> Result<()> {
        match event {
            XmlEvent::Open { name, .. } => {
                if name == "target" {
                    self.session.state = HandlerState::CopyConfigTarget;
                    Ok(())
                } else {
                    self.reply_error(ErrorType::Rpc, ErrorTag::BadElement, INVALID_TAG)
                }
            }
            XmlEvent::Close { name } => {
                if name == "copy-config" {
                    self.session.state = HandlerState::Rpc;
                    Ok(())
                } else {
                    self.reply_error(ErrorType::Rpc, ErrorTag::BadElement, INVALID_TAG)
                }
            }
            XmlEvent::Characters(_) => Ok(()),
        }
    }

    fn on_copy_config_target(&mut self, event: &XmlEvent) -> Result<()> {
        match event {
            XmlEvent::Open { name, .. } => {
                if name == "running" {
                    Ok(())
                } else {
                    tracing::warn!(datastore = %name, "copy-config target not supported");
                    self.reply_error(ErrorType::Rpc, ErrorTag::BadElement, "only running supported")
                }
            }
            XmlEvent::Close { name } => match name.as_str() {
                "running" => Ok(()),
                "target" => {
                    self.session.state = HandlerState::CopyConfigSource;
                    Ok(())
                }
                _ => self.reply_error(ErrorType::Rpc, ErrorTag::BadElement, INVALID_TAG),
            },
            XmlEvent::Characters(_) => Ok(()),
        }
    }

    fn on_copy_config_source(&mut self, event: &XmlEvent) -> Result<()> {
        match event {
            XmlEvent::Open { name, .. } => {
                if name == "source" {
                    self.session.state = HandlerState::CopyConfigRunning;
                    Ok(())
                } else {
                    self.reply_error(ErrorType::Rpc, ErrorTag::BadElement, INVALID_TAG)
                }
            }
            XmlEvent::Close { name } => {
                if name == "source" {
                    self.session.state = HandlerState::CopyConfig;
                    Ok(())
                } else {
                    self.reply_error(ErrorType::Rpc, ErrorTag::BadElement, INVALID_TAG)
                }
            }
            XmlEvent::Characters(_) => Ok(()),
        }
    }

    fn on_copy_config_running(&mut self, event: &XmlEvent) -> Result<()> {
        match event {
            XmlEvent::Open { name, .. } => {
                if name != "config" {
                    return self.reply_error(ErrorType::Rpc, ErrorTag::BadElement, INVALID_TAG);
                }
                if !self.compliant {
                    return self.reply_error(ErrorType::Rpc, ErrorTag::BadElement, "invalid config");
                }
                match self.running.truncate() {
                    Ok(()) => {
                        self.session.state = HandlerState::CopyConfigRunningConfig;
                        tracing::debug!("rewriting running configuration");
                        Ok(())
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "cannot open running configuration");
                        self.reply_error(ErrorType::Application, ErrorTag::OperationFailed, INVALID_TAG)
                    }
                }
            }
            _ => Ok(()),
        }
    }

    fn on_copy_config_running_config(&mut self, event: &XmlEvent) -> Result<()> {
        match event {
            XmlEvent::Open { name, .. } => {
                if name == "lcd" {
                    self.sink = ConfigSink::Lcd;
                }
                self.write_running(format!("<{}>", name).as_bytes())
            }
            XmlEvent::Characters(text) => {
                self.write_running(escape_text(text).as_bytes())?;
                if self.sink == ConfigSink::Lcd {
                    self.device.show_text(text);
                    self.sink = ConfigSink::None;
                }
                Ok(())
            }
            XmlEvent::Close { name } => {
                if name == "config" {
                    self.write_running(b"\0")?;
                    if self.session.state == HandlerState::Error {
                        return Ok(());
                    }
                    self.session.state = HandlerState::CopyConfigSource;
                    tracing::info!("running configuration replaced");
                    self.reply_ok()
                } else {
                    self.write_running(format!("</{}>", name).as_bytes())
                }
            }
        }
    }

    fn on_lock(&mut self, event: &XmlEvent) -> Result<()> {
        match event {
            XmlEvent::Open { name, .. } => {
                if name == "target" {
                    self.session.state = HandlerState::LockTarget;
                    Ok(())
                } else {
                    self.reply_error(ErrorType::Rpc, ErrorTag::BadElement, INVALID_TAG)
                }
            }
            XmlEvent::Close { name } => {
                let matches_op = match self.locking {
                    LockOp::Acquire => name == "lock",
                    LockOp::Release => name == "unlock",
                };
                if matches_op {
                    self.session.state = HandlerState::Rpc;
                    Ok(())
                } else {
                    self.reply_error(ErrorType::Rpc, ErrorTag::BadElement, INVALID_TAG)
                }
            }
            XmlEvent::Characters(_) => Ok(()),
        }
    }

    fn on_lock_target(&mut self, event: &XmlEvent) -> Result<()> {
        match event {
            XmlEvent::Open { name, .. } => {
                if name != "running" {
                    return self.reply_error(
                        ErrorType::Rpc,
                        ErrorTag::BadElement,
                        "only running supported",
                    );
                }
                let denied = match self.locking {
                    LockOp::Acquire => self.session.locked,
                    LockOp::Release => !self.session.locked,
                };
                if denied {
                    let message = match self.locking {
                        LockOp::Acquire => "lock already taken",
                        LockOp::Release => "lock not held",
                    };
                    tracing::warn!(locked = self.session.locked, message, "lock denied");
                    self.reply_error(ErrorType::Rpc, ErrorTag::LockDenied, message)
                } else {
                    self.session.locked = !self.session.locked;
                    tracing::info!(locked = self.session.locked, "running lock toggled");
                    self.reply_ok()
                }
            }
            XmlEvent::Close { name } => match name.as_str() {
                "running" => Ok(()),
                "target" => {
                    self.session.state = HandlerState::Lock;
                    Ok(())
                }
                _ => self.reply_error(ErrorType::Rpc, ErrorTag::BadElement, INVALID_TAG),
            },
            XmlEvent::Characters(_) => Ok(()),
        }
    }

    fn on_get(&mut self, event: &XmlEvent) -> Result<()> {
        match event {
            XmlEvent::Open { name, .. } => {
                if name == "filter" {
                    self.reply_error(
                        ErrorType::Application,
                        ErrorTag::UnknownElement,
                        "filtering not supported",
                    )
                } else {
                    self.reply_error(ErrorType::Rpc, ErrorTag::BadElement, INVALID_TAG)
                }
            }
            XmlEvent::Close { name } => {
                if name == "get" {
                    self.reply_state_data()?;
                    if self.session.state != HandlerState::Error {
                        self.session.state = HandlerState::Rpc;
                    }
                    Ok(())
                } else {
                    self.reply_error(ErrorType::Rpc, ErrorTag::BadElement, INVALID_TAG)
                }
            }
            XmlEvent::Characters(_) => Ok(()),
        }
    }

    /// Close the transport now, without a reply.
    fn abort(&mut self) {
        self.session.state = HandlerState::Error;
        self.teardown = Teardown::Abort;
    }

    /// Open `<rpc-reply>` echoing the request's `message-id` and remaining
    /// attributes.
    fn reply_envelope(&mut self) -> Result<()> {
        write_envelope(self.session, self.writer)
    }

    /// Complete `<rpc-reply>...<ok/></rpc-reply>`.
    fn reply_ok(&mut self) -> Result<()> {
        self.reply_envelope()?;
        self.writer.empty_element("ok")?;
        self.writer.end_element("rpc-reply")
    }

    /// Replace anything written so far with an `rpc-error` reply and enter
    /// the terminal state for this document.
    fn reply_error(&mut self, error_type: ErrorType, tag: ErrorTag, message: &str) -> Result<()> {
        write_error_reply(self.session, self.writer, error_type, tag, message)?;
        self.session.state = HandlerState::Error;
        Ok(())
    }

    /// `<rpc-reply><data>` + running configuration + `</data></rpc-reply>`.
    fn reply_config_data(&mut self) -> Result<()> {
        let config = match read_config(self.running) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "cannot read running configuration");
                return self.reply_error(
                    ErrorType::Application,
                    ErrorTag::OperationFailed,
                    INVALID_TAG,
                );
            }
        };
        self.reply_envelope()?;
        self.writer.start_element("data")?;
        self.writer.raw(&config)?;
        self.writer.end_element("data")?;
        self.writer.end_element("rpc-reply")
    }

    /// `<get>` reply: running configuration followed by the
    /// operational-state block.
    fn reply_state_data(&mut self) -> Result<()> {
        let config = match read_config(self.running) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "cannot read running configuration");
                return self.reply_error(
                    ErrorType::Application,
                    ErrorTag::OperationFailed,
                    INVALID_TAG,
                );
            }
        };
        self.reply_envelope()?;
        self.writer.start_element("data")?;
        self.writer.raw(&config)?;
        self.emit_operational_state()?;
        self.writer.end_element("data")?;
        self.writer.end_element("rpc-reply")
    }

    fn emit_operational_state(&mut self) -> Result<()> {
        self.text_element("update", &self.device.last_temp_update().to_string())?;

        let temp = self.device.temperature_c();
        self.writer.start_element("temp")?;
        self.writer.attribute(None, "unit", "C");
        if temp == TEMP_UNAVAILABLE {
            self.writer.characters("N/A")?;
        } else {
            self.writer.characters(&temp.to_string())?;
        }
        self.writer.end_element("temp")?;

        self.text_element("sysUpTime", &self.device.sys_uptime().to_string())?;
        self.text_element("globalIP", &format_global_ip(self.device.global_ip()))?;
        self.text_element("packetsSent", &self.device.packets_sent().to_string())?;
        self.text_element("packetsReceived", &self.device.packets_received().to_string())?;
        self.text_element("failSent", &self.device.fail_sent().to_string())?;
        self.text_element("failReceived", &self.device.fail_received().to_string())?;
        self.text_element("octetsSent", &self.device.octets_sent().to_string())?;
        self.text_element("octetsReceived", &self.device.octets_received().to_string())?;
        self.text_element("mcastSent", &self.device.mcast_sent().to_string())?;
        self.text_element("mcastReceived", &self.device.mcast_received().to_string())
    }

    fn text_element(&mut self, name: &str, value: &str) -> Result<()> {
        self.writer.start_element(name)?;
        self.writer.characters(value)?;
        self.writer.end_element(name)
    }

    fn write_running(&mut self, data: &[u8]) -> Result<()> {
        if let Err(e) = self.running.write(data) {
            tracing::error!(error = %e, "running configuration write failed");
            return self.reply_error(ErrorType::Application, ErrorTag::OperationFailed, INVALID_TAG);
        }
        Ok(())
    }
}

/// Open `<rpc-reply>` on `writer`, echoing the session's `message-id` and
/// remaining request attributes.
fn write_envelope(session: &Session, writer: &mut ReplyWriter) -> Result<()> {
    writer.start_element("rpc-reply")?;
    if let Some(id) = &session.message_id {
        if !id.is_empty() {
            writer.attribute(None, "message-id", id);
        }
    }
    for attr in &session.reply_attrs {
        writer.attribute(attr.prefix.as_deref(), &attr.name, &attr.value);
    }
    Ok(())
}

/// Write a complete `rpc-error` reply, discarding anything already in the
/// writer so the peer never sees a half-built success reply ahead of the
/// error.
pub(crate) fn write_error_reply(
    session: &Session,
    writer: &mut ReplyWriter,
    error_type: ErrorType,
    tag: ErrorTag,
    message: &str,
) -> Result<()> {
    writer.reset();
    write_envelope(session, writer)?;
    writer.start_element("rpc-error")?;
    writer.start_element("error-type")?;
    writer.characters(error_type.as_str())?;
    writer.end_element("error-type")?;
    writer.start_element("error-tag")?;
    writer.characters(tag.as_str())?;
    writer.end_element("error-tag")?;
    writer.start_element("error-severity")?;
    writer.characters("error")?;
    writer.end_element("error-severity")?;
    writer.start_element("error-message")?;
    writer.characters(message)?;
    writer.end_element("error-message")?;
    writer.end_element("rpc-error")?;
    writer.end_element("rpc-reply")
}

/// Format the global IPv6 address as eight 16-bit hex groups, space-padded
/// on both sides, the layout device managers already parse.
pub fn format_global_ip(addr: Ipv6Addr) -> String {
    let s = addr.segments();
    format!(
        " {:04x}:{:04x}:{:04x}:{:04x}:{:04x}:{:04x}:{:04x}:{:04x} ",
        s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7]
    )
}
