//! Streaming XML adapter: a uniform event view of inbound documents and a
//! builder for outbound replies.
//!
//! The state machine wants exactly three event shapes — open, characters,
//! close — in document order, with attributes preserved verbatim
//! (including `xmlns`, which is echoed rather than resolved). This module
//! flattens `quick-xml`'s event stream into that form:
//!
//! - self-closing elements (`<running/>`) expand to open + close;
//! - prolog, comments, and processing instructions are dropped;
//! - all-whitespace text between elements is dropped;
//! - attribute names split into `(prefix, local)` for echoing.

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

use crate::error::{AgentError, Result};

/// One attribute as received, `(prefix, name, value)` with the value
/// unescaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub prefix: Option<String>,
    pub name: String,
    pub value: String,
}

impl Attr {
    /// Qualified name for re-emission (`prefix:name` or just `name`).
    pub fn qualified(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{}:{}", p, self.name),
            None => self.name.clone(),
        }
    }
}

/// One parser event over a completed inbound document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlEvent {
    Open { name: String, attrs: Vec<Attr> },
    Characters(String),
    Close { name: String },
}

/// Flatten a complete document into events.
///
/// On a malformed document the events collected so far are returned
/// together with the error, so the caller can still salvage the
/// `message-id` for its error reply.
pub fn parse_document(doc: &[u8]) -> (Vec<XmlEvent>, Option<AgentError>) {
    let mut reader = Reader::from_reader(doc);
    let mut events = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match open_event(&e) {
                Ok(ev) => events.push(ev),
                Err(err) => return (events, Some(err)),
            },
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match open_event(&e) {
                    Ok(ev) => events.push(ev),
                    Err(err) => return (events, Some(err)),
                }
                events.push(XmlEvent::Close { name });
            }
            Ok(Event::End(e)) => {
                events.push(XmlEvent::Close {
                    name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                });
            }
            Ok(Event::Text(t)) => match t.unescape() {
                Ok(text) => {
                    if !text.trim().is_empty() {
                        events.push(XmlEvent::Characters(text.into_owned()));
                    }
                }
                Err(err) => return (events, Some(err.into())),
            },
            Ok(Event::CData(t)) => {
                let text = String::from_utf8_lossy(&t.into_inner()).into_owned();
                if !text.trim().is_empty() {
                    events.push(XmlEvent::Characters(text));
                }
            }
            Ok(Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_)) => {}
            Ok(Event::Eof) => return (events, None),
            Err(err) => return (events, Some(err.into())),
        }
        buf.clear();
    }
}

fn open_event(e: &BytesStart<'_>) -> Result<XmlEvent> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        let value = attr.unescape_value()?.into_owned();
        let key = attr.key;
        let prefix = key
            .prefix()
            .map(|p| String::from_utf8_lossy(p.into_inner()).into_owned());
        let local = String::from_utf8_lossy(key.local_name().into_inner()).into_owned();
        attrs.push(Attr {
            prefix,
            name: local,
            value,
        });
    }
    Ok(XmlEvent::Open { name, attrs })
}

/// XML prolog opening every reply document.
pub const XML_PROLOG: &str = "<?xml version='1.0' encoding='UTF-8'?>";

/// Builder for one reply document.
///
/// Start tags are held back until the next write so attributes can still be
/// added — the same contract the state machine's emission sites expect.
/// [`has_content`](Self::has_content) reports whether anything beyond the
/// prolog was written, which is what decides if a reply goes on the wire.
pub struct ReplyWriter {
    writer: quick_xml::Writer<Vec<u8>>,
    pending: Option<BytesStart<'static>>,
    wrote: bool,
}

impl ReplyWriter {
    pub fn new() -> Self {
        ReplyWriter {
            writer: quick_xml::Writer::new(XML_PROLOG.as_bytes().to_vec()),
            pending: None,
            wrote: false,
        }
    }

    fn flush_pending(&mut self) -> Result<()> {
        if let Some(start) = self.pending.take() {
            self.writer.write_event(Event::Start(start))?;
        }
        Ok(())
    }

    /// Open an element. Attributes may be added until the next write.
    pub fn start_element(&mut self, name: &str) -> Result<()> {
        self.flush_pending()?;
        self.pending = Some(BytesStart::new(name.to_string()));
        self.wrote = true;
        Ok(())
    }

    /// Add an attribute to the element opened by the last
    /// [`start_element`](Self::start_element).
    pub fn attribute(&mut self, prefix: Option<&str>, name: &str, value: &str) {
        if let Some(start) = self.pending.as_mut() {
            match prefix {
                Some(p) => start.push_attribute((format!("{}:{}", p, name).as_str(), value)),
                None => start.push_attribute((name, value)),
            }
        }
    }

    /// Write text content, escaping as needed.
    pub fn characters(&mut self, text: &str) -> Result<()> {
        self.flush_pending()?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.wrote = true;
        Ok(())
    }

    /// Write pre-formed markup verbatim (the stored running configuration).
    pub fn raw(&mut self, markup: &str) -> Result<()> {
        self.flush_pending()?;
        self.writer
            .write_event(Event::Text(BytesText::from_escaped(markup)))?;
        self.wrote = true;
        Ok(())
    }

    /// Close an element.
    pub fn end_element(&mut self, name: &str) -> Result<()> {
        self.flush_pending()?;
        self.writer
            .write_event(Event::End(BytesEnd::new(name.to_string())))?;
        self.wrote = true;
        Ok(())
    }

    /// Write a self-closed element (`<ok/>`).
    pub fn empty_element(&mut self, name: &str) -> Result<()> {
        self.flush_pending()?;
        self.writer
            .write_event(Event::Empty(BytesStart::new(name.to_string())))?;
        self.wrote = true;
        Ok(())
    }

    /// Whether anything beyond the prolog has been written.
    pub fn has_content(&self) -> bool {
        self.wrote || self.pending.is_some()
    }

    /// Drop everything written so far, back to the bare prolog. Used when an
    /// error reply must replace a partially-written success reply.
    pub fn reset(&mut self) {
        self.pending = None;
        self.wrote = false;
        self.writer.get_mut().truncate(XML_PROLOG.len());
    }

    /// Finish the document and hand back its bytes.
    pub fn into_bytes(mut self) -> Result<Vec<u8>> {
        self.flush_pending()?;
        Ok(self.writer.into_inner())
    }
}

impl Default for ReplyWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Escape raw text the way the reply writer would, for storage that is
/// later re-emitted verbatim inside a reply.
pub fn escape_text(text: &str) -> String {
    escape(text).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_expands_self_closing() {
        let doc = b"<source><running/></source>";
        let (events, err) = parse_document(doc);
        assert!(err.is_none());
        assert_eq!(
            events,
            vec![
                XmlEvent::Open {
                    name: "source".into(),
                    attrs: vec![]
                },
                XmlEvent::Open {
                    name: "running".into(),
                    attrs: vec![]
                },
                XmlEvent::Close {
                    name: "running".into()
                },
                XmlEvent::Close {
                    name: "source".into()
                },
            ]
        );
    }

    #[test]
    fn parse_keeps_attribute_order_and_xmlns() {
        let doc = br#"<rpc message-id="101" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"/>"#;
        let (events, err) = parse_document(doc);
        assert!(err.is_none());
        let XmlEvent::Open { name, attrs } = &events[0] else {
            panic!("expected open event");
        };
        assert_eq!(name, "rpc");
        assert_eq!(attrs[0].name, "message-id");
        assert_eq!(attrs[0].value, "101");
        assert_eq!(attrs[1].name, "xmlns");
        assert_eq!(attrs[1].prefix, None);
        assert_eq!(attrs[1].value, "urn:ietf:params:xml:ns:netconf:base:1.0");
    }

    #[test]
    fn parse_skips_prolog_and_whitespace() {
        let doc = b"<?xml version='1.0' encoding='UTF-8'?>\n<rpc>\n  <get></get>\n</rpc>\n";
        let (events, err) = parse_document(doc);
        assert!(err.is_none());
        assert_eq!(events.len(), 4);
    }

    #[test]
    fn parse_reports_malformed_document() {
        let doc = b"<rpc message-id=\"7\"><get></rpc>";
        let (events, err) = parse_document(doc);
        assert!(err.is_some());
        // The rpc open survives, so its message-id can still be echoed.
        assert!(matches!(&events[0], XmlEvent::Open { name, .. } if name == "rpc"));
    }

    #[test]
    fn parse_prefixed_attribute() {
        let doc = br#"<rpc message-id="1" xmlns:nc="urn:x"/>"#;
        let (events, _) = parse_document(doc);
        let XmlEvent::Open { attrs, .. } = &events[0] else {
            panic!("expected open event");
        };
        assert_eq!(attrs[1].prefix.as_deref(), Some("xmlns"));
        assert_eq!(attrs[1].name, "nc");
    }

    #[test]
    fn writer_builds_reply_envelope() {
        let mut w = ReplyWriter::new();
        w.start_element("rpc-reply").unwrap();
        w.attribute(None, "message-id", "1");
        w.empty_element("ok").unwrap();
        w.end_element("rpc-reply").unwrap();

        let bytes = w.into_bytes().unwrap();
        let doc = String::from_utf8(bytes).unwrap();
        assert_eq!(
            doc,
            "<?xml version='1.0' encoding='UTF-8'?>\
             <rpc-reply message-id=\"1\"><ok/></rpc-reply>"
        );
    }

    #[test]
    fn writer_escapes_characters_but_not_raw() {
        let mut w = ReplyWriter::new();
        w.start_element("data").unwrap();
        w.raw("<lcd>hi</lcd>").unwrap();
        w.characters("a<b").unwrap();
        w.end_element("data").unwrap();

        let doc = String::from_utf8(w.into_bytes().unwrap()).unwrap();
        assert!(doc.contains("<data><lcd>hi</lcd>a&lt;b</data>"));
    }

    #[test]
    fn writer_empty_document_has_no_content() {
        let w = ReplyWriter::new();
        assert!(!w.has_content());
        let bytes = w.into_bytes().unwrap();
        assert_eq!(bytes, XML_PROLOG.as_bytes());
    }

    #[test]
    fn writer_reset_discards_partial_reply() {
        let mut w = ReplyWriter::new();
        w.start_element("rpc-reply").unwrap();
        w.characters("partial").unwrap();
        w.reset();
        assert!(!w.has_content());
        assert_eq!(w.into_bytes().unwrap(), XML_PROLOG.as_bytes());
    }
}
