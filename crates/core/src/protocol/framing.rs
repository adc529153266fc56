//! Wire framing (RFC 6242 §4).
//!
//! NETCONF delimits messages two ways, and a session uses both in turn:
//!
//! - **End-of-message**: every message ends with the 6-byte sentinel
//!   `]]>]]>`. Used by both sides until the peer's hello has been parsed.
//! - **Chunked**: each chunk is preceded by `\n#<len>\n` and the message
//!   ends with `\n##\n`. Used for the rest of the session once the peer
//!   advertises `urn:ietf:params:netconf:base:1.1`.
//!
//! The [`Framer`] reassembles transport chunks into whole messages in the
//! `input` stream, tolerating any split of the byte stream — a framing
//! header, a chunk body, or the sentinel may straddle deliveries. Bytes
//! that arrive past the end of a message are spilled to the `draft` stream
//! and replayed as the start of the next one.
//!
//! [`ReplySender`] is the outbound half: it wraps a finished reply in the
//! active framing and hands it out in transport-sized segments.

use crate::datastore::{ByteStream, DocumentStore, MemoryStream};
use crate::error::{FramingErrorKind, Result};

/// End-of-message sentinel (RFC 6242 §4.3).
pub const SENTINEL: &[u8] = b"]]>]]>";

/// Segment size used when draining a reply to the transport.
pub const REPLY_SEGMENT: usize = 100;

/// Active message-delimiting scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `]]>]]>`-terminated messages (hello exchange, base:1.0 peers).
    EndOfMessage,
    /// `\n#<len>\n` chunks ending with `\n##\n` (base:1.1 peers).
    Chunked,
}

/// Result of feeding one transport delivery to the framer.
#[derive(Debug, PartialEq, Eq)]
pub enum FeedOutcome {
    /// The current message is still incomplete.
    NeedMore,
    /// A complete message is waiting in the `input` stream. Any bytes past
    /// its end marker were spilled to `draft`.
    MessageReady,
    /// The peer violated the framing grammar. No reply is owed; the caller
    /// tears the session down.
    ProtocolError(FramingErrorKind),
}

/// Position inside the chunked-framing grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Between chunks, expecting LF.
    Idle,
    /// Seen LF, expecting `#`.
    AfterLf,
    /// Seen `#`, expecting a length digit or a second `#`.
    AfterHash,
    /// Accumulating length digits until LF.
    ReadingLength,
    /// Consuming `chunk_remaining` body bytes.
    ReadingBody,
    /// Seen `##`, expecting the final LF.
    AfterTrailingHash,
}

/// Incremental message reassembler over both framing modes.
pub struct Framer {
    mode: Framing,
    phase: Phase,
    chunk_remaining: usize,
    input_length: usize,
    max_message: usize,
}

impl Framer {
    pub fn new(max_message: usize) -> Self {
        Framer {
            mode: Framing::EndOfMessage,
            phase: Phase::Idle,
            chunk_remaining: 0,
            input_length: 0,
            max_message,
        }
    }

    pub fn mode(&self) -> Framing {
        self.mode
    }

    /// Switch framing for subsequent messages. Takes effect between
    /// messages; the caller switches after the hello has been processed.
    pub fn set_mode(&mut self, mode: Framing) {
        if self.mode != mode {
            tracing::debug!(?mode, "framing switched");
        }
        self.mode = mode;
    }

    /// Forget any partial message, returning to the initial state.
    pub fn reset(&mut self) {
        self.mode = Framing::EndOfMessage;
        self.phase = Phase::Idle;
        self.chunk_remaining = 0;
        self.input_length = 0;
    }

    /// Consume one transport delivery.
    ///
    /// On [`FeedOutcome::MessageReady`] the assembled message is in
    /// `store.input`; the caller processes it, drains `store.draft` back
    /// through `feed`, and only then returns to the wire.
    pub fn feed(&mut self, store: &mut DocumentStore, bytes: &[u8]) -> Result<FeedOutcome> {
        match self.mode {
            Framing::EndOfMessage => self.feed_end_of_message(store, bytes),
            Framing::Chunked => self.feed_chunked(store, bytes),
        }
    }

    fn feed_end_of_message(
        &mut self,
        store: &mut DocumentStore,
        bytes: &[u8],
    ) -> Result<FeedOutcome> {
        if self.input_length + bytes.len() > self.max_message {
            return Ok(FeedOutcome::ProtocolError(FramingErrorKind::Oversized));
        }

        let prev_len = self.input_length;
        append(&mut store.input, bytes)?;
        self.input_length += bytes.len();

        // The sentinel may straddle deliveries; rescan from up to five
        // bytes before the new data.
        let scan_from = prev_len.saturating_sub(SENTINEL.len() - 1);
        let data = store.input.as_slice();
        let found = data[scan_from..]
            .windows(SENTINEL.len())
            .position(|w| w == SENTINEL)
            .map(|rel| scan_from + rel);

        let Some(pos) = found else {
            return Ok(FeedOutcome::NeedMore);
        };

        let all = store.input.take();
        store.input.seek(0);
        store.input.write(&all[..pos])?;
        let rest = &all[pos + SENTINEL.len()..];
        if !rest.is_empty() {
            append(&mut store.draft, rest)?;
        }
        self.input_length = 0;
        Ok(FeedOutcome::MessageReady)
    }

    fn feed_chunked(&mut self, store: &mut DocumentStore, bytes: &[u8]) -> Result<FeedOutcome> {
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            match self.phase {
                Phase::Idle => {
                    if b != b'\n' {
                        return Ok(FeedOutcome::ProtocolError(FramingErrorKind::ExpectedLineFeed));
                    }
                    self.phase = Phase::AfterLf;
                    i += 1;
                }
                Phase::AfterLf => {
                    if b != b'#' {
                        return Ok(FeedOutcome::ProtocolError(FramingErrorKind::ExpectedHash));
                    }
                    self.phase = Phase::AfterHash;
                    i += 1;
                }
                Phase::AfterHash => match b {
                    b'#' => {
                        self.phase = Phase::AfterTrailingHash;
                        i += 1;
                    }
                    b'1'..=b'9' => {
                        self.chunk_remaining = (b - b'0') as usize;
                        self.phase = Phase::ReadingLength;
                        i += 1;
                    }
                    _ => {
                        return Ok(FeedOutcome::ProtocolError(
                            FramingErrorKind::InvalidChunkLength,
                        ));
                    }
                },
                Phase::ReadingLength => match b {
                    b'0'..=b'9' => {
                        self.chunk_remaining = self.chunk_remaining * 10 + (b - b'0') as usize;
                        if self.chunk_remaining > self.max_message {
                            return Ok(FeedOutcome::ProtocolError(FramingErrorKind::Oversized));
                        }
                        i += 1;
                    }
                    b'\n' => {
                        self.phase = Phase::ReadingBody;
                        i += 1;
                    }
                    _ => {
                        return Ok(FeedOutcome::ProtocolError(
                            FramingErrorKind::InvalidChunkLength,
                        ));
                    }
                },
                Phase::ReadingBody => {
                    let take = self.chunk_remaining.min(bytes.len() - i);
                    if self.input_length + take > self.max_message {
                        return Ok(FeedOutcome::ProtocolError(FramingErrorKind::Oversized));
                    }
                    append(&mut store.input, &bytes[i..i + take])?;
                    self.input_length += take;
                    self.chunk_remaining -= take;
                    i += take;
                    if self.chunk_remaining == 0 {
                        self.phase = Phase::Idle;
                    }
                }
                Phase::AfterTrailingHash => {
                    if b != b'\n' {
                        return Ok(FeedOutcome::ProtocolError(FramingErrorKind::ExpectedLineFeed));
                    }
                    i += 1;
                    if i < bytes.len() {
                        append(&mut store.draft, &bytes[i..])?;
                        tracing::trace!(spilled = bytes.len() - i, "bytes past end marker saved");
                    }
                    self.phase = Phase::Idle;
                    self.input_length = 0;
                    return Ok(FeedOutcome::MessageReady);
                }
            }
        }
        Ok(FeedOutcome::NeedMore)
    }
}

fn append(stream: &mut MemoryStream, bytes: &[u8]) -> Result<()> {
    let end = stream.as_slice().len() as u64;
    stream.seek(end);
    stream.write(bytes)
}

/// Drains one framed reply to the transport in segments.
///
/// Chunked replies go out as `\n#100\n<100 bytes>` pieces with a final
/// `\n#<n>\n<n bytes>\n##\n`; end-of-message replies are the payload
/// followed by the sentinel.
pub struct ReplySender {
    framing: Framing,
    payload: Vec<u8>,
    position: usize,
    done: bool,
}

impl ReplySender {
    pub fn new(framing: Framing, payload: Vec<u8>) -> Self {
        ReplySender {
            framing,
            payload,
            position: 0,
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Next wire segment, or `None` once the reply is fully emitted.
    pub fn next_segment(&mut self) -> Option<Vec<u8>> {
        if self.done {
            return None;
        }
        match self.framing {
            Framing::EndOfMessage => {
                self.done = true;
                let mut segment = std::mem::take(&mut self.payload);
                segment.extend_from_slice(SENTINEL);
                Some(segment)
            }
            Framing::Chunked => {
                let remaining = self.payload.len() - self.position;
                if remaining > REPLY_SEGMENT {
                    let mut segment = format!("\n#{}\n", REPLY_SEGMENT).into_bytes();
                    segment
                        .extend_from_slice(&self.payload[self.position..self.position + REPLY_SEGMENT]);
                    self.position += REPLY_SEGMENT;
                    Some(segment)
                } else {
                    let mut segment = format!("\n#{}\n", remaining).into_bytes();
                    segment.extend_from_slice(&self.payload[self.position..]);
                    segment.extend_from_slice(b"\n##\n");
                    self.done = true;
                    Some(segment)
                }
            }
        }
    }
}
