//! Byte streams backing the agent's four working documents.
//!
//! The engine works over four logical byte streams:
//!
//! - `input` — the message currently being reassembled from the wire.
//! - `draft` — bytes of the *next* message that arrived early.
//! - `running` — the persistent running configuration (the only durable
//!   stream; everything else is scratch, recreated per message).
//! - `output` — the pending reply being produced by the XML writer.
//!
//! Scratch streams are growable in-memory buffers with a configured cap;
//! `running` is file-backed so the configuration survives session teardown.
//! Both sit behind the [`ByteStream`] trait so a memory-constrained build
//! can move any stream to flash without touching the engine.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{AgentError, Result};

/// A seekable byte stream with truncate/seek/write/read semantics.
///
/// Writes happen at the current position and advance it; `truncate` resets
/// the stream to empty (and position to 0). Implementations must not hold
/// OS resources open between calls — the engine yields to the transport
/// between operations.
pub trait ByteStream: Send {
    /// Discard all contents and rewind to position 0.
    fn truncate(&mut self) -> Result<()>;

    /// Move the read/write position.
    fn seek(&mut self, pos: u64);

    /// Write `buf` at the current position, advancing it.
    fn write(&mut self, buf: &[u8]) -> Result<()>;

    /// Read up to `buf.len()` bytes from the current position, advancing it.
    /// Returns the number of bytes read; 0 means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Current length of the stream in bytes.
    fn len(&self) -> Result<u64>;
}

/// Growable in-memory stream with a hard capacity cap.
#[derive(Debug)]
pub struct MemoryStream {
    buf: Vec<u8>,
    pos: usize,
    cap: usize,
}

impl MemoryStream {
    pub fn new(cap: usize) -> Self {
        MemoryStream {
            buf: Vec::new(),
            pos: 0,
            cap,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.pos = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take the whole contents, leaving the stream empty.
    pub fn take(&mut self) -> Vec<u8> {
        self.pos = 0;
        std::mem::take(&mut self.buf)
    }
}

impl ByteStream for MemoryStream {
    fn truncate(&mut self) -> Result<()> {
        self.clear();
        Ok(())
    }

    fn seek(&mut self, pos: u64) {
        self.pos = pos as usize;
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let end = self.pos + data.len();
        if end > self.cap {
            return Err(AgentError::BufferFull { cap: self.cap });
        }
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[self.pos..end].copy_from_slice(data);
        self.pos = end;
        Ok(())
    }

    fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        if self.pos >= self.buf.len() {
            return Ok(0);
        }
        let n = out.len().min(self.buf.len() - self.pos);
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.buf.len() as u64)
    }
}

/// File-backed stream. Opens the file for each operation and closes it
/// again, so no descriptor is held across engine yields.
#[derive(Debug)]
pub struct FileStream {
    path: PathBuf,
    pos: u64,
}

impl FileStream {
    pub fn new(path: impl AsRef<Path>) -> Self {
        FileStream {
            path: path.as_ref().to_path_buf(),
            pos: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteStream for FileStream {
    fn truncate(&mut self) -> Result<()> {
        File::create(&self.path)?;
        self.pos = 0;
        Ok(())
    }

    fn seek(&mut self, pos: u64) {
        self.pos = pos;
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .open(&self.path)?;
        file.seek(SeekFrom::Start(self.pos))?;
        file.write_all(data)?;
        self.pos += data.len() as u64;
        Ok(())
    }

    fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(self.pos))?;
        let n = file.read(out)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn len(&self) -> Result<u64> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

/// The four streams the protocol engine works over.
pub struct DocumentStore {
    /// Message under reassembly.
    pub input: MemoryStream,
    /// Early-arrived bytes of the next message.
    pub draft: MemoryStream,
    /// Pending reply.
    pub output: MemoryStream,
    /// Persistent running configuration.
    pub running: Box<dyn ByteStream>,
}

impl DocumentStore {
    /// Store with a file-backed running configuration at `path`.
    /// `scratch_cap` bounds `input` and `draft`; replies are unbounded.
    pub fn new(path: impl AsRef<Path>, scratch_cap: usize) -> Self {
        Self::with_running(Box::new(FileStream::new(path)), scratch_cap)
    }

    /// Store with a caller-provided running stream (in-memory in tests).
    pub fn with_running(running: Box<dyn ByteStream>, scratch_cap: usize) -> Self {
        DocumentStore {
            input: MemoryStream::new(scratch_cap),
            draft: MemoryStream::new(scratch_cap),
            output: MemoryStream::new(usize::MAX),
            running,
        }
    }

    /// Read the running configuration up to its NUL terminator.
    pub fn read_running(&mut self) -> Result<String> {
        read_config(self.running.as_mut())
    }
}

/// Read a NUL-terminated configuration stream into a string.
pub fn read_config(stream: &mut dyn ByteStream) -> Result<String> {
    let mut contents = Vec::new();
    let mut chunk = [0u8; 256];
    stream.seek(0);
    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        contents.extend_from_slice(&chunk[..n]);
    }
    if let Some(nul) = contents.iter().position(|&b| b == 0) {
        contents.truncate(nul);
    }
    Ok(String::from_utf8_lossy(&contents).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_stream_write_read() {
        let mut s = MemoryStream::new(64);
        s.write(b"hello").unwrap();
        s.write(b" world").unwrap();
        assert_eq!(s.as_slice(), b"hello world");

        s.seek(6);
        let mut buf = [0u8; 16];
        let n = s.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"world");
    }

    #[test]
    fn memory_stream_overwrite_via_seek() {
        let mut s = MemoryStream::new(64);
        s.write(b"abcdef").unwrap();
        s.seek(2);
        s.write(b"XY").unwrap();
        assert_eq!(s.as_slice(), b"abXYef");
    }

    #[test]
    fn memory_stream_respects_cap() {
        let mut s = MemoryStream::new(4);
        s.write(b"abcd").unwrap();
        assert!(matches!(
            s.write(b"e"),
            Err(AgentError::BufferFull { cap: 4 })
        ));
    }

    #[test]
    fn memory_stream_take_resets() {
        let mut s = MemoryStream::new(64);
        s.write(b"data").unwrap();
        assert_eq!(s.take(), b"data");
        assert!(s.is_empty());
        s.write(b"next").unwrap();
        assert_eq!(s.as_slice(), b"next");
    }

    #[test]
    fn file_stream_truncate_write_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = FileStream::new(dir.path().join("config.xml"));

        s.truncate().unwrap();
        s.write(b"<name>Steve</name>").unwrap();
        s.write(b"\0").unwrap();

        assert_eq!(s.len().unwrap(), 19);
        assert_eq!(read_config(&mut s).unwrap(), "<name>Steve</name>");
    }

    #[test]
    fn file_stream_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = FileStream::new(dir.path().join("absent.xml"));
        assert_eq!(s.len().unwrap(), 0);
        assert_eq!(read_config(&mut s).unwrap(), "");
    }

    #[test]
    fn file_stream_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.xml");

        let mut first = FileStream::new(&path);
        first.truncate().unwrap();
        first.write(b"<lcd>hi</lcd>\0").unwrap();

        let mut second = FileStream::new(&path);
        assert_eq!(read_config(&mut second).unwrap(), "<lcd>hi</lcd>");
    }
}
