//! Windowed, seekable views over a shared message file.
//!
//! A [`WindowedStream`] restricts reads to `[start, start + size)` of the
//! underlying file. Narrower windows are cut from existing ones without
//! copying bytes; every window holds one share of the same file handle.

use std::cmp::min;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use encoding_rs::Encoding;
use tracing::debug;

use crate::error::{EmlError, Result};
use crate::store::source::SharedSource;

/// Bytes fetched per positioned read while scanning for a line terminator.
const LINE_CHUNK: usize = 512;

/// A bounded view over a shared byte source.
///
/// Zero-length windows are the stateless [`WindowedStream::Empty`] variant:
/// they hold no share of the file and answer every read with end-of-window.
#[derive(Debug)]
pub enum WindowedStream {
    /// Window of size zero.
    Empty,
    /// Window over a shared open file.
    Shared(Window),
}

/// Cursor state of one non-empty window.
///
/// All offsets are absolute file offsets.
#[derive(Debug)]
pub struct Window {
    source: Arc<SharedSource>,
    start: u64,
    size: u64,
    pos: u64,
    mark: u64,
    closed: bool,
}

impl Window {
    fn new(source: Arc<SharedSource>, start: u64, size: u64) -> Self {
        Self {
            source,
            start,
            size,
            pos: start,
            mark: start,
            closed: false,
        }
    }

    fn end(&self) -> u64 {
        self.start + self.size
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed || self.source.is_closed() {
            return Err(EmlError::Closed);
        }
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.source.release();
        }
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        self.close();
    }
}

impl WindowedStream {
    /// Open a file; the window spans the whole file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let source = SharedSource::open(path.as_ref())?;
        let size = source.file_len();
        Ok(Self::Shared(Window::new(Arc::new(source), 0, size)))
    }

    /// The stateless empty stream.
    pub fn empty() -> Self {
        Self::Empty
    }

    /// Cut a child window `[start, end)` relative to this window.
    ///
    /// `end = None` means "to the end of this window"; an `end` past this
    /// window is clamped to it. A negative `start` is rejected. When the
    /// resulting size is zero or negative the [`Empty`](Self::Empty) stream is
    /// returned and no share of the file is taken.
    pub fn new_stream(&self, start: i64, end: Option<i64>) -> Result<Self> {
        if start < 0 {
            return Err(EmlError::InvalidRange { start, end });
        }
        let window = match self {
            Self::Empty => return Ok(Self::Empty),
            Self::Shared(w) => w,
        };
        window.ensure_open()?;

        let own_size = to_signed(window.size);
        let end_rel = end.map_or(own_size, |e| e.min(own_size));
        if end_rel - start <= 0 {
            return Ok(Self::Empty);
        }

        window.source.acquire()?;
        let child_start = window.start + start.unsigned_abs();
        let child_size = (end_rel - start).unsigned_abs();
        debug!(
            start = child_start,
            size = child_size,
            refs = window.source.ref_count(),
            "New window"
        );
        Ok(Self::Shared(Window::new(
            Arc::clone(&window.source),
            child_start,
            child_size,
        )))
    }

    /// Move the cursor to `offset` bytes past the window start.
    ///
    /// Offsets past the end of the window are clamped to the end.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        if let Self::Shared(w) = self {
            w.ensure_open()?;
            w.pos = w.start + min(offset, w.size);
        }
        Ok(())
    }

    /// Cursor position relative to the window start.
    pub fn position(&self) -> Result<u64> {
        match self {
            Self::Empty => Ok(0),
            Self::Shared(w) => {
                w.ensure_open()?;
                Ok(w.pos - w.start)
            }
        }
    }

    /// Absolute cursor position in the file.
    pub fn file_pointer(&self) -> Result<u64> {
        match self {
            Self::Empty => Ok(0),
            Self::Shared(w) => {
                w.ensure_open()?;
                Ok(w.pos)
            }
        }
    }

    /// Absolute file offset of the window's first byte.
    pub fn start(&self) -> u64 {
        match self {
            Self::Empty => 0,
            Self::Shared(w) => w.start,
        }
    }

    /// Size of the window in bytes.
    pub fn size(&self) -> u64 {
        match self {
            Self::Empty => 0,
            Self::Shared(w) => w.size,
        }
    }

    /// Bytes left between the cursor and the end of the window.
    pub fn available(&self) -> Result<u64> {
        match self {
            Self::Empty => Ok(0),
            Self::Shared(w) => {
                w.ensure_open()?;
                Ok(w.end() - w.pos)
            }
        }
    }

    /// Advance the cursor by up to `n` bytes; returns how far it moved.
    pub fn skip(&mut self, n: u64) -> Result<u64> {
        match self {
            Self::Empty => Ok(0),
            Self::Shared(w) => {
                w.ensure_open()?;
                let skipped = min(n, w.end() - w.pos);
                w.pos += skipped;
                Ok(skipped)
            }
        }
    }

    /// Read one line as raw bytes, without its terminator.
    ///
    /// A line ends at `\n`, `\r` or `\r\n`. Returns `None` once the cursor sits
    /// at the end of the window. A line running past the window is cut at
    /// the window boundary.
    pub fn read_line_bytes(&mut self) -> Result<Option<Vec<u8>>> {
        let w = match self {
            Self::Empty => return Ok(None),
            Self::Shared(w) => w,
        };
        w.ensure_open()?;

        let end = w.end();
        if w.pos >= end {
            return Ok(None);
        }

        let mut line = Vec::new();
        let mut buf = [0u8; LINE_CHUNK];
        let mut cursor = w.pos;
        while cursor < end {
            let want =
                usize::try_from(min(LINE_CHUNK as u64, end - cursor)).unwrap_or(LINE_CHUNK);
            let n = w.source.read_at(cursor, &mut buf[..want])?;
            if n == 0 {
                // File shorter than the window
                if cursor == w.pos {
                    return Ok(None);
                }
                break;
            }
            let chunk = &buf[..n];
            if let Some(i) = chunk.iter().position(|&b| b == b'\n' || b == b'\r') {
                line.extend_from_slice(&chunk[..i]);
                cursor += i as u64 + 1;
                if chunk[i] == b'\r' {
                    if i + 1 < n {
                        if chunk[i + 1] == b'\n' {
                            cursor += 1;
                        }
                    } else if cursor < end {
                        let mut next = [0u8; 1];
                        if w.source.read_at(cursor, &mut next)? == 1 && next[0] == b'\n' {
                            cursor += 1;
                        }
                    }
                }
                w.pos = cursor;
                return Ok(Some(line));
            }
            line.extend_from_slice(chunk);
            cursor += n as u64;
        }
        w.pos = cursor;
        Ok(Some(line))
    }

    /// Read one line, mapping every byte to the char of the same value.
    ///
    /// No multi-byte decoding happens here; see [`read_line_in`](Self::read_line_in).
    pub fn read_line(&mut self) -> Result<Option<String>> {
        Ok(self.read_line_bytes()?.map(|bytes| latin1(&bytes)))
    }

    /// Read one line and decode it with `encoding`.
    pub fn read_line_in(&mut self, encoding: &'static Encoding) -> Result<Option<String>> {
        Ok(self.read_line_bytes()?.map(|bytes| {
            let (decoded, _, _) = encoding.decode(&bytes);
            decoded.into_owned()
        }))
    }

    /// Read everything from the cursor to the end of the window.
    pub fn read_to_vec(&mut self) -> Result<Vec<u8>> {
        let capacity = usize::try_from(self.available()?).unwrap_or(0);
        let mut out = Vec::with_capacity(capacity);
        let mut buf = [0u8; 8192];
        loop {
            let n = self.read_chunk(&mut buf)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        Ok(out)
    }

    /// One positioned read from the cursor, bounded by the window.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let w = match self {
            Self::Empty => return Ok(0),
            Self::Shared(w) => w,
        };
        w.ensure_open()?;
        let want = usize::try_from(min(w.end() - w.pos, buf.len() as u64)).unwrap_or(buf.len());
        if want == 0 {
            return Ok(0);
        }
        let n = w.source.read_at(w.pos, &mut buf[..want])?;
        w.pos += n as u64;
        Ok(n)
    }

    /// Bookmark the cursor. There is no read-ahead limit.
    pub fn mark(&mut self) {
        if let Self::Shared(w) = self {
            w.mark = w.pos;
        }
    }

    /// Return the cursor to the last bookmark (the window start if none).
    pub fn reset(&mut self) -> Result<()> {
        if let Self::Shared(w) = self {
            w.ensure_open()?;
            w.pos = w.mark;
        }
        Ok(())
    }

    /// Give back this window's share of the file. Idempotent.
    pub fn close(&mut self) {
        if let Self::Shared(w) = self {
            w.close();
        }
    }

    /// Close the shared file now. Every sibling window fails with
    /// [`EmlError::Closed`] afterwards.
    pub fn force_close(&mut self) {
        if let Self::Shared(w) = self {
            w.closed = true;
            w.source.force_close();
        }
    }

    /// `true` if this window can no longer be read.
    pub fn is_closed(&self) -> bool {
        match self {
            Self::Empty => false,
            Self::Shared(w) => w.closed || w.source.is_closed(),
        }
    }

    /// `true` while the shared file handle is still open.
    pub fn is_source_open(&self) -> bool {
        match self {
            Self::Empty => false,
            Self::Shared(w) => !w.source.is_closed(),
        }
    }

    /// Number of live windows sharing the file (zero for the empty stream).
    pub fn ref_count(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Shared(w) => w.source.ref_count(),
        }
    }
}

impl Read for WindowedStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(self.read_chunk(buf)?)
    }
}

/// Map bytes to chars one-to-one (ISO-8859-1).
pub fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Inverse of [`latin1`]: chars above U+00FF cannot come from a byte line and
/// are dropped.
pub fn latin1_bytes(s: &str) -> Vec<u8> {
    s.chars().filter_map(|c| u8::try_from(c).ok()).collect()
}

fn to_signed(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}
