//! Multipart body splitting (RFC 2046 §5.1).
//!
//! The body window of a `multipart/*` part is scanned line by line for
//! delimiter lines. Each child becomes a [`MimePart`] over a sub-window of
//! the parent body; no bytes are copied.

use tracing::{debug, warn};

use crate::error::{EmlError, Result};
use crate::model::part::MimePart;
use crate::store::window::latin1_bytes;
use crate::store::WindowedStream;

/// Maximum nesting depth followed by [`walk`] unless configured otherwise.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Outcome of splitting one multipart body.
///
/// `parts` holds every child resolved before `error` (if any) stopped the scan.
#[derive(Debug)]
pub struct Split {
    pub parts: Vec<MimePart>,
    pub error: Option<EmlError>,
}

impl Split {
    /// `true` if the scan ran to completion.
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// Children, or the error that interrupted the scan.
    pub fn into_result(self) -> Result<Vec<MimePart>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.parts),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SeekingFirstBoundary,
    InPart,
    Done,
}

/// Byte range of the child being accumulated, relative to the body window.
struct Pending {
    start: u64,
    end: u64,
}

/// Split the body of `part` into its direct children, in file order.
///
/// Returns no children (and no error) when `part` is not multipart or
/// declares no boundary.
pub fn split(part: &mut MimePart) -> Split {
    split_with(part, &mut MimePart::parse)
}

/// [`split`] with the child constructor supplied by the caller.
fn split_with<F>(part: &mut MimePart, make_child: &mut F) -> Split
where
    F: FnMut(&WindowedStream, i64, Option<i64>) -> Result<MimePart>,
{
    let mut parts = Vec::new();
    let error = scan(part, &mut parts, make_child).err();
    if let Some(ref e) = error {
        warn!(error = %e, resolved = parts.len(), "Multipart scan stopped early");
    }
    Split { parts, error }
}

fn scan<F>(part: &mut MimePart, parts: &mut Vec<MimePart>, make_child: &mut F) -> Result<()>
where
    F: FnMut(&WindowedStream, i64, Option<i64>) -> Result<MimePart>,
{
    if !part.is_multipart() {
        return Ok(());
    }
    let Some(boundary) = part.boundary() else {
        debug!(content_type = ?part.content_type(), "Multipart without boundary");
        return Ok(());
    };

    let open = latin1_bytes(&format!("--{boundary}"));
    let close = [open.as_slice(), b"--".as_slice()].concat();
    let body = part.body_mut();
    body.seek(0)?;

    let mut state = State::SeekingFirstBoundary;
    let mut pending = Pending { start: 0, end: 0 };

    while state != State::Done {
        let line_start = body.position()?;
        let Some(raw) = body.read_line_bytes()? else {
            break;
        };
        if raw.is_empty() {
            continue;
        }
        let line = trim_transport_padding(&raw);

        if line == open.as_slice() {
            emit(body, state, &pending, parts, make_child)?;
            pending.start = body.position()?;
            pending.end = pending.start;
            state = State::InPart;
        } else if line.ends_with(&close) {
            // Bytes in front of a close delimiter are dropped
            emit(body, state, &pending, parts, make_child)?;
            state = State::Done;
        } else if line.ends_with(&open) {
            let leading = (line.len() - open.len()) as u64;
            debug!(offset = line_start, leading, "Delimiter preceded by stray bytes");
            if state == State::InPart {
                pending.end = line_start + leading;
            }
            emit(body, state, &pending, parts, make_child)?;
            pending.start = body.position()?;
            pending.end = pending.start;
            state = State::InPart;
        } else {
            pending.end = line_start + raw.len() as u64;
        }
    }

    if state == State::InPart {
        debug!("Multipart body ended without a close delimiter");
        emit(body, state, &pending, parts, make_child)?;
    }
    Ok(())
}

/// Turn the pending range into a child if it holds anything.
fn emit<F>(
    body: &WindowedStream,
    state: State,
    pending: &Pending,
    parts: &mut Vec<MimePart>,
    make_child: &mut F,
) -> Result<()>
where
    F: FnMut(&WindowedStream, i64, Option<i64>) -> Result<MimePart>,
{
    if state != State::InPart || pending.end <= pending.start {
        return Ok(());
    }
    debug!(start = pending.start, end = pending.end, "Multipart child");
    let child = make_child(body, to_offset(pending.start), Some(to_offset(pending.end)))?;
    parts.push(child);
    Ok(())
}

/// Delimiter lines may carry trailing blanks.
fn trim_transport_padding(line: &[u8]) -> &[u8] {
    let keep = line
        .iter()
        .rposition(|&b| b != b' ' && b != b'\t')
        .map_or(0, |i| i + 1);
    &line[..keep]
}

fn to_offset(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

/// Visit `part` and, recursively, every descendant of a multipart, depth
/// first in file order. Returns the number of parts visited.
///
/// Multiparts nested deeper than `max_depth` are visited but not split.
/// Split failures are logged and the children found so far are still
/// visited.
pub fn walk<F>(part: &mut MimePart, max_depth: usize, visitor: &mut F) -> usize
where
    F: FnMut(&mut MimePart, usize),
{
    walk_at(part, 0, max_depth, visitor)
}

fn walk_at<F>(part: &mut MimePart, depth: usize, max_depth: usize, visitor: &mut F) -> usize
where
    F: FnMut(&mut MimePart, usize),
{
    visitor(part, depth);
    let mut visited = 1;
    if !part.is_multipart() {
        return visited;
    }
    if depth >= max_depth {
        warn!(depth, "Maximum multipart depth reached, not descending");
        return visited;
    }
    for mut child in split(part).parts {
        visited += walk_at(&mut child, depth + 1, max_depth, visitor);
    }
    visited
}
