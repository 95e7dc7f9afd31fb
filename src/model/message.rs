//! The message root: the top-level part plus its identity fields.

use std::ops::{Deref, DerefMut};
use std::path::Path;

use chrono::{DateTime, Utc};

use super::attachment::AttachmentMeta;
use super::part::MimePart;
use crate::error::Result;
use crate::parser::{eml, header, multipart};

/// A parsed `.eml` file.
///
/// Derefs to its root [`MimePart`]. The message owns the one real file
/// handle; every part split from it is a lease on that handle, and
/// [`close`](Self::close) ends all of them.
#[derive(Debug)]
pub struct Message {
    root: MimePart,
    size: u64,
    from: Option<String>,
    to: Option<String>,
    subject: Option<String>,
}

impl Message {
    /// Open and parse the top-level header block of `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        eml::parse_eml(path)
    }

    pub(crate) fn new(
        root: MimePart,
        size: u64,
        from: Option<String>,
        to: Option<String>,
        subject: Option<String>,
    ) -> Self {
        Self {
            root,
            size,
            from,
            to,
            subject,
        }
    }

    /// Total file length at open time.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn from(&self) -> Option<&str> {
        self.from.as_deref()
    }

    pub fn to(&self) -> Option<&str> {
        self.to.as_deref()
    }

    /// Decoded subject.
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Parsed `Date` header.
    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.root.header("Date").and_then(header::parse_date)
    }

    pub fn root(&self) -> &MimePart {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut MimePart {
        &mut self.root
    }

    /// Metadata for every attachment in the tree, in file order.
    pub fn attachments(&mut self, max_depth: usize) -> Vec<AttachmentMeta> {
        let mut found = Vec::new();
        multipart::walk(&mut self.root, max_depth, &mut |part: &mut MimePart, depth| {
            if let Some(meta) = AttachmentMeta::from_part(part, found.len(), depth) {
                found.push(meta);
            }
        });
        found
    }

    /// Close the file now. Parts split from this message fail with
    /// [`Closed`](crate::error::EmlError::Closed) afterwards.
    pub fn close(&mut self) {
        self.root.body_mut().force_close();
    }
}

impl Deref for Message {
    type Target = MimePart;

    fn deref(&self) -> &MimePart {
        &self.root
    }
}

impl DerefMut for Message {
    fn deref_mut(&mut self) -> &mut MimePart {
        &mut self.root
    }
}
