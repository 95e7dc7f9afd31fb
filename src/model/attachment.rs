//! Attachment metadata.
//!
//! Only the byte range of the encoded content is recorded; the payload is
//! read when exported.

use serde::{Deserialize, Serialize};

use super::part::MimePart;

/// Metadata about one attachment part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentMeta {
    /// Position among the attachments of the message (0, 1, 2, …).
    pub index: usize,

    /// Decoded filename. Generated if missing from the headers.
    pub filename: String,

    /// MIME content type (e.g. `"image/jpeg"`, `"application/pdf"`).
    pub content_type: String,

    /// Content-Transfer-Encoding (`base64`, `quoted-printable`, `7bit`, …).
    pub encoding: String,

    /// Multipart nesting depth of the part (the root is 0).
    pub depth: usize,

    /// Absolute byte offset of the encoded content in the file.
    pub content_offset: u64,

    /// Length in bytes of the encoded content.
    pub content_length: u64,
}

impl AttachmentMeta {
    /// Metadata for `part` if it is an attachment.
    pub fn from_part(part: &MimePart, index: usize, depth: usize) -> Option<Self> {
        if !part.is_attachment() {
            return None;
        }
        let body = part.body();
        Some(Self {
            index,
            filename: part
                .attachment_name()
                .unwrap_or_else(|| format!("attachment_{index}")),
            content_type: part.mime_type(),
            encoding: part
                .transfer_encoding()
                .map(|e| e.to_ascii_lowercase())
                .unwrap_or_else(|| "7bit".to_string()),
            depth,
            content_offset: body.start(),
            content_length: body.size(),
        })
    }
}
