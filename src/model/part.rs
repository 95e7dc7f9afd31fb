//! One MIME part: its unfolded header lines and a window over its body.
//!
//! Fields such as the content type or the attachment name are derived from
//! the header lines on each call; only the multipart and attachment flags
//! are fixed at construction.

use std::fmt;
use std::io::Write;

use crate::error::Result;
use crate::parser::header::{
    self, decode_charset, find_field, get_parameter_value, get_raw_parameter_value, unfold_value,
};
use crate::parser::multipart::{self, Split};
use crate::parser::transfer::{decode_body, TransferEncoding};
use crate::store::WindowedStream;

/// Copy buffer used by [`MimePart::copy_body_to`].
const COPY_CHUNK: usize = 64 * 1024;

/// A parsed MIME part.
#[derive(Debug)]
pub struct MimePart {
    headers: Vec<String>,
    multipart: bool,
    attachment: bool,
    body: WindowedStream,
}

impl MimePart {
    /// Build a part from its header lines and body window.
    pub fn new(headers: Vec<String>, body: WindowedStream) -> Self {
        let mut part = Self {
            headers,
            multipart: false,
            attachment: false,
            body,
        };
        part.multipart = part.mime_type().starts_with("multipart/");
        part.attachment = !part.multipart && part.disposition_marks_attachment();
        part
    }

    /// Parse the part stored in `[start, end)` of `parent` (relative offsets).
    ///
    /// The header block is read from the front of the range and the rest
    /// becomes the body window. `end = None` runs to the end of `parent`.
    pub fn parse(parent: &WindowedStream, start: i64, end: Option<i64>) -> Result<Self> {
        Self::read(parent.new_stream(start, end)?)
    }

    /// Parse a part that fills `window` entirely. The window's share of the
    /// file is handed over to the body window.
    pub fn read(mut window: WindowedStream) -> Result<Self> {
        let headers = header::unfold_headers(&mut window)?;
        let header_len = i64::try_from(window.position()?).unwrap_or(i64::MAX);
        let body = window.new_stream(header_len, None)?;
        window.close();
        Ok(Self::new(headers, body))
    }

    /// Unfolded header lines in file order. Folds are kept as `'\n'`.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Raw value of the first header named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        find_field(&self.headers, name)
    }

    /// Full header line for `name`, used for parameter scans.
    fn header_line(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|line| header::field_value(line, name).is_some())
            .map(String::as_str)
    }

    /// The `Content-Type` value, unfolded and trimmed.
    pub fn content_type(&self) -> Option<String> {
        self.header("Content-Type").map(unfold_value)
    }

    /// Lowercased `type/subtype`; `text/plain` when absent.
    pub fn mime_type(&self) -> String {
        self.content_type()
            .and_then(|ct| {
                let media = ct.split(';').next().unwrap_or_default().trim();
                (!media.is_empty()).then(|| media.to_ascii_lowercase())
            })
            .unwrap_or_else(|| "text/plain".to_string())
    }

    /// The `Content-Transfer-Encoding` value, trimmed.
    pub fn transfer_encoding(&self) -> Option<String> {
        self.header("Content-Transfer-Encoding").map(unfold_value)
    }

    /// Parsed transfer encoding; `7bit` when absent.
    pub fn encoding(&self) -> TransferEncoding {
        self.transfer_encoding()
            .map(|value| TransferEncoding::parse(&value))
            .unwrap_or(TransferEncoding::SevenBit)
    }

    /// Multipart boundary token, exactly as declared.
    pub fn boundary(&self) -> Option<String> {
        let line = self.header_line("Content-Type")?;
        let boundary = get_raw_parameter_value(line, "boundary");
        (!boundary.is_empty()).then_some(boundary)
    }

    /// `charset` parameter of the Content-Type.
    pub fn charset(&self) -> Option<String> {
        let line = self.header_line("Content-Type")?;
        let charset = get_parameter_value(line, "charset");
        (!charset.is_empty()).then_some(charset)
    }

    pub fn is_multipart(&self) -> bool {
        self.multipart
    }

    pub fn is_attachment(&self) -> bool {
        self.attachment
    }

    /// Decoded attachment filename.
    ///
    /// Taken from the Content-Disposition `filename` parameter, falling back
    /// to the Content-Type `name` parameter.
    pub fn attachment_name(&self) -> Option<String> {
        let from_disposition = self
            .header_line("Content-Disposition")
            .map(|line| get_parameter_value(line, "filename"))
            .filter(|name| !name.is_empty());
        from_disposition.or_else(|| {
            self.header_line("Content-Type")
                .map(|line| get_parameter_value(line, "name"))
                .filter(|name| !name.is_empty())
        })
    }

    /// Only the `attachment` disposition counts; `inline` parts naming a
    /// file are embedded content such as `cid:` images.
    fn disposition_marks_attachment(&self) -> bool {
        self.header("Content-Disposition")
            .map(|value| unfold_value(value.split(';').next().unwrap_or_default()))
            .is_some_and(|kind| kind.eq_ignore_ascii_case("attachment"))
    }

    /// The body window (raw, still transfer-encoded).
    pub fn body(&self) -> &WindowedStream {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut WindowedStream {
        &mut self.body
    }

    /// Split a multipart body into its direct children.
    ///
    /// Non-multipart parts and parts without a boundary yield no children.
    pub fn parts(&mut self) -> Split {
        multipart::split(self)
    }

    /// The whole body, raw.
    pub fn raw_body(&mut self) -> Result<Vec<u8>> {
        self.body.seek(0)?;
        self.body.read_to_vec()
    }

    /// The body with its transfer encoding removed. Multipart bodies are
    /// returned raw.
    pub fn decoded_body(&mut self) -> Result<Vec<u8>> {
        let raw = self.raw_body()?;
        if self.multipart {
            return Ok(raw);
        }
        decode_body(&self.encoding(), &raw)
    }

    /// The decoded body as text, using the part charset (UTF-8 by default).
    pub fn text(&mut self) -> Result<String> {
        let bytes = self.decoded_body()?;
        let text = self
            .charset()
            .and_then(|charset| decode_charset(&charset, &bytes))
            .unwrap_or_else(|| String::from_utf8_lossy(&bytes).into_owned());
        Ok(text)
    }

    /// Copy the raw body bytes to `writer`; returns the number of bytes copied.
    pub fn copy_body_to<W: Write>(&mut self, writer: &mut W) -> Result<u64> {
        self.body.seek(0)?;
        let mut buf = vec![0u8; COPY_CHUNK];
        let mut total = 0u64;
        loop {
            let n = self.body.read_chunk(&mut buf)?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n])?;
            total += n as u64;
        }
        Ok(total)
    }

    /// Release this part's share of the file.
    pub fn close(&mut self) {
        self.body.close();
    }
}

impl fmt::Display for MimePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mime_type())?;
        if self.multipart {
            if let Some(boundary) = self.boundary() {
                write!(f, " boundary={boundary}")?;
            }
        }
        if self.attachment {
            let name = self.attachment_name().unwrap_or_default();
            write!(f, " attachment={name:?}")?;
        }
        write!(
            f,
            " [{} bytes at {}]",
            self.body.size(),
            self.body.start()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn part_from(data: &[u8]) -> (tempfile::NamedTempFile, MimePart) {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(data).unwrap();
        f.flush().unwrap();
        let stream = WindowedStream::open(f.path()).unwrap();
        let part = MimePart::read(stream).unwrap();
        (f, part)
    }

    #[test]
    fn test_header_and_body_split() {
        let (_f, mut part) = part_from(
            b"Content-Type: text/plain; charset=\"utf-8\"\r\nContent-Transfer-Encoding: 8bit\r\n\r\nHello\r\n",
        );
        assert_eq!(part.headers().len(), 2);
        assert_eq!(part.mime_type(), "text/plain");
        assert_eq!(part.charset().as_deref(), Some("utf-8"));
        assert_eq!(part.transfer_encoding().as_deref(), Some("8bit"));
        assert!(!part.is_multipart());
        assert!(!part.is_attachment());
        assert_eq!(part.raw_body().unwrap(), b"Hello\r\n");
        // Only the body window holds the file
        assert_eq!(part.body().ref_count(), 1);
    }

    #[test]
    fn test_missing_content_type_defaults() {
        let (_f, part) = part_from(b"Subject: x\n\nbody\n");
        assert_eq!(part.content_type(), None);
        assert_eq!(part.mime_type(), "text/plain");
        assert_eq!(part.encoding(), TransferEncoding::SevenBit);
        assert_eq!(part.boundary(), None);
    }

    #[test]
    fn test_multipart_flags() {
        let (_f, part) = part_from(
            b"Content-Type: Multipart/Mixed;\r\n\tboundary=\"XYZ\"\r\n\r\n--XYZ--\r\n",
        );
        assert!(part.is_multipart());
        assert_eq!(part.mime_type(), "multipart/mixed");
        assert_eq!(part.boundary().as_deref(), Some("XYZ"));
        assert!(!part.is_attachment());
    }

    #[test]
    fn test_attachment_detection() {
        let (_f, part) = part_from(
            b"Content-Type: application/pdf\r\nContent-Disposition: attachment; filename=\"a.pdf\"\r\n\r\nx",
        );
        assert!(part.is_attachment());
        assert_eq!(part.attachment_name().as_deref(), Some("a.pdf"));

        let (_f, inline) =
            part_from(b"Content-Type: text/plain\r\nContent-Disposition: inline\r\n\r\nx");
        assert!(!inline.is_attachment());
    }

    #[test]
    fn test_inline_part_with_filename_is_not_attachment() {
        let (_f, image) = part_from(
            b"Content-Type: image/png\r\nContent-ID: <smile>\r\n\
              Content-Disposition: inline; filename=\"smile.png\"\r\n\r\niVBORw0K",
        );
        assert!(!image.is_attachment());
        assert_eq!(image.attachment_name().as_deref(), Some("smile.png"));
    }

    #[test]
    fn test_attachment_name_falls_back_to_content_type() {
        let (_f, part) = part_from(
            b"Content-Type: image/png; name=\"=?UTF-8?B?UsOpc3Vtw6k=?=.png\"\r\nContent-Disposition: attachment\r\n\r\nx",
        );
        assert!(part.is_attachment());
        assert_eq!(part.attachment_name().as_deref(), Some("Résumé.png"));
    }

    #[test]
    fn test_decoded_body_and_text() {
        let (_f, mut part) = part_from(
            b"Content-Type: text/plain; charset=iso-8859-1\r\nContent-Transfer-Encoding: quoted-printable\r\n\r\nCaf=E9=\r\n au lait",
        );
        assert_eq!(part.decoded_body().unwrap(), b"Caf\xe9 au lait");
        assert_eq!(part.text().unwrap(), "Café au lait");
    }

    #[test]
    fn test_base64_body() {
        let (_f, mut part) = part_from(
            b"Content-Type: application/pdf\r\nContent-Transfer-Encoding: base64\r\n\r\nJVBERi0x\r\nLjQgZmFrZQ==\r\n",
        );
        assert_eq!(part.decoded_body().unwrap(), b"%PDF-1.4 fake");
    }

    #[test]
    fn test_copy_body_to_writer() {
        let (_f, mut part) = part_from(b"X-A: 1\n\nline one\nline two\n");
        let mut out = Vec::new();
        let n = part.copy_body_to(&mut out).unwrap();
        assert_eq!(n, 18);
        assert_eq!(out, b"line one\nline two\n");
    }

    #[test]
    fn test_headers_only_part_has_empty_body() {
        let (_f, mut part) = part_from(b"Content-Type: text/plain\r\n");
        assert_eq!(part.body().size(), 0);
        assert_eq!(part.raw_body().unwrap(), b"");
    }

    #[test]
    fn test_display_summary() {
        let (_f, part) = part_from(
            b"Content-Type: application/pdf\r\nContent-Disposition: attachment; filename=a.pdf\r\n\r\n1234",
        );
        let shown = part.to_string();
        assert!(shown.starts_with("application/pdf attachment=\"a.pdf\""));
        assert!(shown.ends_with("[4 bytes at 82]"));
    }
}
