//! Opening `.eml` files (bare RFC 5322 messages).

use std::path::Path;

use tracing::debug;

use crate::error::Result;
use crate::model::message::Message;
use crate::model::part::MimePart;
use crate::parser::header::{decode_encoded_words, field_value, redecode_utf8, unfold_value};
use crate::store::WindowedStream;

/// Parse a single `.eml` file into a [`Message`].
///
/// Only the top-level header block is read here; child parts are split on
/// demand. On failure nothing stays open.
pub fn parse_eml(path: impl AsRef<Path>) -> Result<Message> {
    let path = path.as_ref();
    let stream = WindowedStream::open(path)?;
    let size = stream.size();
    let root = MimePart::read(stream)?;
    let identity = Identity::scan(root.headers());
    debug!(
        path = %path.display(),
        size,
        headers = root.headers().len(),
        multipart = root.is_multipart(),
        "Opened message"
    );
    Ok(Message::new(
        root,
        size,
        identity.from,
        identity.to,
        identity.subject,
    ))
}

/// Sender, recipient and subject, decoded for display.
#[derive(Debug, Default)]
struct Identity {
    from: Option<String>,
    to: Option<String>,
    subject: Option<String>,
}

impl Identity {
    /// One pass over the header lines; the first occurrence of each field wins.
    fn scan(headers: &[String]) -> Self {
        let mut identity = Self::default();
        for line in headers {
            if identity.from.is_none() {
                identity.from = field_value(line, "From").map(decode_field);
            }
            if identity.to.is_none() {
                identity.to = field_value(line, "To").map(decode_field);
            }
            if identity.subject.is_none() {
                identity.subject = field_value(line, "Subject").map(decode_field);
            }
            if identity.from.is_some() && identity.to.is_some() && identity.subject.is_some() {
                break;
            }
        }
        identity
    }
}

fn decode_field(value: &str) -> String {
    decode_encoded_words(&redecode_utf8(&unfold_value(value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_identity_scan() {
        let headers = lines(&[
            "From: Alice <alice@example.com>",
            "to: bob@example.com",
            "Subject: =?UTF-8?B?SG9sYQ==?=\n =?UTF-8?B?IG11bmRv?=",
            "Subject: ignored",
        ]);
        let id = Identity::scan(&headers);
        assert_eq!(id.from.as_deref(), Some("Alice <alice@example.com>"));
        assert_eq!(id.to.as_deref(), Some("bob@example.com"));
        assert_eq!(id.subject.as_deref(), Some("Hola mundo"));
    }

    #[test]
    fn test_identity_missing_fields() {
        let id = Identity::scan(&lines(&["Subject: only"]));
        assert_eq!(id.from, None);
        assert_eq!(id.to, None);
        assert_eq!(id.subject.as_deref(), Some("only"));
    }

    #[test]
    fn test_parse_eml_missing_file() {
        let err = parse_eml("/nonexistent/message.eml").unwrap_err();
        assert!(matches!(err, crate::error::EmlError::FileNotFound(_)));
    }
}
