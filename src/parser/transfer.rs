//! Content-Transfer-Encoding decoding (RFC 2045 §6) and the Q/B codecs shared
//! with encoded-word decoding.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use tracing::warn;

use crate::error::{EmlError, Result};

/// Base64 engine that accepts missing padding and stray trailing bits,
/// both common in real-world mail.
pub const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// A `Content-Transfer-Encoding` mechanism.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEncoding {
    SevenBit,
    EightBit,
    Binary,
    Base64,
    QuotedPrintable,
    /// Anything else, kept verbatim (lowercased).
    Other(String),
}

impl TransferEncoding {
    /// Parse a header value such as `"Base64"` or `" quoted-printable "`.
    pub fn parse(value: &str) -> Self {
        let token = value.trim().to_ascii_lowercase();
        match token.as_str() {
            "7bit" => Self::SevenBit,
            "8bit" => Self::EightBit,
            "binary" => Self::Binary,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            _ => Self::Other(token),
        }
    }

    /// `true` if the body bytes are the content bytes.
    pub fn is_identity(&self) -> bool {
        matches!(self, Self::SevenBit | Self::EightBit | Self::Binary)
    }
}

/// Decode a body according to its transfer encoding.
///
/// Unknown mechanisms return the bytes unchanged (with a warning). Only a
/// malformed base64 body is an error.
pub fn decode_body(encoding: &TransferEncoding, raw: &[u8]) -> Result<Vec<u8>> {
    match encoding {
        TransferEncoding::Base64 => decode_base64(raw),
        TransferEncoding::QuotedPrintable => Ok(decode_quoted_printable(raw)),
        TransferEncoding::Other(name) => {
            warn!(encoding = %name, "Unknown transfer encoding, returning raw body");
            Ok(raw.to_vec())
        }
        _ => Ok(raw.to_vec()),
    }
}

/// Decode a base64 body, ignoring line breaks and other whitespace.
pub fn decode_base64(raw: &[u8]) -> Result<Vec<u8>> {
    let compact: Vec<u8> = raw
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    LENIENT_BASE64
        .decode(&compact)
        .map_err(|e| EmlError::Decode(format!("invalid base64 body: {e}")))
}

/// Decode a quoted-printable body. Malformed escapes are kept literally.
pub fn decode_quoted_printable(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] != b'=' {
            out.push(input[i]);
            i += 1;
            continue;
        }

        // Soft line break: '=' then optional trailing blanks then a line end
        let mut j = i + 1;
        while j < input.len() && (input[j] == b' ' || input[j] == b'\t') {
            j += 1;
        }
        if j == input.len() {
            i = j;
            continue;
        }
        if input[j] == b'\n' {
            i = j + 1;
            continue;
        }
        if input[j] == b'\r' {
            i = if input.get(j + 1) == Some(&b'\n') { j + 2 } else { j + 1 };
            continue;
        }

        match (input.get(i + 1), input.get(i + 2)) {
            (Some(&hi), Some(&lo)) if hex_pair(hi, lo).is_some() => {
                out.extend(hex_pair(hi, lo));
                i += 3;
            }
            _ => {
                out.push(b'=');
                i += 1;
            }
        }
    }
    out
}

/// Decode the RFC 2047 "Q" encoding: `_` is a space, `=XX` a byte.
pub fn decode_q_encoding(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                result.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < bytes.len() && hex_pair(bytes[i + 1], bytes[i + 2]).is_some() => {
                result.extend(hex_pair(bytes[i + 1], bytes[i + 2]));
                i += 3;
            }
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    result
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    Some((hex_digit(hi)? << 4) | hex_digit(lo)?)
}

fn hex_digit(c: u8) -> Option<u8> {
    char::from(c).to_digit(16).and_then(|d| u8::try_from(d).ok())
}
