//! Header block parsing: folding, parameter extraction (RFC 2045/2231),
//! encoded-words (RFC 2047), and date parsing.
//!
//! Header lines come out of [`WindowedStream::read_line`] with one char per
//! byte. Functions here that return display text re-decode those bytes.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use encoding_rs::Encoding;
use tracing::{debug, warn};

use crate::error::Result;
use crate::parser::transfer::{decode_q_encoding, LENIENT_BASE64};
use crate::store::window::{latin1_bytes, WindowedStream};

/// Read the header block at the cursor and unfold it.
///
/// Stops after the blank line ending the block (or at the end of the
/// window). A line starting with a space or tab continues the previous
/// header; it is appended after a `'\n'` so the fold stays visible to
/// parameter scans.
pub fn unfold_headers(stream: &mut WindowedStream) -> Result<Vec<String>> {
    let mut headers: Vec<String> = Vec::new();
    while let Some(line) = stream.read_line()? {
        if line.is_empty() {
            break;
        }
        let folded = line.starts_with(' ') || line.starts_with('\t');
        match headers.last_mut() {
            Some(last) if folded => {
                last.push('\n');
                last.push_str(&line);
            }
            _ => headers.push(line),
        }
    }
    Ok(headers)
}

/// Value of a header line if its field name is `name` (case-insensitive).
///
/// The value is everything after the colon, untrimmed.
pub fn field_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let (field, value) = line.split_once(':')?;
    field.trim_end().eq_ignore_ascii_case(name).then_some(value)
}

/// First header line named `name`, returning its value.
pub fn find_field<'a>(headers: &'a [String], name: &str) -> Option<&'a str> {
    headers.iter().find_map(|line| field_value(line, name))
}

/// Remove fold markers and surrounding whitespace from a header value.
pub fn unfold_value(value: &str) -> String {
    value
        .chars()
        .filter(|&c| c != '\r' && c != '\n')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Turn a byte-per-char header value into text: the bytes are read as
/// UTF-8 when valid, otherwise the value is returned unchanged.
pub fn redecode_utf8(value: &str) -> String {
    if value.is_ascii() {
        return value.to_string();
    }
    match String::from_utf8(latin1_bytes(value)) {
        Ok(text) => text,
        Err(_) => value.to_string(),
    }
}

/// Extract parameter `name` from a header line, decoded for display.
///
/// Looks for `name=` first (quoted with `"` or `'`, or bare up to `;`), and
/// decodes encoded-words in the value. Falls back to the RFC 2231 forms
/// `name*=charset''value` and `name*0*=charset''...; name*1*=...`.
/// Returns an empty string when the parameter is absent.
pub fn get_parameter_value(header: &str, name: &str) -> String {
    if let Some(raw) = plain_parameter(header, name) {
        return decode_encoded_words(&redecode_utf8(&raw));
    }
    if let Some(value) = extended_parameter(header, name) {
        return value;
    }
    continued_parameter(header, name).unwrap_or_default()
}

/// Extract parameter `name` without any decoding (for boundary tokens).
pub fn get_raw_parameter_value(header: &str, name: &str) -> String {
    plain_parameter(header, name).unwrap_or_default()
}

/// `name=value` or `name="value"`. `None` if absent or the quote never closes.
fn plain_parameter(header: &str, name: &str) -> Option<String> {
    let at = find_parameter(header, &format!("{name}="))?;
    let rest = &header[at..];
    match rest.chars().next() {
        Some(quote @ ('"' | '\'')) => {
            let inner = &rest[1..];
            match inner.find(quote) {
                Some(close) => Some(unfold_value(&inner[..close])),
                None => {
                    debug!(parameter = name, "Unterminated quoted parameter");
                    None
                }
            }
        }
        _ => {
            let end = rest.find([';', '\r', '\n']).unwrap_or(rest.len());
            Some(rest[..end].trim().to_string())
        }
    }
}

/// `name*=charset'lang'percent-encoded`.
fn extended_parameter(header: &str, name: &str) -> Option<String> {
    let at = find_parameter(header, &format!("{name}*="))?;
    let raw = segment_value(header, at);
    let (charset, encoded) = split_charset(&raw).unwrap_or(("utf-8", raw.as_str()));
    let bytes: Vec<u8> = percent_encoding::percent_decode(&latin1_bytes(encoded)).collect();
    match decode_charset(charset, &bytes) {
        Some(text) => Some(text),
        None => {
            warn!(charset, parameter = name, "Unknown charset in extended parameter");
            Some(raw)
        }
    }
}

/// `name*0*=charset''seg0; name*1*=seg1; ...` (plain `name*N=` segments allowed).
///
/// Segments are joined in numeric order and decoded with the charset named
/// by segment 0. Each key is searched afresh, so segments may sit on
/// different folded lines.
fn continued_parameter(header: &str, name: &str) -> Option<String> {
    let mut charset: Option<String> = None;
    let mut bytes: Vec<u8> = Vec::new();
    let mut literal = String::new();

    for index in 0u32.. {
        let (at, extended) = match find_parameter(header, &format!("{name}*{index}*=")) {
            Some(at) => (at, true),
            None => match find_parameter(header, &format!("{name}*{index}=")) {
                Some(at) => (at, false),
                None => break,
            },
        };
        let mut value = segment_value(header, at);
        if extended {
            if index == 0 {
                if let Some((cs, rest)) = split_charset(&value) {
                    charset = Some(cs.to_string());
                    value = rest.to_string();
                }
            }
            bytes.extend(percent_encoding::percent_decode(&latin1_bytes(&value)));
        } else {
            bytes.extend(latin1_bytes(&value));
        }
        literal.push_str(&value);
    }

    if literal.is_empty() && bytes.is_empty() {
        return None;
    }
    let charset = charset.as_deref().unwrap_or("utf-8");
    match decode_charset(charset, &bytes) {
        Some(text) => Some(text),
        None => {
            warn!(charset, parameter = name, "Unknown charset in continued parameter");
            Some(literal)
        }
    }
}

/// Byte offset just past `key` where it starts a parameter (preceded by the
/// line start, `;`, `:` or whitespace). Case-insensitive.
fn find_parameter(header: &str, key: &str) -> Option<usize> {
    let haystack = header.to_ascii_lowercase();
    let needle = key.to_ascii_lowercase();
    let mut from = 0;
    while let Some(found) = haystack[from..].find(&needle) {
        let idx = from + found;
        let boundary = haystack[..idx]
            .chars()
            .next_back()
            .is_none_or(|c| c == ';' || c == ':' || c.is_whitespace());
        if boundary {
            return Some(idx + needle.len());
        }
        from = idx + needle.len();
    }
    None
}

/// A segment value runs to the next `;`; folds, blanks and quotes are stripped.
fn segment_value(header: &str, at: usize) -> String {
    let rest = &header[at..];
    let end = rest.find(';').unwrap_or(rest.len());
    let value = unfold_value(&rest[..end]);
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .map(str::to_string)
        .unwrap_or(value)
}

/// Split `charset'language'value`.
fn split_charset(value: &str) -> Option<(&str, &str)> {
    let first = value.find('\'')?;
    let second = first + 1 + value[first + 1..].find('\'')?;
    Some((&value[..first], &value[second + 1..]))
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
///
/// A word that cannot be decoded (unknown charset, bad base64, unknown
/// encoding) is left exactly as written.
pub fn decode_encoded_words(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut remaining = input;
    let mut last_was_encoded = false;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        // Whitespace between two encoded words is dropped (RFC 2047 §6.2)
        if !last_was_encoded || !before.trim().is_empty() {
            result.push_str(before);
        }

        let after_start = &remaining[start + 2..];
        match decode_one_word(after_start) {
            Some((text, consumed)) => {
                result.push_str(&text);
                remaining = &after_start[consumed..];
                last_was_encoded = true;
            }
            None => {
                result.push_str("=?");
                remaining = after_start;
                last_was_encoded = false;
            }
        }
    }

    result.push_str(remaining);
    result
}

/// Decode `charset?encoding?text?=`; returns the text and the bytes consumed.
fn decode_one_word(s: &str) -> Option<(String, usize)> {
    let (charset, rest) = s.split_once('?')?;
    let (encoding, rest) = rest.split_once('?')?;
    let end = rest.find("?=")?;
    let encoded_text = &rest[..end];
    if charset.is_empty() || encoded_text.contains(char::is_whitespace) {
        return None;
    }
    let consumed = charset.len() + 1 + encoding.len() + 1 + end + 2;

    let bytes = match encoding {
        "B" | "b" => {
            use base64::Engine;
            LENIENT_BASE64.decode(encoded_text).ok()?
        }
        "Q" | "q" => decode_q_encoding(encoded_text),
        _ => return None,
    };

    match decode_charset(charset, &bytes) {
        Some(text) => Some((text, consumed)),
        None => {
            warn!(charset, "Unknown charset in encoded-word, keeping literal");
            None
        }
    }
}

/// Decode bytes using a charset label. `None` if the label is unknown.
///
/// An RFC 2231 language suffix (`utf-8*en`) is ignored.
pub fn decode_charset(charset: &str, bytes: &[u8]) -> Option<String> {
    let label = charset.trim();
    let label = label.split('*').next().unwrap_or(label);
    let encoding = Encoding::for_label(label.as_bytes())?;
    let (decoded, _) = encoding.decode_without_bom_handling(bytes);
    Some(decoded.into_owned())
}

/// Decode a byte-per-char string with the named charset, UTF-8 if unknown.
pub fn decode_line(line: &str, charset: Option<&str>) -> String {
    let bytes = latin1_bytes(line);
    charset
        .and_then(|cs| decode_charset(cs, &bytes))
        .unwrap_or_else(|| String::from_utf8_lossy(&bytes).into_owned())
}

/// Parse an email date string in various common formats.
///
/// Supports RFC 2822, ISO 8601, and a few broken real-world variants.
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = unfold_value(date_str);
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(&trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(&trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    // Trailing comments such as "(UTC)" and the day of week confuse chrono
    let without_comment = match trimmed.find('(') {
        Some(pos) => trimmed[..pos].trim(),
        None => trimmed.as_str(),
    };
    let core = match without_comment.split_once(',') {
        Some((_, rest)) => rest.trim(),
        None => without_comment,
    };
    let core = replace_named_tz(core);

    const FORMATS: [&str; 5] = [
        "%d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M %z",
        "%d %b %Y %H:%M:%S",
        "%Y-%m-%d %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S",
    ];
    for fmt in FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&core, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(ndt) = NaiveDateTime::parse_from_str(&core, fmt) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }

    warn!(date = %trimmed, "Could not parse date");
    None
}

/// Replace a trailing well-known timezone abbreviation with its offset.
fn replace_named_tz(s: &str) -> String {
    const ZONES: [(&str, &str); 10] = [
        ("EST", "-0500"),
        ("EDT", "-0400"),
        ("CST", "-0600"),
        ("CDT", "-0500"),
        ("PST", "-0800"),
        ("PDT", "-0700"),
        ("GMT", "+0000"),
        ("UTC", "+0000"),
        ("CET", "+0100"),
        ("CEST", "+0200"),
    ];
    for (name, offset) in ZONES {
        if let Some(head) = s.strip_suffix(name) {
            if head.ends_with(' ') {
                return format!("{head}{offset}");
            }
        }
    }
    s.to_string()
}
