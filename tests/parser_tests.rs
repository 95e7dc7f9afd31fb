//! Integration tests for message opening, multipart splitting, header
//! decoding and attachment export.

use std::path::{Path, PathBuf};

use assert_fs::prelude::*;
use predicates::prelude::*;

use emlshell::error::EmlError;
use emlshell::export::attachment::{export_all_attachments, export_attachment, ExportOptions};
use emlshell::model::{Message, MimePart};
use emlshell::parser::header::{decode_encoded_words, get_parameter_value};
use emlshell::parser::multipart::{self, DEFAULT_MAX_DEPTH};
use emlshell::store::WindowedStream;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// (name, decoded content) for every attachment, in file order.
fn our_attachments(path: &Path) -> Vec<(String, Vec<u8>)> {
    let mut message = Message::open(path).unwrap();
    let mut found = Vec::new();
    multipart::walk(
        message.root_mut(),
        DEFAULT_MAX_DEPTH,
        &mut |part: &mut MimePart, _| {
            if part.is_attachment() {
                let name = part.attachment_name().unwrap_or_default();
                found.push((name, part.decoded_body().unwrap()));
            }
        },
    );
    found
}

// ─── Test 1: Root identity fields ───────────────────────────────────

#[test]
fn test_open_report_identity() {
    let message = Message::open(fixture("report.eml")).unwrap();
    let file_len = std::fs::metadata(fixture("report.eml")).unwrap().len();
    assert_eq!(message.size(), file_len);
    assert_eq!(message.from(), Some("José García <jose@example.com>"));
    assert_eq!(message.to(), Some("Team <team@example.com>"));
    assert_eq!(message.subject(), Some("Quarterly résumé and report"));
    assert_eq!(
        message.date().unwrap().to_rfc3339(),
        "2024-01-04T09:00:00+00:00"
    );
    assert!(message.is_multipart());
    assert_eq!(message.boundary().as_deref(), Some("----=_Part_0_1234.5678"));
}

// ─── Test 2: End-to-end 3-part message ──────────────────────────────

#[test]
fn test_report_three_parts_one_attachment() {
    let mut message = Message::open(fixture("report.eml")).unwrap();
    let mut parts = message.parts().into_result().unwrap();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0].mime_type(), "text/plain");
    assert_eq!(parts[1].mime_type(), "text/html");
    assert_eq!(parts[2].mime_type(), "application/pdf");

    let attachments: Vec<_> = parts.iter().filter(|p| p.is_attachment()).collect();
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].attachment_name().as_deref(), Some("Résumé.pdf"));

    assert_eq!(parts[0].text().unwrap(), "Hello team,\r\n\r\nThe résumé is attached.");
    assert!(parts[1].text().unwrap().ends_with("</html>"));

    let expected = std::fs::read(fixture("report.pdf")).unwrap();
    assert_eq!(parts[2].decoded_body().unwrap(), expected);
}

#[test]
fn test_report_attachment_export_matches_fixture() {
    let temp = assert_fs::TempDir::new().unwrap();
    let mut message = Message::open(fixture("report.eml")).unwrap();
    let paths = export_all_attachments(&mut message, temp.path(), &ExportOptions::default())
        .unwrap();
    assert_eq!(paths.len(), 1);

    temp.child("Résumé.pdf")
        .assert(predicate::path::eq_file(fixture("report.pdf")));
    temp.close().unwrap();
}

#[test]
fn test_export_raw_and_without_overwrite() {
    let temp = assert_fs::TempDir::new().unwrap();
    let mut message = Message::open(fixture("report.eml")).unwrap();
    let raw = ExportOptions {
        decode: false,
        ..ExportOptions::default()
    };

    let first = export_attachment(&mut message, 0, temp.path(), &raw).unwrap();
    let second = export_attachment(&mut message, 0, temp.path(), &raw).unwrap();
    assert_ne!(first, second);

    temp.child("Résumé.pdf")
        .assert(predicate::str::starts_with("JVBERi0xLjQK"));
    temp.child("Résumé_1.pdf").assert(predicate::path::exists());

    let missing = export_attachment(&mut message, 5, temp.path(), &raw);
    assert!(missing.is_err());
}

// ─── Test 3: Nested multiparts and RFC 2231 continuations ───────────

#[test]
fn test_nested_tree() {
    let mut message = Message::open(fixture("nested.eml")).unwrap();
    let mut seen = Vec::new();
    let visited = multipart::walk(
        message.root_mut(),
        DEFAULT_MAX_DEPTH,
        &mut |part: &mut MimePart, depth| seen.push((depth, part.mime_type())),
    );
    assert_eq!(visited, 6);
    let types: Vec<_> = seen.iter().map(|(d, t)| format!("{d}:{t}")).collect();
    assert_eq!(
        types,
        [
            "0:multipart/mixed",
            "1:multipart/alternative",
            "2:text/plain",
            "2:text/html",
            "1:application/pdf",
            "1:text/plain",
        ]
    );

    let atts = message.attachments(DEFAULT_MAX_DEPTH);
    let names: Vec<_> = atts.iter().map(|a| a.filename.as_str()).collect();
    assert_eq!(names, ["文件.pdf", "notes.txt"]);
    assert_eq!(atts[0].encoding, "base64");
    assert_eq!(atts[1].encoding, "quoted-printable");
}

#[test]
fn test_nested_attachment_contents() {
    let found = our_attachments(&fixture("nested.eml"));
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].1, std::fs::read(fixture("report.pdf")).unwrap());
    assert_eq!(found[1].1, std::fs::read(fixture("notes.txt")).unwrap());
}

// ─── Test 4: Idempotence ────────────────────────────────────────────

#[test]
fn test_parsing_twice_is_identical() {
    let snapshot = || {
        let mut message = Message::open(fixture("nested.eml")).unwrap();
        let mut out = Vec::new();
        multipart::walk(
            message.root_mut(),
            DEFAULT_MAX_DEPTH,
            &mut |part: &mut MimePart, depth| {
                out.push((
                    depth,
                    part.headers().to_vec(),
                    part.body().start(),
                    part.body().size(),
                ));
            },
        );
        out
    };
    assert_eq!(snapshot(), snapshot());
}

// ─── Test 5: Windowing and reference counting ───────────────────────

#[test]
fn test_children_stay_inside_parent_window() {
    let mut message = Message::open(fixture("report.eml")).unwrap();
    let root_start = message.body().start();
    let root_end = root_start + message.body().size();
    let parts = message.parts().into_result().unwrap();
    let mut previous_end = root_start;
    for part in &parts {
        let start = part.body().start();
        let end = start + part.body().size();
        assert!(start >= previous_end && end <= root_end);
        previous_end = end;
    }
}

#[test]
fn test_close_one_child_keeps_siblings() {
    let mut message = Message::open(fixture("report.eml")).unwrap();
    let mut parts = message.parts().into_result().unwrap();
    assert_eq!(message.body().ref_count(), 4);

    parts[0].close();
    parts[1].close();
    assert_eq!(message.body().ref_count(), 2);
    assert!(parts[2].decoded_body().is_ok());

    message.close();
    assert!(matches!(parts[2].raw_body(), Err(EmlError::Closed)));
    assert!(!parts[2].body().is_source_open());
}

#[test]
fn test_last_close_releases_file() {
    let mut stream = WindowedStream::open(fixture("report.eml")).unwrap();
    let mut a = stream.new_stream(0, Some(10)).unwrap();
    let mut b = stream.new_stream(10, Some(20)).unwrap();
    assert_eq!(stream.ref_count(), 3);

    stream.close();
    a.close();
    assert!(b.is_source_open());
    assert_eq!(b.read_line().unwrap().as_deref(), Some("F-8?B?Sm9z"));
    b.close();
    assert!(!b.is_source_open());
}

#[test]
fn test_siblings_read_from_threads() {
    let mut message = Message::open(fixture("report.eml")).unwrap();
    let mut parts = message.parts().into_result().unwrap();
    let expected: Vec<Vec<u8>> = parts.iter_mut().map(|p| p.raw_body().unwrap()).collect();

    let handles: Vec<_> = parts
        .into_iter()
        .map(|mut part| {
            std::thread::spawn(move || {
                let mut bodies = Vec::new();
                for _ in 0..50 {
                    bodies.push(part.raw_body().unwrap());
                }
                bodies
            })
        })
        .collect();

    for (handle, expected) in handles.into_iter().zip(expected) {
        for body in handle.join().unwrap() {
            assert_eq!(body, expected);
        }
    }
}

// ─── Test 6: Truncated files ────────────────────────────────────────

#[test]
fn test_truncation_reads_as_end_of_window() {
    let temp = assert_fs::TempDir::new().unwrap();
    let copy = temp.child("cut.eml");
    copy.write_file(&fixture("report.eml")).unwrap();

    let mut message = Message::open(copy.path()).unwrap();
    let raw = std::fs::read(copy.path()).unwrap();
    let cut = raw
        .windows(4)
        .position(|w| w == b"JVBE")
        .unwrap()
        + 100;
    std::fs::OpenOptions::new()
        .write(true)
        .open(copy.path())
        .unwrap()
        .set_len(cut as u64)
        .unwrap();

    // The body window still spans the old length; reads stop at the real end
    let split = message.parts();
    assert!(split.is_complete());
    let mut parts = split.parts;
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0].text().unwrap(), "Hello team,\r\n\r\nThe résumé is attached.");
    assert!(parts[2].is_attachment());

    let cut_body = parts[2].raw_body().unwrap();
    assert_eq!(cut_body.len(), 100);
    assert!(cut_body.starts_with(b"JVBERi0x"));
    assert!(cut_body.ends_with(b"\r\nZW5kb2JqCjIgMCBvYmoKPD"));
}

// ─── Test 7: Header decoding ────────────────────────────────────────

#[test]
fn test_rfc2231_continuation_reassembly() {
    let header = "Content-Disposition: attachment; filename*0*=UTF-8''%66%6F%6F; filename*1*=%62%61%72.txt";
    assert_eq!(get_parameter_value(header, "filename"), "foobar.txt");
}

#[test]
fn test_encoded_word_unknown_charset_is_literal() {
    let value = "=?x-unknown-9?B?SGVsbG8=?=";
    assert_eq!(decode_encoded_words(value), value);
}

// ─── Test 8: Stray bytes before a delimiter ─────────────────────────

#[test]
fn test_stray_bytes_before_delimiter_are_tolerated() {
    let mut message = Message::open(fixture("stray.eml")).unwrap();
    let mut parts = message.parts().into_result().unwrap();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[1].attachment_name().as_deref(), Some("data.bin"));
    assert_eq!(parts[1].raw_body().unwrap(), b"payloadjunk");
    assert_eq!(parts[2].text().unwrap(), "last body");
}

#[test]
fn test_stray_bytes_before_close_delimiter_are_dropped() {
    let temp = assert_fs::TempDir::new().unwrap();
    let eml = temp.child("close.eml");
    eml.write_binary(
        b"Content-Type: multipart/mixed; boundary=B\r\n\r\n\
          --B\r\nContent-Type: text/plain\r\n\r\nbody\r\ntail--B--\r\n",
    )
    .unwrap();

    let mut message = Message::open(eml.path()).unwrap();
    let mut parts = message.parts().into_result().unwrap();
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].text().unwrap(), "body");
}

// ─── Test 9: Inline images are not attachments ──────────────────────

#[test]
fn test_inline_image_with_filename_is_not_an_attachment() {
    let temp = assert_fs::TempDir::new().unwrap();
    let eml = temp.child("related.eml");
    eml.write_binary(
        b"Content-Type: multipart/related; boundary=rel\r\n\r\n\
          --rel\r\nContent-Type: text/html\r\n\r\n<img src=\"cid:smile\">\r\n\
          --rel\r\nContent-Type: image/png\r\nContent-ID: <smile>\r\n\
          Content-Disposition: inline; filename=\"smile.png\"\r\n\
          Content-Transfer-Encoding: base64\r\n\r\niVBORw0KGgo=\r\n\
          --rel--\r\n",
    )
    .unwrap();

    let mut message = Message::open(eml.path()).unwrap();
    let parts = message.parts().into_result().unwrap();
    let flags: Vec<bool> = parts.iter().map(MimePart::is_attachment).collect();
    assert_eq!(flags, [false, false]);
    assert_eq!(parts[1].attachment_name().as_deref(), Some("smile.png"));
    assert!(message.attachments(DEFAULT_MAX_DEPTH).is_empty());

    let out = temp.child("out");
    let written =
        export_all_attachments(&mut message, out.path(), &ExportOptions::default()).unwrap();
    assert!(written.is_empty());
}

// ─── Test 10: Conformance with mail-parser ──────────────────────────

fn reference_attachments(path: &Path) -> Vec<(String, Vec<u8>)> {
    use mail_parser::{MessageParser, MimeHeaders};

    let raw = std::fs::read(path).unwrap();
    let parsed = MessageParser::default().parse(&raw).unwrap();
    parsed
        .attachments()
        .filter_map(|part| {
            part.attachment_name()
                .map(|name| (name.to_string(), part.contents().to_vec()))
        })
        .collect()
}

#[test]
fn test_attachments_agree_with_mail_parser() {
    for name in ["report.eml", "nested.eml"] {
        let ours = our_attachments(&fixture(name));
        let reference = reference_attachments(&fixture(name));
        assert_eq!(ours.len(), reference.len(), "{name}");
        for ((our_name, our_data), (ref_name, ref_data)) in ours.iter().zip(&reference) {
            assert_eq!(our_name, ref_name, "{name}");
            assert_eq!(our_data.trim_ascii_end(), ref_data.trim_ascii_end(), "{name}");
        }
    }
}
