//! Extract attachments from messages.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::EmlError;
use crate::model::attachment::AttachmentMeta;
use crate::model::message::Message;
use crate::model::part::MimePart;
use crate::parser::multipart;

/// How attachment payloads are written.
#[derive(Debug, Clone, Copy)]
pub struct ExportOptions {
    /// Remove the transfer encoding (base64, quoted-printable) before writing.
    pub decode: bool,
    /// Maximum filename length in characters.
    pub filename_max_len: usize,
    /// Multipart nesting followed when looking for attachments.
    pub max_depth: usize,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            decode: true,
            filename_max_len: 150,
            max_depth: multipart::DEFAULT_MAX_DEPTH,
        }
    }
}

/// Write one attachment part into `output_dir`.
pub fn export_part(
    part: &mut MimePart,
    attachment: &AttachmentMeta,
    output_dir: &Path,
    options: &ExportOptions,
) -> anyhow::Result<PathBuf> {
    let filename = sanitize_filename_part(&attachment.filename, options.filename_max_len);
    // Never overwrite: append a counter if needed
    let path = unique_path(&output_dir.join(&filename));

    if options.decode {
        let data = part.decoded_body()?;
        std::fs::write(&path, &data)?;
    } else {
        let mut out = BufWriter::new(File::create(&path)?);
        part.copy_body_to(&mut out)?;
        out.flush()?;
    }
    tracing::debug!(path = %path.display(), decode = options.decode, "Exported attachment");
    Ok(path)
}

/// Export the attachment at `index` (see [`Message::attachments`]).
pub fn export_attachment(
    message: &mut Message,
    index: usize,
    output_dir: &Path,
    options: &ExportOptions,
) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;
    let mut result = None;
    let mut seen = 0;
    multipart::walk(
        message.root_mut(),
        options.max_depth,
        &mut |part: &mut MimePart, depth| {
            if result.is_some() {
                return;
            }
            if let Some(meta) = AttachmentMeta::from_part(part, seen, depth) {
                if seen == index {
                    result = Some(export_part(part, &meta, output_dir, options));
                }
                seen += 1;
            }
        },
    );
    result.unwrap_or_else(|| {
        Err(EmlError::Export(format!("No attachment at index {index} ({seen} found)")).into())
    })
}

/// Extract all attachments from a single message.
///
/// A failing attachment is logged and skipped; the paths written are returned.
pub fn export_all_attachments(
    message: &mut Message,
    output_dir: &Path,
    options: &ExportOptions,
) -> anyhow::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(output_dir)?;
    let mut paths = Vec::new();
    let mut seen = 0;
    multipart::walk(
        message.root_mut(),
        options.max_depth,
        &mut |part: &mut MimePart, depth| {
            let Some(meta) = AttachmentMeta::from_part(part, seen, depth) else {
                return;
            };
            seen += 1;
            match export_part(part, &meta, output_dir, options) {
                Ok(path) => paths.push(path),
                Err(e) => {
                    tracing::warn!(
                        filename = %meta.filename,
                        error = %e,
                        "Failed to export attachment"
                    );
                }
            }
        },
    );
    Ok(paths)
}

/// Make a string safe to use as a filename.
pub fn sanitize_filename_part(s: &str, max_len: usize) -> String {
    let sanitized: String = s
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '.' || c == '_' || c == '@' {
                c
            } else {
                '_'
            }
        })
        .take(max_len)
        .collect();
    // No hidden files, no "." or ".."
    let sanitized = sanitized.trim_start_matches('.');

    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized.to_string()
    }
}

/// If `path` already exists, append a counter to make it unique.
fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let parent = path.parent().unwrap_or(Path::new("."));

    for i in 1..1000 {
        let candidate = if ext.is_empty() {
            parent.join(format!("{stem}_{i}"))
        } else {
            parent.join(format!("{stem}_{i}.{ext}"))
        };
        if !candidate.exists() {
            return candidate;
        }
    }

    // Fallback, very unlikely
    parent.join(format!("{stem}_dup.{ext}"))
}
