//! Write message parts to disk.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::mail::{MailPart, MailReader, PartKind};

/// One part written by [`extract_parts`].
#[derive(Debug, Clone, Serialize)]
pub struct ExtractedPart {
    /// Child indices of the part within the message.
    pub part: Vec<usize>,
    pub kind: PartKind,
    pub media_type: String,
    /// File the decoded body was written to.
    pub file: PathBuf,
    pub size: u64,
}

/// Decode every attachment (and inline part too when `include_inline` is
/// set) into `output_dir`, never overwriting existing files.
pub fn extract_parts(
    reader: &mut MailReader<'_>,
    output_dir: &Path,
    include_inline: bool,
) -> anyhow::Result<Vec<ExtractedPart>> {
    std::fs::create_dir_all(output_dir)?;
    let mut written = Vec::new();

    while let Some(mut part) = reader.next_part()? {
        if !include_inline && !part.is_attachment() {
            continue;
        }
        let file = unique_path(&output_dir.join(part_file_name(&part)));
        let mut out = BufWriter::new(File::create(&file)?);
        let size = io::copy(&mut part, &mut out)?;
        out.flush()?;

        if let Some(issue) = part.decode_issue() {
            tracing::warn!(file = %file.display(), error = %issue, "Wrote undecoded part body");
        }
        written.push(ExtractedPart {
            part: part.path().to_vec(),
            kind: part.kind().clone(),
            media_type: part.media_type().essence.clone(),
            file,
            size,
        });
    }

    Ok(written)
}

/// The part's own filename when it has one, otherwise `part_<path>.<ext>`.
pub fn part_file_name(part: &MailPart<'_>) -> String {
    let named = match part.kind() {
        PartKind::Attachment { filename } => filename.clone(),
        PartKind::Inline => part.header().filename(),
    };
    if let Some(name) = named {
        return sanitize_filename_part(&name, 150);
    }

    let path = if part.path().is_empty() {
        "0".to_string()
    } else {
        part.path()
            .iter()
            .map(usize::to_string)
            .collect::<Vec<_>>()
            .join("-")
    };
    let ext = match part.media_type().essence.as_str() {
        "text/plain" => "txt",
        "text/html" => "html",
        "message/rfc822" => "eml",
        "application/pdf" => "pdf",
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        _ => "bin",
    };
    format!("part_{path}.{ext}")
}

/// Replace anything outside a conservative set with `_` and truncate.
///
/// Leading dots are dropped so the result can be neither hidden nor a
/// relative path component.
pub fn sanitize_filename_part(s: &str, max_len: usize) -> String {
    let sanitized: String = s
        .trim()
        .trim_start_matches('.')
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '.' | '_' | '@') {
                c
            } else {
                '_'
            }
        })
        .take(max_len)
        .collect();

    if sanitized.is_empty() {
        "unnamed".to_string()
    } else {
        sanitized
    }
}

/// If `path` already exists, append a counter to make it unique.
fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("part");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let parent = path.parent().unwrap_or(Path::new("."));

    (1..)
        .map(|i| {
            if ext.is_empty() {
                parent.join(format!("{stem}_{i}"))
            } else {
                parent.join(format!("{stem}_{i}.{ext}"))
            }
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}
