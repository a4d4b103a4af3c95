use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::message::{RawMessage, decode_body, walk_parts};

const RESUME_EXTENSIONS: [&str; 3] = [".pdf", ".doc", ".docx"];

/// Where the resume bytes live: decoded inline, or behind an attachment id
/// that must be fetched through the inbox source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResumeData {
    Inline(Vec<u8>),
    Remote { attachment_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeRef {
    pub filename: String,
    pub data: ResumeData,
}

/// Locates the first resume-like attachment in the message: a part whose
/// filename ends in .pdf/.doc/.docx (case-insensitive) and that carries a
/// retrievable body. Returns `None` when no such part exists.
pub fn resolve_resume(msg: &RawMessage) -> Option<ResumeRef> {
    for part in walk_parts(&msg.payload) {
        if part.filename.is_empty() {
            continue;
        }
        let lower = part.filename.to_lowercase();
        if !RESUME_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
            continue;
        }
        if let Some(id) = &part.body.attachment_id {
            return Some(ResumeRef {
                filename: part.filename.clone(),
                data: ResumeData::Remote {
                    attachment_id: id.clone(),
                },
            });
        }
        if let Some(bytes) = part.body.data.as_deref().and_then(decode_body) {
            return Some(ResumeRef {
                filename: part.filename.clone(),
                data: ResumeData::Inline(bytes),
            });
        }
    }
    None
}

/// Extracts plain text from resume bytes. PDFs go through a real text
/// extractor; anything else is taken as-is with lossy UTF-8 decoding.
pub fn resume_text(filename: &str, bytes: &[u8]) -> Result<String> {
    if filename.to_lowercase().ends_with(".pdf") {
        let text = pdf_extract::extract_text_from_mem(bytes)
            .with_context(|| format!("failed to extract text from {}", filename))?;
        return Ok(text);
    }
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

/// Keeps alphanumerics, dot, dash, underscore, and space; everything else
/// becomes an underscore.
pub fn safe_filename(name: &str) -> String {
    let safe = match Regex::new(r"[^A-Za-z0-9.\- _]") {
        Ok(re) => re.replace_all(name, "_").trim().to_string(),
        Err(_) => name.to_string(),
    };
    if safe.is_empty() {
        "attachment".to_string()
    } else {
        safe
    }
}

/// Returns a path in `dir` that does not collide with an existing file,
/// appending ` (n)` before the extension as needed.
pub fn unique_path(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match filename.rfind('.') {
        Some(idx) => (&filename[..idx], &filename[idx..]),
        None => (filename, ""),
    };
    let mut i = 1;
    loop {
        let candidate = dir.join(format!("{} ({}){}", stem, i, ext));
        if !candidate.exists() {
            return candidate;
        }
        i += 1;
    }
}

/// Writes resume bytes into the scratch directory with collision-safe
/// renaming, creating the directory if needed. Returns the saved path.
pub fn save_to_dir(dir: &Path, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create scratch dir {}", dir.display()))?;
    let path = unique_path(dir, &safe_filename(filename));
    std::fs::write(&path, bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessagePart, PartBody};
    use base64::Engine as _;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    fn attachment_part(filename: &str, attachment_id: Option<&str>, inline: Option<&[u8]>) -> MessagePart {
        MessagePart {
            mime_type: "application/octet-stream".to_string(),
            filename: filename.to_string(),
            body: PartBody {
                data: inline.map(|b| URL_SAFE_NO_PAD.encode(b)),
                attachment_id: attachment_id.map(str::to_string),
            },
            ..Default::default()
        }
    }

    fn message_with(parts: Vec<MessagePart>) -> RawMessage {
        RawMessage {
            id: "m1".to_string(),
            subject: String::new(),
            payload: MessagePart {
                mime_type: "multipart/mixed".to_string(),
                parts,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_resolve_resume_picks_first_matching_extension() {
        let msg = message_with(vec![
            attachment_part("notes.txt", Some("a0"), None),
            attachment_part("Resume.PDF", Some("a1"), None),
            attachment_part("other.docx", Some("a2"), None),
        ]);
        let resume = resolve_resume(&msg).unwrap();
        assert_eq!(resume.filename, "Resume.PDF");
        match resume.data {
            ResumeData::Remote { attachment_id } => assert_eq!(attachment_id, "a1"),
            ResumeData::Inline(_) => panic!("expected remote reference"),
        }
    }

    #[test]
    fn test_resolve_resume_skips_parts_without_retrievable_body() {
        let msg = message_with(vec![
            attachment_part("resume.pdf", None, None),
            attachment_part("backup.doc", Some("a9"), None),
        ]);
        let resume = resolve_resume(&msg).unwrap();
        assert_eq!(resume.filename, "backup.doc");
    }

    #[test]
    fn test_resolve_resume_inline_body_decoded() {
        let msg = message_with(vec![attachment_part("cv.docx", None, Some(b"binary"))]);
        let resume = resolve_resume(&msg).unwrap();
        match resume.data {
            ResumeData::Inline(bytes) => assert_eq!(bytes, b"binary"),
            ResumeData::Remote { .. } => panic!("expected inline data"),
        }
    }

    #[test]
    fn test_resolve_resume_none_when_no_match() {
        let msg = message_with(vec![attachment_part("photo.png", Some("a1"), None)]);
        assert!(resolve_resume(&msg).is_none());
    }

    #[test]
    fn test_safe_filename_replaces_forbidden_chars() {
        assert_eq!(safe_filename("Jane Doe: CV/2024?.pdf"), "Jane Doe_ CV_2024_.pdf");
        assert_eq!(safe_filename("///"), "___");
        assert_eq!(safe_filename(""), "attachment");
    }

    #[test]
    fn test_unique_path_appends_counter() {
        let dir = tempfile::tempdir().unwrap();
        let first = unique_path(dir.path(), "cv.pdf");
        assert_eq!(first, dir.path().join("cv.pdf"));
        std::fs::write(&first, b"x").unwrap();
        let second = unique_path(dir.path(), "cv.pdf");
        assert_eq!(second, dir.path().join("cv (1).pdf"));
        std::fs::write(&second, b"y").unwrap();
        assert_eq!(unique_path(dir.path(), "cv.pdf"), dir.path().join("cv (2).pdf"));
    }

    #[test]
    fn test_save_to_dir_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_to_dir(dir.path(), "résumé.pdf", b"content").unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"content");
    }

    #[test]
    fn test_resume_text_non_pdf_is_lossy_utf8() {
        let text = resume_text("cv.txt", b"plain resume text").unwrap();
        assert_eq!(text, "plain resume text");
    }
}
