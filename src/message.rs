use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use regex::Regex;
use scraper::Html;
use serde::{Deserialize, Serialize};

use crate::attachment;
use crate::models::ApplicationRecord;

/// One node of a MIME-like part tree, shaped like the Gmail API payload:
/// a content type, an optional filename, an optional body (inline base64url
/// data or an attachment reference), and nested parts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub body: PartBody,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartBody {
    /// base64url-encoded content, when the body is carried inline.
    #[serde(default)]
    pub data: Option<String>,
    /// Reference to be fetched through the inbox source, for larger bodies.
    #[serde(default)]
    pub attachment_id: Option<String>,
}

/// An unparsed inbox message: id, subject, and the root of its part tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub payload: MessagePart,
}

/// Pre-order depth-first traversal of a part tree.
pub fn walk_parts(root: &MessagePart) -> PartIter<'_> {
    PartIter { stack: vec![root] }
}

pub struct PartIter<'a> {
    stack: Vec<&'a MessagePart>,
}

impl<'a> Iterator for PartIter<'a> {
    type Item = &'a MessagePart;

    fn next(&mut self) -> Option<Self::Item> {
        let part = self.stack.pop()?;
        // Push children in reverse so siblings come out in document order.
        for child in part.parts.iter().rev() {
            self.stack.push(child);
        }
        Some(part)
    }
}

/// Decodes base64url body data, tolerating both padded and unpadded input.
pub fn decode_body(data: &str) -> Option<Vec<u8>> {
    let trimmed = data.trim().trim_end_matches('=');
    URL_SAFE_NO_PAD.decode(trimmed).ok()
}

/// Renders an HTML fragment to plain text, one chunk per text node.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    document
        .root_element()
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extracts a structured application record from a raw message. Fields that
/// cannot be determined are left `None`; this never fails outright.
pub fn parse(raw: &RawMessage) -> ApplicationRecord {
    let (html, text) = first_bodies(&raw.payload);

    let mut candidate_name = None;
    let mut job_title = None;

    if let Some(html) = &html {
        let lines = non_empty_lines(&html_to_text(html));
        (candidate_name, job_title) = scan_applied_lines(&lines);
    }
    if candidate_name.is_none() && job_title.is_none() {
        if let Some(text) = &text {
            let lines = non_empty_lines(text);
            (candidate_name, job_title) = scan_applied_lines(&lines);
        }
    }
    if job_title.is_none() {
        job_title = title_from_subject(&raw.subject);
    }

    ApplicationRecord {
        candidate_name,
        job_title,
        jurisdiction: jurisdiction_from_subject(&raw.subject),
        resume: attachment::resolve_resume(raw),
        source_message_id: raw.id.clone(),
        subject: raw.subject.clone(),
        fetched_at: Utc::now(),
    }
}

/// Returns the first text/html and first text/plain bodies in the tree,
/// decoded. Later parts of the same type lose.
fn first_bodies(payload: &MessagePart) -> (Option<String>, Option<String>) {
    let mut html = None;
    let mut text = None;
    for part in walk_parts(payload) {
        let Some(data) = part.body.data.as_deref() else {
            continue;
        };
        let Some(bytes) = decode_body(data) else {
            continue;
        };
        let decoded = String::from_utf8_lossy(&bytes).into_owned();
        if part.mime_type == "text/html" && html.is_none() {
            html = Some(decoded);
        } else if part.mime_type == "text/plain" && text.is_none() {
            text = Some(decoded);
        }
    }
    (html, text)
}

fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Scans lines for the first one ending in "applied" (case-insensitive). The
/// candidate name is that line with the suffix and surrounding punctuation
/// stripped; the next line, cut at the first separator, is the job title.
fn scan_applied_lines(lines: &[String]) -> (Option<String>, Option<String>) {
    const SUFFIX: &str = "applied";
    for (i, line) in lines.iter().enumerate() {
        let end = line.len().wrapping_sub(SUFFIX.len());
        if line.len() < SUFFIX.len()
            || !line.is_char_boundary(end)
            || !line[end..].eq_ignore_ascii_case(SUFFIX)
        {
            continue;
        }
        let name = line[..end]
            .trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '•' | ','))
            .to_string();
        let name = (!name.is_empty()).then_some(name);

        let title = lines.get(i + 1).and_then(|next| {
            let head = next.split(['•', ',', '|', '-']).next().unwrap_or("").trim();
            (!head.is_empty()).then(|| head.to_string())
        });
        return (name, title);
    }
    (None, None)
}

/// Two-letter code at the very end of the subject, preceded by a comma.
fn jurisdiction_from_subject(subject: &str) -> Option<String> {
    let re = Regex::new(r",\s*([A-Za-z]{2})\s*$").ok()?;
    re.captures(subject.trim())
        .map(|c| c[1].to_uppercase())
}

/// Fallback job title from a `New application for <title>,` subject.
fn title_from_subject(subject: &str) -> Option<String> {
    let re = Regex::new(r"(?i)new application for\s*([^,]*)").ok()?;
    let title = re.captures(subject)?[1].trim().to_string();
    (!title.is_empty()).then_some(title)
}

/// First email address appearing in free text, typically a resume body.
pub fn extract_email(text: &str) -> Option<String> {
    let re = Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").ok()?;
    re.find(text).map(|m| m.as_str().to_string())
}
