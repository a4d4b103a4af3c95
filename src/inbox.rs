use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::json;
use std::cell::RefCell;
use std::collections::HashMap;
use std::env;
use tracing::{debug, info};

use crate::message::{MessagePart, RawMessage, decode_body};

pub const PROCESSED_LABEL: &str = "processed";
pub const REVIEW_LABEL: &str = "needs-review";

/// Mailbox the pipeline reads applications from and writes triage labels
/// back to.
pub trait InboxSource {
    fn list_application_messages(&self, query: &str, max_results: u32) -> Result<Vec<RawMessage>>;
    fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>>;
    fn tag_processed(&self, message_id: &str) -> Result<()>;
    fn tag_for_review(&self, message_id: &str) -> Result<()>;
}

// --- Gmail wire types ---

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageStub>,
}

#[derive(Debug, Deserialize)]
struct MessageStub {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayloadWithHeaders {
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(flatten)]
    part: MessagePart,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDetail {
    id: String,
    payload: PayloadWithHeaders,
}

impl MessageDetail {
    fn into_raw(self) -> RawMessage {
        let subject = self
            .payload
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case("Subject"))
            .map(|h| h.value.clone())
            .unwrap_or_default();
        RawMessage {
            id: self.id,
            subject,
            payload: self.payload.part,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AttachmentBody {
    data: String,
}

#[derive(Debug, Deserialize)]
struct LabelList {
    #[serde(default)]
    labels: Vec<Label>,
}

#[derive(Debug, Deserialize)]
struct Label {
    id: String,
    name: String,
}

// --- Gmail client ---

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

pub struct GmailInbox {
    access_token: String,
    client: reqwest::blocking::Client,
    label_ids: RefCell<HashMap<String, String>>,
}

impl GmailInbox {
    pub fn new() -> Result<Self> {
        let access_token = env::var("GMAIL_ACCESS_TOKEN")
            .context("GMAIL_ACCESS_TOKEN environment variable not set")?;
        Ok(Self::with_token(access_token))
    }

    pub fn with_token(access_token: String) -> Self {
        Self {
            access_token,
            client: reqwest::blocking::Client::new(),
            label_ids: RefCell::new(HashMap::new()),
        }
    }

    fn get(&self, path: &str, query: &[(&str, String)]) -> Result<reqwest::blocking::Response> {
        let response = self
            .client
            .get(format!("{}/{}", GMAIL_API_BASE, path))
            .bearer_auth(&self.access_token)
            .query(query)
            .send()
            .with_context(|| format!("mailbox request to {} failed", path))?;
        check_status(response, path)
    }

    fn post_json(&self, path: &str, body: &serde_json::Value) -> Result<reqwest::blocking::Response> {
        let response = self
            .client
            .post(format!("{}/{}", GMAIL_API_BASE, path))
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .with_context(|| format!("mailbox request to {} failed", path))?;
        check_status(response, path)
    }

    /// Resolves a label name to its id, creating the label on first use.
    /// Resolved ids are cached for the life of the client.
    fn label_id(&self, name: &str) -> Result<String> {
        if let Some(id) = self.label_ids.borrow().get(name) {
            return Ok(id.clone());
        }

        let list: LabelList = self.get("labels", &[])?.json().context("failed to parse label list")?;
        let id = match list.labels.into_iter().find(|l| l.name == name) {
            Some(label) => label.id,
            None => {
                info!("creating mailbox label '{}'", name);
                let created: Label = self
                    .post_json(
                        "labels",
                        &json!({
                            "name": name,
                            "labelListVisibility": "labelShow",
                            "messageListVisibility": "show",
                        }),
                    )?
                    .json()
                    .context("failed to parse created label")?;
                created.id
            }
        };

        self.label_ids
            .borrow_mut()
            .insert(name.to_string(), id.clone());
        Ok(id)
    }

    fn apply_label(&self, message_id: &str, label: &str) -> Result<()> {
        let label_id = self.label_id(label)?;
        self.post_json(
            &format!("messages/{}/modify", message_id),
            &json!({ "addLabelIds": [label_id] }),
        )?;
        debug!("labeled message {} as '{}'", message_id, label);
        Ok(())
    }
}

fn check_status(
    response: reqwest::blocking::Response,
    path: &str,
) -> Result<reqwest::blocking::Response> {
    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().unwrap_or_default();
        return Err(anyhow!(
            "mailbox request to {} failed with status {}: {}",
            path,
            status,
            error_text
        ));
    }
    Ok(response)
}

impl InboxSource for GmailInbox {
    fn list_application_messages(&self, query: &str, max_results: u32) -> Result<Vec<RawMessage>> {
        let list: MessageList = self
            .get(
                "messages",
                &[
                    ("q", query.to_string()),
                    ("maxResults", max_results.to_string()),
                ],
            )?
            .json()
            .context("failed to parse message list")?;

        debug!("mailbox query matched {} message(s)", list.messages.len());

        let mut messages = Vec::with_capacity(list.messages.len());
        for stub in list.messages {
            let detail: MessageDetail = self
                .get(&format!("messages/{}", stub.id), &[("format", "full".to_string())])?
                .json()
                .with_context(|| format!("failed to parse message {}", stub.id))?;
            messages.push(detail.into_raw());
        }
        Ok(messages)
    }

    fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        let body: AttachmentBody = self
            .get(
                &format!("messages/{}/attachments/{}", message_id, attachment_id),
                &[],
            )?
            .json()
            .context("failed to parse attachment body")?;
        decode_body(&body.data)
            .ok_or_else(|| anyhow!("attachment {} is not valid base64", attachment_id))
    }

    fn tag_processed(&self, message_id: &str) -> Result<()> {
        self.apply_label(message_id, PROCESSED_LABEL)
    }

    fn tag_for_review(&self, message_id: &str) -> Result<()> {
        self.apply_label(message_id, REVIEW_LABEL)
    }
}
