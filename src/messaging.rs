use anyhow::{Context, Result, anyhow};
use clap::ValueEnum;
use serde::Deserialize;
use std::env;
use tracing::info;

pub const ACK_BODY: &str = "Your application has been submitted successfully! While we \
process your resume, we'd love to ask you a few quick follow-up questions. Is that okay?";

/// Outbound channel for the acknowledgement sent right after a candidate is
/// matched in the tracking system.
pub trait MessageChannel {
    fn send(&self, to: &str, body: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum ChannelKind {
    Sms,
    WhatsApp,
}

/// Strips spaces and hyphens; a leading `whatsapp:` scheme is added for the
/// WhatsApp channel if the number does not already carry one.
pub fn normalize_recipient(to: &str, kind: ChannelKind) -> String {
    let bare: String = to.chars().filter(|c| !matches!(c, ' ' | '-')).collect();
    match kind {
        ChannelKind::Sms => bare,
        ChannelKind::WhatsApp => {
            if bare.starts_with("whatsapp:") {
                bare
            } else {
                format!("whatsapp:{}", bare)
            }
        }
    }
}

pub fn digits_only(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

// --- Twilio client ---

#[derive(Debug, Deserialize)]
struct TwilioMessage {
    sid: String,
}

pub struct TwilioChannel {
    account_sid: String,
    auth_token: String,
    from_number: String,
    kind: ChannelKind,
    client: reqwest::blocking::Client,
}

impl TwilioChannel {
    pub fn new(kind: ChannelKind) -> Result<Self> {
        let account_sid =
            env::var("TWILIO_SID").context("TWILIO_SID environment variable not set")?;
        let auth_token =
            env::var("TWILIO_AUTH_TOKEN").context("TWILIO_AUTH_TOKEN environment variable not set")?;
        let from_number =
            env::var("TWILIO_FROM").context("TWILIO_FROM environment variable not set")?;
        Ok(Self::with_credentials(account_sid, auth_token, from_number, kind))
    }

    pub fn with_credentials(
        account_sid: String,
        auth_token: String,
        from_number: String,
        kind: ChannelKind,
    ) -> Self {
        let from_number = normalize_recipient(&from_number, kind);
        Self {
            account_sid,
            auth_token,
            from_number,
            kind,
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl MessageChannel for TwilioChannel {
    fn send(&self, to: &str, body: &str) -> Result<String> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        );
        let to = normalize_recipient(to, self.kind);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("To", to.as_str()),
                ("From", self.from_number.as_str()),
                ("Body", body),
            ])
            .send()
            .context("failed to send message request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "message send to {} failed with status {}: {}",
                to,
                status,
                error_text
            ));
        }

        let message: TwilioMessage = response
            .json()
            .context("failed to parse message send response")?;
        info!("message sent to {} (sid {})", to, message.sid);
        Ok(message.sid)
    }
}
