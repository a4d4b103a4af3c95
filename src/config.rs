use anyhow::{Result, anyhow};
use std::env;
use tracing::debug;

use crate::evaluator;

/// Environment variables every non-dry run needs before any network call
/// is attempted.
pub const REQUIRED_VARS: &[&str] = &[
    "OPENAI_API_KEY",
    "GMAIL_ACCESS_TOKEN",
    "LOXO_API_KEY",
    "LOXO_AGENCY_SLUG",
    "TWILIO_SID",
    "TWILIO_AUTH_TOKEN",
    "TWILIO_FROM",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub openai_model: String,
}

impl Config {
    /// Loads `.env` if present, then reads the optional settings. Required
    /// credentials are checked separately so a dry run can skip them.
    pub fn load() -> Self {
        if dotenvy::dotenv().is_ok() {
            debug!("loaded environment from .env");
        }
        Self {
            openai_model: env::var("OPENAI_MODEL")
                .unwrap_or_else(|_| evaluator::DEFAULT_MODEL.to_string()),
        }
    }

    pub fn check_required(&self) -> Result<()> {
        let missing = missing_from(|name| env::var(name).ok());
        if missing.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(
                "missing required environment variables: {}",
                missing.join(", ")
            ))
        }
    }
}

fn missing_from(lookup: impl Fn(&str) -> Option<String>) -> Vec<&'static str> {
    REQUIRED_VARS
        .iter()
        .copied()
        .filter(|name| lookup(name).map_or(true, |v| v.trim().is_empty()))
        .collect()
}
