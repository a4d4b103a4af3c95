use thiserror::Error;

/// Failure modes that individual pipeline records can hit. Everything here is
/// caught at the orchestrator boundary; only setup failures (bad credentials,
/// inbox unreachable at cycle start) abort a whole cycle.
#[derive(Debug, Error)]
pub enum IntakeError {
    /// `Ledger::record` was called twice for the same message id. A logic
    /// error upstream, not a normal-path failure.
    #[error("ledger already has an entry for message {0}")]
    DuplicateKey(String),

    /// The message carries no resume-like attachment.
    #[error("no resume attachment on message {0}")]
    AttachmentMissing(String),

    /// A vendor API call failed after retries.
    #[error("{service} call failed: {detail}")]
    ExternalService { service: String, detail: String },

    /// The parsed record lacks a field the pipeline cannot proceed without.
    #[error("cannot {action}: {field} could not be extracted")]
    MissingField {
        action: &'static str,
        field: &'static str,
    },
}

impl IntakeError {
    pub fn external(service: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        IntakeError::ExternalService {
            service: service.into(),
            detail: detail.to_string(),
        }
    }
}
