use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attachment::ResumeRef;

/// One parsed application email. Immutable after creation; `source_message_id`
/// is the natural key used for deduplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub candidate_name: Option<String>,
    pub job_title: Option<String>,
    pub jurisdiction: Option<String>, // two-letter region code from the subject
    pub resume: Option<ResumeRef>,
    pub source_message_id: String,
    pub subject: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "INTERVIEW")]
    Interview,
    #[serde(rename = "HIRE")]
    Hire,
    #[serde(rename = "REVIEW_NEEDED")]
    ReviewNeeded,
    #[serde(rename = "ERROR")]
    Error,
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Recommendation::Pass => "PASS",
            Recommendation::Interview => "INTERVIEW",
            Recommendation::Hire => "HIRE",
            Recommendation::ReviewNeeded => "REVIEW_NEEDED",
            Recommendation::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Normalized evaluator output. Produced fresh per (resume, job) pair and
/// never persisted; only derived fields are written back to the tracking
/// system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub overall_score: u8, // 0..=100
    pub recommendation: Recommendation,
    pub skills_match: u8,
    pub experience_match: u8,
    pub strengths: Vec<String>,
    pub concerns: Vec<String>,
    pub summary: String,
}

/// Candidate record as known to the tracking system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPosting {
    pub id: i64,
    pub title: String,
    pub jurisdiction: Option<String>,
}

/// Per-cycle tallies emitted by the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleStats {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl std::fmt::Display for CycleStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} total, {} processed, {} skipped, {} failed",
            self.total, self.processed, self.skipped, self.failed
        )
    }
}
