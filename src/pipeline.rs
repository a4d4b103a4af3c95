use anyhow::{Result, anyhow};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::attachment::{self, ResumeData};
use crate::error::IntakeError;
use crate::evaluator::Evaluator;
use crate::inbox::InboxSource;
use crate::ledger::Ledger;
use crate::message::{self, RawMessage};
use crate::messaging::{ACK_BODY, MessageChannel};
use crate::models::{ApplicationRecord, CycleStats};
use crate::policy;
use crate::retry::{DEFAULT_ATTEMPTS, with_retries};
use crate::tracking::{ApplicationSubmission, PersonUpdate, ResumeUpload, TrackingSystem};

/// Matches unprocessed application notifications; the label exclusion keeps
/// re-polls cheap even before the ledger is consulted.
pub const DEFAULT_QUERY: &str =
    "subject:\"[Action required] New application for\" has:attachment -label:processed newer_than:20d";

pub const DEFAULT_MAX_RESULTS: u32 = 50;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub query: String,
    pub max_results: u32,
    pub scratch_dir: PathBuf,
    pub dry_run: bool,
    pub ack_body: String,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            query: DEFAULT_QUERY.to_string(),
            max_results: DEFAULT_MAX_RESULTS,
            scratch_dir: std::env::temp_dir().join("intake-resumes"),
            dry_run: false,
            ack_body: ACK_BODY.to_string(),
        }
    }
}

/// Drives one polling cycle: list messages, then walk each application
/// through parse, candidate match, acknowledgement, evaluation, submission,
/// and ledger commit. Failures are contained per record; only an unreachable
/// inbox aborts the cycle.
pub struct Pipeline<'a> {
    inbox: &'a dyn InboxSource,
    tracking: &'a dyn TrackingSystem,
    channel: &'a dyn MessageChannel,
    evaluator: &'a Evaluator,
    ledger: &'a dyn Ledger,
    options: PipelineOptions,
    stop: Option<Arc<AtomicBool>>,
    progress: Option<Box<dyn Fn(&CycleStats) + 'a>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        inbox: &'a dyn InboxSource,
        tracking: &'a dyn TrackingSystem,
        channel: &'a dyn MessageChannel,
        evaluator: &'a Evaluator,
        ledger: &'a dyn Ledger,
        options: PipelineOptions,
    ) -> Self {
        Self {
            inbox,
            tracking,
            channel,
            evaluator,
            ledger,
            options,
            stop: None,
            progress: None,
        }
    }

    /// Cooperative stop flag, consulted between records, never mid-record.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Called with the running tallies after each record settles.
    pub fn with_progress(mut self, progress: impl Fn(&CycleStats) + 'a) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Runs one cycle, or keeps polling at `interval` when `watch` is set.
    /// In watch mode a failed cycle is logged and the loop continues.
    pub fn run(&self, watch: bool, interval: Duration) -> Result<()> {
        loop {
            match self.run_cycle() {
                Ok(stats) => info!("cycle complete: {}", stats),
                Err(e) if watch => warn!("cycle failed: {:#}", e),
                Err(e) => return Err(e),
            }
            if !watch || self.stop_requested() {
                return Ok(());
            }
            debug!("sleeping {}s until next poll", interval.as_secs());
            std::thread::sleep(interval);
        }
    }

    pub fn run_cycle(&self) -> Result<CycleStats> {
        let messages = with_retries("inbox poll", DEFAULT_ATTEMPTS, || {
            self.inbox
                .list_application_messages(&self.options.query, self.options.max_results)
        })
        .map_err(|e| IntakeError::external("inbox", e))?;

        let mut stats = CycleStats {
            total: messages.len(),
            ..CycleStats::default()
        };
        info!("poll matched {} message(s)", stats.total);

        for raw in &messages {
            if self.stop_requested() {
                info!("stop requested, ending cycle early");
                break;
            }
            if self.ledger.exists(&raw.id)? {
                debug!("message {} already in ledger, skipping", raw.id);
                stats.skipped += 1;
            } else {
                match self.process_message(raw) {
                    Ok(()) => stats.processed += 1,
                    Err(e) => {
                        warn!("message {} failed: {:#}", raw.id, e);
                        stats.failed += 1;
                        if !self.options.dry_run {
                            if let Err(e) = self.inbox.tag_for_review(&raw.id) {
                                warn!("could not flag message {} for review: {:#}", raw.id, e);
                            }
                        }
                    }
                }
            }

            if let Some(progress) = &self.progress {
                progress(&stats);
            }
        }

        Ok(stats)
    }

    fn process_message(&self, raw: &RawMessage) -> Result<()> {
        let record = message::parse(raw);
        let name = record
            .candidate_name
            .as_deref()
            .ok_or(IntakeError::MissingField {
                action: "match candidate",
                field: "candidate name",
            })?;
        let title = record
            .job_title
            .as_deref()
            .ok_or(IntakeError::MissingField {
                action: "match job",
                field: "job title",
            })?;
        info!("processing application from '{}' for '{}'", name, title);

        let resume = record
            .resume
            .as_ref()
            .ok_or_else(|| IntakeError::AttachmentMissing(raw.id.clone()))?;

        if self.options.dry_run {
            info!(
                "dry run: would evaluate '{}' (resume {}) against '{}'{}",
                name,
                resume.filename,
                title,
                record
                    .jurisdiction
                    .as_deref()
                    .map(|j| format!(" in {}", j))
                    .unwrap_or_default()
            );
            return Ok(());
        }

        let resume_bytes = match &resume.data {
            ResumeData::Inline(bytes) => bytes.clone(),
            ResumeData::Remote { attachment_id } => {
                with_retries("attachment fetch", DEFAULT_ATTEMPTS, || {
                    self.inbox.get_attachment(&raw.id, attachment_id)
                })
                .map_err(|e| IntakeError::external("inbox", e))?
            }
        };
        let resume_text = attachment::resume_text(&resume.filename, &resume_bytes)?;
        let email = message::extract_email(&resume_text);
        if email.is_none() {
            warn!("no email found in resume for '{}', matching by name only", name);
        }

        // Scratch copy for operator inspection; removed once the record is
        // fully committed.
        let scratch_path =
            attachment::save_to_dir(&self.options.scratch_dir, &resume.filename, &resume_bytes)?;

        let outcome = self.process_matched(&record, name, title, email.as_deref(), &resume_text, &resume_bytes, raw);

        if let Err(e) = std::fs::remove_file(&scratch_path) {
            warn!("could not remove scratch file {}: {}", scratch_path.display(), e);
        }
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    fn process_matched(
        &self,
        record: &ApplicationRecord,
        name: &str,
        title: &str,
        email: Option<&str>,
        resume_text: &str,
        resume_bytes: &[u8],
        raw: &RawMessage,
    ) -> Result<()> {
        let person = with_retries("candidate search", DEFAULT_ATTEMPTS, || {
            self.tracking.search_person(name, email)
        })
        .map_err(|e| IntakeError::external("tracking", e))?
        .ok_or_else(|| anyhow!("no tracking record matched candidate '{}'", name))?;

        match &person.phone {
            Some(phone) => {
                with_retries("acknowledgement send", DEFAULT_ATTEMPTS, || {
                    self.channel.send(phone, &self.options.ack_body)
                })
                .map_err(|e| IntakeError::external("messaging", e))?;
            }
            None => warn!("person {} has no phone on file, skipping acknowledgement", person.id),
        }

        let job = with_retries("job search", DEFAULT_ATTEMPTS, || {
            self.tracking.find_job(title, record.jurisdiction.as_deref())
        })
        .map_err(|e| IntakeError::external("tracking", e))?
        .ok_or_else(|| {
            anyhow!(
                "no job matched '{}'{}",
                title,
                record
                    .jurisdiction
                    .as_deref()
                    .map(|j| format!(" in {}", j))
                    .unwrap_or_default()
            )
        })?;

        let job_description = with_retries("job description fetch", DEFAULT_ATTEMPTS, || {
            self.tracking.get_job_description(job.id)
        })
        .map_err(|e| IntakeError::external("tracking", e))?;

        let evaluation = self.evaluator.evaluate(resume_text, &job_description, Some(title));
        info!(
            "evaluated '{}': score {} ({})",
            name, evaluation.overall_score, evaluation.recommendation
        );

        let submission = ApplicationSubmission {
            job_id: job.id,
            name: person.name.clone(),
            email: email.unwrap_or_default().to_string(),
            phone: person.phone.clone(),
            resume: Some(ResumeUpload {
                filename: attachment::safe_filename(
                    record.resume.as_ref().map(|r| r.filename.as_str()).unwrap_or("resume.pdf"),
                ),
                bytes: resume_bytes.to_vec(),
            }),
        };
        with_retries("application submit", DEFAULT_ATTEMPTS, || {
            self.tracking.submit_application(&submission)
        })
        .map_err(|e| IntakeError::external("tracking", e))?;

        let decision = policy::decide(evaluation.overall_score);
        let update = PersonUpdate {
            person_id: person.id,
            job_id: job.id,
            tag: decision.tag,
            summary: evaluation.summary.clone(),
            overall_score: evaluation.overall_score,
        };
        with_retries("person update", DEFAULT_ATTEMPTS, || {
            self.tracking.update_person_record(&update)
        })
        .map_err(|e| IntakeError::external("tracking", e))?;

        with_retries("person event", DEFAULT_ATTEMPTS, || {
            self.tracking
                .record_person_event(person.id, job.id, decision.activity_code)
        })
        .map_err(|e| IntakeError::external("tracking", e))?;

        with_retries("processed label", DEFAULT_ATTEMPTS, || {
            self.inbox.tag_processed(&raw.id)
        })
        .map_err(|e| IntakeError::external("inbox", e))?;

        // Commit strictly last. A failure here means one future re-process of
        // an already-submitted application, which the tracking system
        // tolerates; retrying the insert could not make that better.
        if let Err(e) = self.ledger.record(&raw.id, job.id, person.id) {
            warn!("ledger commit failed for message {}: {:#}", raw.id, e);
        }

        Ok(())
    }
}
