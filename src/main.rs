use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use intake::attachment;
use intake::config::Config;
use intake::evaluator::{Evaluator, OpenAiProvider};
use intake::inbox::GmailInbox;
use intake::ledger::SqliteLedger;
use intake::messaging::{ChannelKind, TwilioChannel};
use intake::pipeline::{self, Pipeline, PipelineOptions};
use intake::policy;
use intake::rubric::RubricSet;
use intake::tracking::LoxoTracking;

#[derive(Parser)]
#[command(name = "intake", version, about = "Candidate intake and scoring pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the processing ledger database
    Init,
    /// Poll the inbox and process new applications
    Run {
        /// Keep polling instead of running a single cycle
        #[arg(long)]
        watch: bool,
        /// Seconds between polls in watch mode
        #[arg(long, default_value_t = 600)]
        interval_secs: u64,
        /// Most messages to pull per poll
        #[arg(long, default_value_t = pipeline::DEFAULT_MAX_RESULTS)]
        max_results: u32,
        /// Override the inbox search query
        #[arg(long)]
        query: Option<String>,
        /// Acknowledgement channel
        #[arg(long, value_enum, default_value = "sms")]
        channel: ChannelKind,
        /// Parse and report without contacting any vendor API
        #[arg(long)]
        dry_run: bool,
        /// Path to a JSON rubric file replacing the built-in set
        #[arg(long)]
        rubrics: Option<PathBuf>,
    },
    /// Show the decision a score would produce
    Decide { score: u8 },
    /// Evaluate a resume file against a job description file
    Evaluate {
        resume: PathBuf,
        job_description: PathBuf,
        /// Job title used to pick the rubric
        #[arg(long)]
        job_title: Option<String>,
        /// Path to a JSON rubric file replacing the built-in set
        #[arg(long)]
        rubrics: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load();

    match cli.command {
        Command::Init => init(),
        Command::Run {
            watch,
            interval_secs,
            max_results,
            query,
            channel,
            dry_run,
            rubrics,
        } => run(
            &config,
            watch,
            interval_secs,
            max_results,
            query,
            channel,
            dry_run,
            rubrics,
        ),
        Command::Decide { score } => {
            decide(score);
            Ok(())
        }
        Command::Evaluate {
            resume,
            job_description,
            job_title,
            rubrics,
        } => evaluate(&config, &resume, &job_description, job_title.as_deref(), rubrics),
    }
}

fn init() -> Result<()> {
    let ledger = SqliteLedger::open()?;
    ledger.init()?;
    println!("Ledger ready at {}", ledger.path().display());
    Ok(())
}

fn load_rubrics(path: Option<PathBuf>) -> Result<RubricSet> {
    match path {
        Some(path) => RubricSet::from_json_file(&path),
        None => Ok(RubricSet::builtin()),
    }
}

#[allow(clippy::too_many_arguments)]
fn run(
    config: &Config,
    watch: bool,
    interval_secs: u64,
    max_results: u32,
    query: Option<String>,
    channel: ChannelKind,
    dry_run: bool,
    rubrics: Option<PathBuf>,
) -> Result<()> {
    let ledger = SqliteLedger::open()?;
    ledger.ensure_initialized()?;

    // A dry run stops before any vendor call, so only the inbox token is
    // needed; the other clients are built unusable and never invoked.
    let (inbox, tracking, messenger, provider) = if dry_run {
        (
            GmailInbox::new()?,
            LoxoTracking::with_credentials(String::new(), "unused"),
            TwilioChannel::with_credentials(String::new(), String::new(), String::new(), channel),
            OpenAiProvider::with_key(String::new(), config.openai_model.clone()),
        )
    } else {
        config.check_required()?;
        (
            GmailInbox::new()?,
            LoxoTracking::new()?,
            TwilioChannel::new(channel)?,
            OpenAiProvider::new(config.openai_model.clone())?,
        )
    };

    let evaluator = Evaluator::new(Box::new(provider), load_rubrics(rubrics)?);
    let options = PipelineOptions {
        query: query.unwrap_or_else(|| pipeline::DEFAULT_QUERY.to_string()),
        max_results,
        dry_run,
        ..Default::default()
    };
    let pipeline = Pipeline::new(&inbox, &tracking, &messenger, &evaluator, &ledger, options);
    pipeline.run(watch, Duration::from_secs(interval_secs))
}

fn decide(score: u8) {
    let decision = policy::decide(score);
    println!("Score {}: {}", score, decision.recommendation);
    println!("Tag: {} (activity {})", decision.tag, decision.activity_code);
}

fn evaluate(
    config: &Config,
    resume: &Path,
    job_description: &Path,
    job_title: Option<&str>,
    rubrics: Option<PathBuf>,
) -> Result<()> {
    let bytes = std::fs::read(resume)
        .with_context(|| format!("failed to read resume {}", resume.display()))?;
    let filename = resume
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "resume.pdf".to_string());
    let resume_text = attachment::resume_text(&filename, &bytes)?;
    let description = std::fs::read_to_string(job_description)
        .with_context(|| format!("failed to read {}", job_description.display()))?;

    let provider = OpenAiProvider::new(config.openai_model.clone())?;
    let evaluator = Evaluator::new(Box::new(provider), load_rubrics(rubrics)?);
    let result = evaluator.evaluate(&resume_text, &description, job_title);

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
