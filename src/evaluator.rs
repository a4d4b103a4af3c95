use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use tracing::{debug, warn};

use crate::models::{EvaluationResult, Recommendation};
use crate::policy;
use crate::retry::{self, with_retries};
use crate::rubric::{Rubric, RubricSet};

// --- Provider trait ---

/// External text-completion capability. Implementations should return the
/// raw model output; the evaluator owns all parsing and degradation.
pub trait CompletionProvider {
    fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String>;
    fn model_name(&self) -> &str;
}

// --- OpenAI provider ---

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o";

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug)]
pub struct OpenAiProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl OpenAiProvider {
    pub fn new(model_id: String) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set")?;
        Ok(Self::with_key(api_key, model_id))
    }

    pub fn with_key(api_key: String, model_id: String) -> Self {
        Self {
            api_key,
            model_id,
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl CompletionProvider for OpenAiProvider {
    fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String> {
        let request = ChatRequest {
            model: self.model_id.clone(),
            max_tokens,
            temperature: 0.3,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_object".to_string(),
            },
        };

        let response = self
            .client
            .post(OPENAI_API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .context("failed to send request to completion API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "completion API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: ChatResponse = response
            .json()
            .context("failed to parse completion API response")?;

        api_response
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow!("no choices in completion API response"))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- Evaluator ---

const SYSTEM_PROMPT: &str = "You are an expert technical recruiter with 10+ years of \
experience in candidate evaluation.";
const MAX_COMPLETION_TOKENS: u32 = 1500;

/// What the completion model is asked to emit. The recommendation it proposes
/// is parsed but always overridden by the decision policy.
#[derive(Debug, Deserialize)]
struct WireEvaluation {
    #[serde(default)]
    overall_score: f64,
    #[serde(default)]
    skills_match: f64,
    #[serde(default)]
    experience_match: f64,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    concerns: Vec<String>,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    must_have_gaps: Vec<String>,
}

/// Assembles a rubric-specific prompt, invokes the completion provider, and
/// normalizes the output. `evaluate` never fails: malformed or unavailable
/// model output degrades to a well-formed result flagged for manual review.
pub struct Evaluator {
    provider: Box<dyn CompletionProvider>,
    rubrics: RubricSet,
    attempts: u32,
}

impl Evaluator {
    pub fn new(provider: Box<dyn CompletionProvider>, rubrics: RubricSet) -> Self {
        Self {
            provider,
            rubrics,
            attempts: retry::DEFAULT_ATTEMPTS,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn evaluate(
        &self,
        resume_text: &str,
        job_description: &str,
        job_title: Option<&str>,
    ) -> EvaluationResult {
        let rubric = self.rubrics.select(job_title);
        debug!(
            "evaluating with rubric '{}' via {}",
            rubric.name,
            self.provider.model_name()
        );

        let prompt = build_prompt(rubric, job_description, resume_text);
        let response = with_retries("candidate evaluation", self.attempts, || {
            self.provider.complete(SYSTEM_PROMPT, &prompt, MAX_COMPLETION_TOKENS)
        });

        let text = match response {
            Ok(text) => text,
            Err(e) => {
                warn!("completion call failed, returning degraded result: {:#}", e);
                return api_failure_result(&e.to_string());
            }
        };

        match serde_json::from_str::<WireEvaluation>(strip_code_fences(&text)) {
            Ok(wire) => normalize(wire, rubric),
            Err(e) => {
                warn!("unparseable evaluator output ({}); raw: {}", e, text);
                parse_failure_result()
            }
        }
    }
}

fn build_prompt(rubric: &Rubric, job_description: &str, resume_text: &str) -> String {
    format!(
        "You are an expert recruiter. Evaluate this candidate for the given job position.\n\n\
        **Job Details:**\n\
        Job Description: {job_description}\n\n\
        **Candidate Profile:**\n\
        Resume Content: {resume_text}\n\n\
        **Job Evaluation Criteria:**\n\
        {criteria}\n\n\
        **Please provide evaluation in this JSON format:**\n\
        {{\n\
            \"overall_score\": <number between 0-100>,\n\
            \"recommendation\": \"<HIRE/INTERVIEW/PASS>\",\n\
            \"strengths\": [\"strength1\", \"strength2\", \"strength3\"],\n\
            \"concerns\": [\"concern1\", \"concern2\"],\n\
            \"skills_match\": <number between 0-100>,\n\
            \"experience_match\": <number between 0-100>,\n\
            \"must_have_gaps\": [\"gap1\", \"gap2\"],\n\
            \"summary\": \"<brief 2-3 sentence evaluation summary>\"\n\
        }}\n\n\
        Focus on:\n\
        1. Skills alignment with job requirements\n\
        2. Experience level match\n\
        3. Career progression relevance\n\
        4. Overall fit for the role",
        criteria = rubric.criteria,
    )
}

/// Models wrap JSON in markdown fences often enough that the original
/// scripts stripped them unconditionally; so do we.
fn strip_code_fences(text: &str) -> &str {
    let t = text.trim();
    let t = t
        .strip_prefix("```json")
        .or_else(|| t.strip_prefix("```"))
        .unwrap_or(t);
    let t = t.strip_suffix("```").unwrap_or(t);
    t.trim()
}

fn clamp_score(value: f64) -> u8 {
    if value.is_finite() {
        value.round().clamp(0.0, 100.0) as u8
    } else {
        0
    }
}

/// Consistency pass: cap the score when the rubric says must-have gaps do,
/// then re-derive the recommendation from the score so the two never
/// disagree.
fn normalize(wire: WireEvaluation, rubric: &Rubric) -> EvaluationResult {
    let mut score = clamp_score(wire.overall_score);
    if !wire.must_have_gaps.is_empty() {
        if let Some(cap) = rubric.mismatch_cap {
            score = score.min(cap);
        }
    }

    let mut concerns = wire.concerns;
    for gap in wire.must_have_gaps {
        if !concerns.contains(&gap) {
            concerns.push(gap);
        }
    }

    EvaluationResult {
        overall_score: score,
        recommendation: policy::recommendation_for(score),
        skills_match: clamp_score(wire.skills_match),
        experience_match: clamp_score(wire.experience_match),
        strengths: wire.strengths,
        concerns,
        summary: wire.summary,
    }
}

fn parse_failure_result() -> EvaluationResult {
    EvaluationResult {
        overall_score: 50,
        recommendation: Recommendation::ReviewNeeded,
        skills_match: 50,
        experience_match: 50,
        strengths: vec!["Unable to parse evaluation".to_string()],
        concerns: vec!["LLM response parsing failed".to_string()],
        summary: "Evaluation failed - manual review required".to_string(),
    }
}

fn api_failure_result(detail: &str) -> EvaluationResult {
    EvaluationResult {
        overall_score: 0,
        recommendation: Recommendation::Error,
        skills_match: 0,
        experience_match: 0,
        strengths: vec![],
        concerns: vec![format!("API error: {}", detail)],
        summary: "Error occurred during evaluation".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedProvider {
        response: Result<&'static str, &'static str>,
    }

    impl CompletionProvider for CannedProvider {
        fn complete(&self, _system: &str, _user: &str, _max_tokens: u32) -> Result<String> {
            self.response
                .map(str::to_string)
                .map_err(|e| anyhow!(e.to_string()))
        }

        fn model_name(&self) -> &str {
            "canned"
        }
    }

    fn evaluator_with(response: Result<&'static str, &'static str>) -> Evaluator {
        Evaluator::new(
            Box::new(CannedProvider { response }),
            RubricSet::builtin(),
        )
        .with_attempts(1)
    }

    const GOOD_RESPONSE: &str = r#"{
        "overall_score": 82,
        "recommendation": "PASS",
        "strengths": ["stone CNC", "Prussiani experience"],
        "concerns": ["short tenure"],
        "skills_match": 85,
        "experience_match": 80,
        "must_have_gaps": [],
        "summary": "Strong direct fit."
    }"#;

    #[test]
    fn test_recommendation_rederived_from_score() {
        // The model says PASS at 82; the policy banding wins.
        let result = evaluator_with(Ok(GOOD_RESPONSE)).evaluate("resume", "job", None);
        assert_eq!(result.overall_score, 82);
        assert_eq!(result.recommendation, Recommendation::Hire);
        assert_eq!(result.strengths.len(), 2);
        assert_eq!(result.summary, "Strong direct fit.");
    }

    #[test]
    fn test_fenced_json_is_accepted() {
        let fenced: &'static str = "```json\n{\"overall_score\": 30, \"summary\": \"weak\"}\n```";
        let result = evaluator_with(Ok(fenced)).evaluate("resume", "job", None);
        assert_eq!(result.overall_score, 30);
        assert_eq!(result.recommendation, Recommendation::Pass);
    }

    #[test]
    fn test_unparseable_output_degrades_never_raises() {
        let result = evaluator_with(Ok("the candidate seems nice")).evaluate("r", "j", None);
        assert_eq!(result.overall_score, 50);
        assert_eq!(result.recommendation, Recommendation::ReviewNeeded);
        assert!(!result.concerns.is_empty());
    }

    #[test]
    fn test_provider_failure_degrades_to_error_result() {
        let result = evaluator_with(Err("connection refused")).evaluate("r", "j", None);
        assert_eq!(result.overall_score, 0);
        assert_eq!(result.recommendation, Recommendation::Error);
        assert!(result.concerns[0].contains("connection refused"));
    }

    #[test]
    fn test_mismatch_cap_applied_before_rederivation() {
        let gapped: &'static str = r#"{
            "overall_score": 85,
            "skills_match": 60,
            "experience_match": 70,
            "must_have_gaps": ["no stone CNC experience"],
            "summary": "Generic CNC only."
        }"#;
        // CNC Operator rubric caps at 50 when must-haves are missing.
        let result = evaluator_with(Ok(gapped)).evaluate("r", "j", Some("CNC Operator"));
        assert_eq!(result.overall_score, 50);
        assert_eq!(result.recommendation, Recommendation::Interview);
        assert!(
            result
                .concerns
                .iter()
                .any(|c| c.contains("no stone CNC experience"))
        );
    }

    #[test]
    fn test_scores_clamped_to_valid_range() {
        let wild: &'static str =
            r#"{"overall_score": 140.2, "skills_match": -3, "experience_match": 55}"#;
        let result = evaluator_with(Ok(wild)).evaluate("r", "j", None);
        assert_eq!(result.overall_score, 100);
        assert_eq!(result.skills_match, 0);
        assert_eq!(result.experience_match, 55);
    }

    #[test]
    fn test_openai_provider_requires_api_key() {
        let original = env::var("OPENAI_API_KEY").ok();
        unsafe {
            env::remove_var("OPENAI_API_KEY");
        }

        let result = OpenAiProvider::new(DEFAULT_MODEL.to_string());

        if let Some(val) = original {
            unsafe {
                env::set_var("OPENAI_API_KEY", val);
            }
        }

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_openai_provider_with_key() {
        let provider = OpenAiProvider::with_key("test-key".to_string(), DEFAULT_MODEL.to_string());
        assert_eq!(provider.model_name(), "gpt-4o");
    }
}
