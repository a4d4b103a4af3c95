use anyhow::{Context, Result, anyhow};
use reqwest::blocking::multipart::{Form, Part};
use serde::Deserialize;
use std::env;
use tracing::{debug, info};

use crate::message::html_to_text;
use crate::models::{JobPosting, Person};

/// Source id stamped on the application itself.
pub const APPLY_SOURCE_TYPE_ID: i64 = 2_028_652;
/// Source id stamped on the person record when scoring results are written.
pub const UPDATE_SOURCE_TYPE_ID: i64 = 429_885;

#[derive(Debug)]
pub struct ResumeUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
pub struct ApplicationSubmission {
    pub job_id: i64,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub resume: Option<ResumeUpload>,
}

#[derive(Debug)]
pub struct PersonUpdate {
    pub person_id: i64,
    pub job_id: i64,
    pub tag: &'static str,
    pub summary: String,
    pub overall_score: u8,
}

/// Applicant-tracking backend the pipeline reads candidates and jobs from
/// and writes scoring results back to.
pub trait TrackingSystem {
    fn search_person(&self, query: &str, match_email: Option<&str>) -> Result<Option<Person>>;
    fn find_job(&self, title: &str, jurisdiction: Option<&str>) -> Result<Option<JobPosting>>;
    fn get_job_description(&self, job_id: i64) -> Result<String>;
    fn submit_application(&self, submission: &ApplicationSubmission) -> Result<()>;
    fn update_person_record(&self, update: &PersonUpdate) -> Result<()>;
    fn record_person_event(&self, person_id: i64, job_id: i64, activity_code: i64) -> Result<()>;
}

// --- Loxo wire types ---

#[derive(Debug, Deserialize)]
struct ContactValue {
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WirePerson {
    id: i64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    emails: Vec<ContactValue>,
    #[serde(default)]
    phones: Vec<ContactValue>,
}

#[derive(Debug, Deserialize)]
struct PeopleResponse {
    #[serde(default)]
    people: Vec<WirePerson>,
}

#[derive(Debug, Deserialize)]
struct WireJob {
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    state_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobsResponse {
    #[serde(default)]
    results: Vec<WireJob>,
}

#[derive(Debug, Deserialize)]
struct JobDetail {
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PersonDetail {
    #[serde(default)]
    description: Option<String>,
}

fn person_from_wire(wire: WirePerson) -> Person {
    let phone = wire
        .phones
        .into_iter()
        .find_map(|c| c.value.filter(|v| !v.is_empty()));
    Person {
        id: wire.id,
        name: wire.name,
        phone,
    }
}

/// When an email is available the name query alone is too loose, so only a
/// person carrying that exact address counts as a match. Without one, the
/// first search hit wins.
fn select_person(people: Vec<WirePerson>, match_email: Option<&str>) -> Option<Person> {
    match match_email {
        Some(email) => people
            .into_iter()
            .find(|p| {
                p.emails.iter().any(|c| {
                    c.value
                        .as_deref()
                        .is_some_and(|v| v.eq_ignore_ascii_case(email))
                })
            })
            .map(person_from_wire),
        None => people.into_iter().next().map(person_from_wire),
    }
}

fn select_job(jobs: Vec<WireJob>, title: &str, jurisdiction: Option<&str>) -> Option<JobPosting> {
    let title_lower = title.to_lowercase();
    jobs.into_iter()
        .find(|job| {
            let title_matches = job.title.to_lowercase().contains(&title_lower);
            let region_matches = match jurisdiction {
                Some(code) => job
                    .state_code
                    .as_deref()
                    .is_some_and(|s| s.to_uppercase().contains(&code.to_uppercase())),
                None => true,
            };
            title_matches && region_matches
        })
        .map(|job| JobPosting {
            id: job.id,
            title: job.title,
            jurisdiction: job.state_code,
        })
}

// --- Loxo client ---

pub struct LoxoTracking {
    api_key: String,
    base_url: String,
    client: reqwest::blocking::Client,
}

impl LoxoTracking {
    pub fn new() -> Result<Self> {
        let api_key =
            env::var("LOXO_API_KEY").context("LOXO_API_KEY environment variable not set")?;
        let agency =
            env::var("LOXO_AGENCY_SLUG").context("LOXO_AGENCY_SLUG environment variable not set")?;
        Ok(Self::with_credentials(api_key, &agency))
    }

    pub fn with_credentials(api_key: String, agency_slug: &str) -> Self {
        Self {
            api_key,
            base_url: format!("https://app.loxo.co/api/{}", agency_slug),
            client: reqwest::blocking::Client::new(),
        }
    }

    fn get(&self, path: &str, query: &[(&str, String)]) -> Result<reqwest::blocking::Response> {
        let response = self
            .client
            .get(format!("{}/{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("accept", "application/json")
            .query(query)
            .send()
            .with_context(|| format!("tracking request to {} failed", path))?;
        check_status(response, path)
    }

    fn person_description(&self, person_id: i64) -> Result<String> {
        let detail: PersonDetail = self
            .get(&format!("people/{}", person_id), &[])?
            .json()
            .context("failed to parse person record")?;
        Ok(detail
            .description
            .map(|d| html_to_text(&d))
            .unwrap_or_default())
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
            "tracking request to {} failed with status {}: {}",
            path,
            status,
            error_text
        ));
    }
    Ok(response)
}

impl TrackingSystem for LoxoTracking {
    fn search_person(&self, query: &str, match_email: Option<&str>) -> Result<Option<Person>> {
        let response: PeopleResponse = self
            .get(
                "people",
                &[("query", query.to_string()), ("per_page", "5".to_string())],
            )?
            .json()
            .context("failed to parse people search response")?;
        debug!("people search '{}' returned {} hit(s)", query, response.people.len());
        Ok(select_person(response.people, match_email))
    }

    fn find_job(&self, title: &str, jurisdiction: Option<&str>) -> Result<Option<JobPosting>> {
        let response: JobsResponse = self
            .get(
                "jobs",
                &[
                    ("query", title.to_string()),
                    ("per_page", "5".to_string()),
                    ("page", "1".to_string()),
                ],
            )?
            .json()
            .context("failed to parse job search response")?;
        debug!("job search '{}' returned {} hit(s)", title, response.results.len());
        Ok(select_job(response.results, title, jurisdiction))
    }

    fn get_job_description(&self, job_id: i64) -> Result<String> {
        let detail: JobDetail = self
            .get(&format!("jobs/{}", job_id), &[])?
            .json()
            .context("failed to parse job detail")?;
        Ok(detail
            .description
            .map(|d| html_to_text(&d))
            .unwrap_or_default())
    }

    fn submit_application(&self, submission: &ApplicationSubmission) -> Result<()> {
        let mut form = Form::new()
            .text("name", submission.name.clone())
            .text("email", submission.email.clone())
            .text("source_type_id", APPLY_SOURCE_TYPE_ID.to_string());
        if let Some(phone) = &submission.phone {
            form = form.text("phone", phone.clone());
        }
        if let Some(resume) = &submission.resume {
            let part = Part::bytes(resume.bytes.clone())
                .file_name(resume.filename.clone())
                .mime_str("application/pdf")
                .context("invalid resume mime type")?;
            form = form.part("resume", part);
        }

        let path = format!("jobs/{}/apply", submission.job_id);
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("accept", "application/json")
            .multipart(form)
            .send()
            .with_context(|| format!("tracking request to {} failed", path))?;
        check_status(response, &path)?;
        info!(
            "submitted application for '{}' to job {}",
            submission.name, submission.job_id
        );
        Ok(())
    }

    /// Tags the person and appends the evaluation summary to their existing
    /// description. The read-modify-write is not atomic; a lost update only
    /// costs a stale summary line.
    fn update_person_record(&self, update: &PersonUpdate) -> Result<()> {
        let mut description = self.person_description(update.person_id)?;
        description.push_str(&format!(
            "\n\nSummary: {}\n\nOverall Score: {}",
            update.summary, update.overall_score
        ));

        let form = Form::new()
            .text("source_type_id", UPDATE_SOURCE_TYPE_ID.to_string())
            .text("job_id", update.job_id.to_string())
            .text("person[raw_tags][]", update.tag.to_string())
            .text("person[description]", description)
            .text("person[source_type_id]", UPDATE_SOURCE_TYPE_ID.to_string());

        let path = format!("people/{}", update.person_id);
        let response = self
            .client
            .put(format!("{}/{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("accept", "application/json")
            .multipart(form)
            .send()
            .with_context(|| format!("tracking request to {} failed", path))?;
        check_status(response, &path)?;
        info!("tagged person {} as '{}'", update.person_id, update.tag);
        Ok(())
    }

    fn record_person_event(&self, person_id: i64, job_id: i64, activity_code: i64) -> Result<()> {
        let form = Form::new()
            .text("person_event[activity_type_id]", activity_code.to_string())
            .text("person_event[person_id]", person_id.to_string())
            .text("person_event[job_id]", job_id.to_string());

        let response = self
            .client
            .post(format!("{}/person_events", self.base_url))
            .bearer_auth(&self.api_key)
            .header("accept", "application/json")
            .multipart(form)
            .send()
            .context("tracking request to person_events failed")?;
        check_status(response, "person_events")?;
        debug!("recorded activity {} for person {}", activity_code, person_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people_fixture() -> Vec<WirePerson> {
        serde_json::from_str(
            r#"[
                {"id": 1, "name": "Jane Doe", "emails": [{"value": "jane@other.com"}], "phones": []},
                {"id": 2, "name": "Jane Doe", "emails": [{"value": "Jane@Example.com"}],
                 "phones": [{"value": "+16035551234"}]}
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn test_select_person_requires_email_match_when_known() {
        let person = select_person(people_fixture(), Some("jane@example.com")).unwrap();
        assert_eq!(person.id, 2);
        assert_eq!(person.phone.as_deref(), Some("+16035551234"));
    }

    #[test]
    fn test_select_person_no_email_match_returns_none() {
        assert!(select_person(people_fixture(), Some("nobody@nowhere.com")).is_none());
    }

    #[test]
    fn test_select_person_without_email_takes_first_hit() {
        let person = select_person(people_fixture(), None).unwrap();
        assert_eq!(person.id, 1);
        assert!(person.phone.is_none());
    }

    fn jobs_fixture() -> Vec<WireJob> {
        serde_json::from_str(
            r#"[
                {"id": 10, "title": "Senior Flooring Installer", "state_code": "MA"},
                {"id": 11, "title": "Flooring Installer", "state_code": "NH"},
                {"id": 12, "title": "CNC Operator", "state_code": "NH"}
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn test_select_job_matches_title_and_region() {
        let job = select_job(jobs_fixture(), "flooring installer", Some("nh")).unwrap();
        assert_eq!(job.id, 11);
    }

    #[test]
    fn test_select_job_wrong_region_returns_none() {
        assert!(select_job(jobs_fixture(), "CNC Operator", Some("TX")).is_none());
    }

    #[test]
    fn test_select_job_without_region_takes_first_title_match() {
        let job = select_job(jobs_fixture(), "Installer", None).unwrap();
        assert_eq!(job.id, 10);
    }

    #[test]
    fn test_job_without_state_code_fails_region_match() {
        let jobs: Vec<WireJob> =
            serde_json::from_str(r#"[{"id": 20, "title": "Installer"}]"#).unwrap();
        assert!(select_job(jobs, "Installer", Some("NH")).is_none());
    }
}
