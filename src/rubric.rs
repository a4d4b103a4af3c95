use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A job-role-specific scoring rubric: evaluation criteria spliced into the
/// prompt, plus an optional score cap applied when the evaluator reports
/// must-have gaps (the industry-mismatch refinement).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rubric {
    pub name: String,
    pub criteria: String,
    #[serde(default)]
    pub mismatch_cap: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
struct RubricSpec {
    prompt: String,
    #[serde(default)]
    mismatch_cap: Option<u8>,
}

/// Configured mapping of job name to rubric, with a generic fallback.
#[derive(Debug, Clone)]
pub struct RubricSet {
    rubrics: Vec<Rubric>,
    generic: Rubric,
}

const GENERIC_CRITERIA: &str = "Evaluate this candidate for the given job position. \
Focus on skills alignment with job requirements, experience level match, \
career progression relevance, and overall fit for the role.";

impl RubricSet {
    /// The three role rubrics the recruiting team actually screens for, plus
    /// the generic fallback.
    pub fn builtin() -> Self {
        let rubrics = vec![
            Rubric {
                name: "Design Consultant".to_string(),
                criteria: "Luxury surfaces showroom sales role. Must-haves: showroom sales in \
                    luxury surfaces (stone/tile/countertops), consulting for high-end clientele \
                    (designers/architects/builders), design selections or builder packages, and \
                    revenue ownership. Weight showroom experience heavily. Candidates without \
                    luxury showroom sales are a PASS or weak INTERVIEW at best."
                    .to_string(),
                mismatch_cap: Some(65),
            },
            Rubric {
                name: "Installation Manager".to_string(),
                criteria: "Flooring/countertop installation management. Must-haves: direct \
                    oversight of installs, crew and vendor scheduling, QC and safety, multi-site \
                    coordination. Strong transferable install/crew leadership without flooring or \
                    countertops can still merit INTERVIEW; generic ops or warehouse background \
                    without install oversight is a PASS. Bilingual is a concern if the job \
                    requires it and the resume lacks it, not an automatic fail."
                    .to_string(),
                mismatch_cap: None,
            },
            Rubric {
                name: "CNC Operator".to_string(),
                criteria: "CNC operation in stone countertop fabrication. Must-haves: CNC on \
                    stone (granite/marble/quartz/quartzite/porcelain), machines such as \
                    Prussiani, Park Industries, Breton, Baca, or Intermac, and stone shop \
                    workflow (templating, cutting, polishing, slabs). Generic CNC on metal, \
                    wood, or plastic only is a PASS."
                    .to_string(),
                mismatch_cap: Some(50),
            },
        ];
        Self {
            rubrics,
            generic: Self::generic_rubric(),
        }
    }

    fn generic_rubric() -> Rubric {
        Rubric {
            name: "General".to_string(),
            criteria: GENERIC_CRITERIA.to_string(),
            mismatch_cap: None,
        }
    }

    /// Loads a `{"Job Name": {"prompt": "...", "mismatch_cap": 50}}` mapping.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read rubric file {}", path.display()))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let specs: BTreeMap<String, RubricSpec> =
            serde_json::from_str(text).context("malformed rubric JSON")?;
        let rubrics = specs
            .into_iter()
            .map(|(name, spec)| Rubric {
                name,
                criteria: spec.prompt,
                mismatch_cap: spec.mismatch_cap,
            })
            .collect();
        Ok(Self {
            rubrics,
            generic: Self::generic_rubric(),
        })
    }

    /// Case-insensitive substring match of the job title against the rubric
    /// names; the generic rubric when nothing matches or no title is known.
    pub fn select(&self, job_title: Option<&str>) -> &Rubric {
        let Some(title) = job_title else {
            return &self.generic;
        };
        let needle = title.to_lowercase();
        self.rubrics
            .iter()
            .find(|r| r.name.to_lowercase().contains(&needle) || needle.contains(&r.name.to_lowercase()))
            .unwrap_or(&self.generic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_partial_case_insensitive_match() {
        let set = RubricSet::builtin();
        assert_eq!(set.select(Some("cnc operator")).name, "CNC Operator");
        assert_eq!(set.select(Some("Senior CNC Operator")).name, "CNC Operator");
        assert_eq!(set.select(Some("design")).name, "Design Consultant");
    }

    #[test]
    fn test_select_falls_back_to_generic() {
        let set = RubricSet::builtin();
        assert_eq!(set.select(Some("Forklift Driver")).name, "General");
        assert_eq!(set.select(None).name, "General");
    }

    #[test]
    fn test_from_json_mapping() {
        let json = r#"{
            "Shop Helper/Laborer": {"prompt": "Lifting and shop support role."},
            "Estimator": {"prompt": "Stone estimating role.", "mismatch_cap": 55}
        }"#;
        let set = RubricSet::from_json(json).unwrap();
        let rubric = set.select(Some("Shop Helper"));
        assert_eq!(rubric.name, "Shop Helper/Laborer");
        assert_eq!(rubric.mismatch_cap, None);
        assert_eq!(set.select(Some("Estimator")).mismatch_cap, Some(55));
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(RubricSet::from_json("not json").is_err());
    }
}
