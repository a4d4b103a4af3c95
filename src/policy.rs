use serde::{Deserialize, Serialize};

use crate::models::Recommendation;

/// Scores at or below this band are a PASS; above `INTERVIEW_CEILING` a HIRE.
pub const PASS_CEILING: u8 = 45;
pub const INTERVIEW_CEILING: u8 = 79;

/// Single cutoff for the binary accepted/rejected tag pushed to the tracking
/// system.
pub const ACCEPT_CUTOFF: u8 = 60;

pub const TAG_ACCEPTED: &str = "AI Accepted";
pub const TAG_REJECTED: &str = "AI Rejected";

/// Activity type ids the tracking system uses to move a candidate between
/// pipeline stages.
pub const ACTIVITY_ACCEPTED: i64 = 760_300;
pub const ACTIVITY_REJECTED: i64 = 760_312;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub recommendation: Recommendation,
    pub tag: &'static str,
    pub activity_code: i64,
}

/// Maps a score to its recommendation band. Total over 0..=100 with no gap
/// or overlap: 0-45 PASS, 46-79 INTERVIEW, 80-100 HIRE.
pub fn recommendation_for(score: u8) -> Recommendation {
    if score <= PASS_CEILING {
        Recommendation::Pass
    } else if score <= INTERVIEW_CEILING {
        Recommendation::Interview
    } else {
        Recommendation::Hire
    }
}

/// Full deterministic decision for a score, independent of which evaluator
/// produced it.
pub fn decide(score: u8) -> Decision {
    let accepted = score > ACCEPT_CUTOFF;
    Decision {
        recommendation: recommendation_for(score),
        tag: if accepted { TAG_ACCEPTED } else { TAG_REJECTED },
        activity_code: if accepted {
            ACTIVITY_ACCEPTED
        } else {
            ACTIVITY_REJECTED
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banding_is_total_and_monotonic() {
        let mut previous = recommendation_for(0);
        for score in 0..=100u8 {
            let rec = recommendation_for(score);
            assert!(matches!(
                rec,
                Recommendation::Pass | Recommendation::Interview | Recommendation::Hire
            ));
            // Bands never go backwards as the score climbs.
            let rank = |r: Recommendation| match r {
                Recommendation::Pass => 0,
                Recommendation::Interview => 1,
                _ => 2,
            };
            assert!(rank(rec) >= rank(previous));
            previous = rec;
        }
    }

    #[test]
    fn test_band_edges() {
        assert_eq!(recommendation_for(45), Recommendation::Pass);
        assert_eq!(recommendation_for(46), Recommendation::Interview);
        assert_eq!(recommendation_for(79), Recommendation::Interview);
        assert_eq!(recommendation_for(80), Recommendation::Hire);
    }

    #[test]
    fn test_decide_score_82_is_hire_accepted() {
        let d = decide(82);
        assert_eq!(d.recommendation, Recommendation::Hire);
        assert_eq!(d.tag, TAG_ACCEPTED);
        assert_eq!(d.activity_code, ACTIVITY_ACCEPTED);
    }

    #[test]
    fn test_decide_score_40_is_pass_rejected() {
        let d = decide(40);
        assert_eq!(d.recommendation, Recommendation::Pass);
        assert_eq!(d.tag, TAG_REJECTED);
        assert_eq!(d.activity_code, ACTIVITY_REJECTED);
    }

    #[test]
    fn test_accept_cutoff_is_exclusive() {
        assert_eq!(decide(60).tag, TAG_REJECTED);
        assert_eq!(decide(61).tag, TAG_ACCEPTED);
    }
}
