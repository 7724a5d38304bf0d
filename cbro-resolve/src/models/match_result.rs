//! Matcher output

use super::Candidate;
use serde::{Deserialize, Serialize};

/// Coarse bucket summarizing match quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    Exact,
    Probable,
    Ambiguous,
    None,
}

impl ConfidenceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceTier::Exact => "exact",
            ConfidenceTier::Probable => "probable",
            ConfidenceTier::Ambiguous => "ambiguous",
            ConfidenceTier::None => "none",
        }
    }

    /// Exact and probable matches are accepted (and cached)
    pub fn is_accepted(&self) -> bool {
        matches!(self, ConfidenceTier::Exact | ConfidenceTier::Probable)
    }
}

/// A candidate with its score breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    /// Total score
    pub score: f64,
    /// Best of name and discounted alias similarity, 0.0..=1.0
    pub name_similarity: f64,
    /// Absolute year difference, when both years are known
    pub year_diff: Option<u32>,
}

/// Outcome of scoring one reference against a candidate set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Chosen catalog series identifier
    pub chosen: Option<u64>,
    /// Details of the chosen series
    pub series: Option<Candidate>,
    /// Score of the top candidate (0.0 when there were no candidates)
    pub score: f64,
    pub tier: ConfidenceTier,
    /// Ranked alternatives for diagnostics and manual disambiguation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runner_ups: Vec<ScoredCandidate>,
    /// Candidate collection stopped at the page cap
    #[serde(default)]
    pub truncated: bool,

    /// Matched issue inside the chosen series
    #[serde(default)]
    pub issue_id: Option<u64>,
    #[serde(default)]
    pub issue_number: Option<String>,
    #[serde(default)]
    pub cover_year: Option<i32>,
}

impl MatchResult {
    /// Result for an empty candidate set
    pub fn none() -> Self {
        Self {
            chosen: None,
            series: None,
            score: 0.0,
            tier: ConfidenceTier::None,
            runner_ups: Vec::new(),
            truncated: false,
            issue_id: None,
            issue_number: None,
            cover_year: None,
        }
    }

    /// Copy suitable for persistence (runner-ups are never stored)
    pub fn without_runner_ups(&self) -> Self {
        Self {
            runner_ups: Vec::new(),
            ..self.clone()
        }
    }

    /// Series-level decision without runner-ups or issue fields
    pub fn series_only(&self) -> Self {
        Self {
            runner_ups: Vec::new(),
            issue_id: None,
            issue_number: None,
            cover_year: None,
            ..self.clone()
        }
    }

    pub fn has_issue(&self) -> bool {
        self.issue_id.is_some()
    }
}
