//! Per-reference resolution outcome

use super::{MatchResult, Reference};
use crate::error::FailureKind;
use cbro_common::events::OutcomeKind;
use serde::{Deserialize, Serialize};

/// What happened to one reference
///
/// Unmatched, ambiguous and failed outcomes are all preserved in output;
/// a failure is distinct from "no match found".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    /// Accepted match (tier exact or probable)
    Resolved {
        result: MatchResult,
        from_cache: bool,
    },
    /// Top candidates too close to call; runner-ups carry the choices
    Ambiguous { result: MatchResult },
    /// No candidate cleared the acceptance threshold
    Unmatched { result: MatchResult },
    /// Lookup failed for this reference only
    Failed { kind: FailureKind, message: String },
    /// Cancellation was raised before the reference finished
    Cancelled,
}

impl Resolution {
    pub fn outcome_kind(&self) -> OutcomeKind {
        match self {
            Resolution::Resolved { .. } => OutcomeKind::Resolved,
            Resolution::Ambiguous { .. } => OutcomeKind::Ambiguous,
            Resolution::Unmatched { .. } => OutcomeKind::Unmatched,
            Resolution::Failed { .. } => OutcomeKind::Failed,
            Resolution::Cancelled => OutcomeKind::Cancelled,
        }
    }

    pub fn match_result(&self) -> Option<&MatchResult> {
        match self {
            Resolution::Resolved { result, .. }
            | Resolution::Ambiguous { result }
            | Resolution::Unmatched { result } => Some(result),
            Resolution::Failed { .. } | Resolution::Cancelled => None,
        }
    }

    pub fn is_from_cache(&self) -> bool {
        matches!(self, Resolution::Resolved { from_cache: true, .. })
    }
}

/// A reference paired with its resolution, as handed to output writers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedReference {
    pub reference: Reference,
    pub resolution: Resolution,
}

/// Totals over a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub resolved: usize,
    pub ambiguous: usize,
    pub unmatched: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Resolved entries answered from the persistent cache
    pub from_cache: usize,
}

impl BatchSummary {
    pub fn tally(results: &[ResolvedReference]) -> Self {
        let mut summary = Self::default();
        for item in results {
            match item.resolution.outcome_kind() {
                OutcomeKind::Resolved => summary.resolved += 1,
                OutcomeKind::Ambiguous => summary.ambiguous += 1,
                OutcomeKind::Unmatched => summary.unmatched += 1,
                OutcomeKind::Failed => summary.failed += 1,
                OutcomeKind::Cancelled => summary.cancelled += 1,
            }
            if item.resolution.is_from_cache() {
                summary.from_cache += 1;
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.resolved + self.ambiguous + self.unmatched + self.failed + self.cancelled
    }
}
