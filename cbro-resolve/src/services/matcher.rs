//! Candidate scoring and selection
//!
//! Deterministic heuristic scorer: no I/O, no mutation of inputs, identical
//! inputs always give an identical [`MatchResult`].
//!
//! Per-candidate score:
//! - Name similarity (dominant): `name_weight * similarity`, where
//!   similarity is the mean of normalized Levenshtein and token Dice over
//!   normalized names, taking the best of display name and discounted aliases
//! - Year proximity: bonus bands for 0, 1 and 2..cutoff years apart, nothing
//!   at or past the cutoff, a penalty past the contradiction cutoff
//! - Issue-count plausibility: penalty when the series is too short to
//!   contain the referenced issue, bonus when it looks like a main series

use crate::models::{Candidate, ConfidenceTier, MatchResult, Reference, ScoredCandidate};
use crate::services::normalizer::{normalize, normalize_issue_number, NormalizedKey, YearRange};
use cbro_common::config::MatcherSettings;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Scores candidate series against references
#[derive(Debug, Clone)]
pub struct Matcher {
    settings: MatcherSettings,
    year_range: YearRange,
}

/// Reference fields the scorer compares against
struct Target {
    name: NormalizedKey,
    year: Option<i32>,
    issue_number: Option<f64>,
}

impl Matcher {
    pub fn new(settings: MatcherSettings, year_range: YearRange) -> Self {
        Self { settings, year_range }
    }

    pub fn settings(&self) -> &MatcherSettings {
        &self.settings
    }

    /// Reference year, else a plausible year embedded in the series name
    pub fn effective_year(&self, reference: &Reference) -> Option<i32> {
        self.year_range
            .validate(reference.year)
            .or_else(|| self.year_range.extract_year(&reference.series_name))
    }

    /// Score `candidates` against `reference` and decide
    pub fn match_reference(&self, reference: &Reference, candidates: &[Candidate]) -> MatchResult {
        if candidates.is_empty() {
            return MatchResult::none();
        }

        let target = Target {
            name: normalize(&reference.series_name),
            year: self.effective_year(reference),
            issue_number: normalize_issue_number(&reference.issue_number)
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite()),
        };

        // Cap by name similarity before full scoring
        let mut by_similarity: Vec<(f64, &Candidate)> = candidates
            .iter()
            .map(|c| (self.name_similarity(&target.name, c), c))
            .collect();
        by_similarity.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
        by_similarity.truncate(self.settings.candidate_cap.max(1));

        let mut ranked: Vec<ScoredCandidate> = by_similarity
            .into_iter()
            .map(|(similarity, candidate)| self.score(&target, candidate, similarity))
            .collect();
        ranked.sort_by(compare_ranked);

        self.decide(ranked)
    }

    fn decide(&self, ranked: Vec<ScoredCandidate>) -> MatchResult {
        let limit = self.settings.runner_up_limit;
        let Some(top) = ranked.first().cloned() else {
            return MatchResult::none();
        };

        let mut result = MatchResult::none();
        result.score = top.score;

        if top.score < self.settings.acceptance_threshold {
            result.runner_ups = ranked.into_iter().take(limit).collect();
            return result;
        }

        let runner_up_close = ranked
            .get(1)
            .is_some_and(|second| top.score - second.score <= self.settings.ambiguity_delta);

        if runner_up_close {
            result.tier = ConfidenceTier::Ambiguous;
            result.runner_ups = ranked.into_iter().take(limit.max(2)).collect();
            return result;
        }

        result.tier = if top.score >= self.settings.exact_threshold {
            ConfidenceTier::Exact
        } else {
            ConfidenceTier::Probable
        };
        result.chosen = Some(top.candidate.id);
        result.series = Some(top.candidate);
        result.runner_ups = ranked.into_iter().skip(1).take(limit).collect();
        result
    }

    fn score(&self, target: &Target, candidate: &Candidate, similarity: f64) -> ScoredCandidate {
        let year_diff = match (target.year, candidate.start_year) {
            (Some(a), Some(b)) => Some(a.abs_diff(b)),
            _ => None,
        };

        let score = self.settings.name_weight * similarity
            + self.year_component(year_diff)
            + self.issue_count_component(target.issue_number, candidate.issue_count);

        ScoredCandidate {
            candidate: candidate.clone(),
            score,
            name_similarity: similarity,
            year_diff,
        }
    }

    /// Best of display-name and discounted alias similarity
    fn name_similarity(&self, target: &NormalizedKey, candidate: &Candidate) -> f64 {
        let by_name = similarity(target, &normalize(&candidate.name));

        candidate
            .aliases
            .iter()
            .map(|alias| similarity(target, &normalize(alias)) * self.settings.alias_discount)
            .fold(by_name, f64::max)
    }

    fn year_component(&self, year_diff: Option<u32>) -> f64 {
        let Some(diff) = year_diff else {
            return 0.0;
        };
        let s = &self.settings;

        if diff > s.year_penalty_cutoff {
            -s.year_penalty
        } else if diff >= s.year_cutoff {
            0.0
        } else {
            match diff {
                0 => s.year_exact_bonus,
                1 => s.year_near_bonus,
                _ => s.year_far_bonus,
            }
        }
    }

    fn issue_count_component(&self, issue_number: Option<f64>, issue_count: Option<u32>) -> f64 {
        let (Some(number), Some(count)) = (issue_number, issue_count) else {
            return 0.0;
        };
        let s = &self.settings;
        let count = f64::from(count);

        if number > 0.0 && count < number * s.issue_count_too_small_ratio {
            -s.issue_count_penalty
        } else if count >= f64::from(s.issue_count_plausible_min) {
            s.issue_count_bonus
        } else {
            0.0
        }
    }
}

/// Score descending, then closer year, then catalog id
fn compare_ranked(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| match (a.year_diff, b.year_diff) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.candidate.id.cmp(&b.candidate.id))
}

/// Mean of normalized Levenshtein and token Dice, 0.0..=1.0
fn similarity(a: &NormalizedKey, b: &NormalizedKey) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let edit = strsim::normalized_levenshtein(a.as_str(), b.as_str());
    (edit + token_dice(a, b)) / 2.0
}

fn token_dice(a: &NormalizedKey, b: &NormalizedKey) -> f64 {
    let left: HashSet<&str> = a.tokens().collect();
    let right: HashSet<&str> = b.tokens().collect();
    if left.is_empty() && right.is_empty() {
        return 0.0;
    }
    let shared = left.intersection(&right).count();
    2.0 * shared as f64 / (left.len() + right.len()) as f64
}
