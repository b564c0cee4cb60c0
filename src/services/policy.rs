//! Moderation policy: configuration and the decision function.
//!
//! Rules run in a fixed order so ties always resolve the same way:
//!
//! 1. blocklist hit on a label or object → Rejected, stop
//! 2. adult / violence / racy at or above threshold → Rejected, stop
//! 3. medical / spoof at or above threshold, or adult / violence / racy one
//!    level below threshold → NeedsReview
//! 4. more faces than the policy allows → NeedsReview
//! 5. otherwise Approved

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::DEFAULT_POLICY_VERSION;
use crate::domain::{
    AnalysisResult, Likelihood, ModerationDecision, SafeSearchCategory, Verdict, rules,
};

const REJECT_CATEGORIES: [SafeSearchCategory; 3] = [
    SafeSearchCategory::Adult,
    SafeSearchCategory::Violence,
    SafeSearchCategory::Racy,
];
const REVIEW_CATEGORIES: [SafeSearchCategory; 2] =
    [SafeSearchCategory::Medical, SafeSearchCategory::Spoof];

#[derive(Debug, Error)]
#[error("invalid policy: {0}")]
pub struct PolicyError(pub String);

/// Per-category reject thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafeSearchThresholds {
    pub adult: Likelihood,
    pub violence: Likelihood,
    pub racy: Likelihood,
    pub medical: Likelihood,
    pub spoof: Likelihood,
}

impl Default for SafeSearchThresholds {
    fn default() -> Self {
        Self {
            adult: Likelihood::Likely,
            violence: Likelihood::Likely,
            racy: Likelihood::Likely,
            medical: Likelihood::Likely,
            spoof: Likelihood::Likely,
        }
    }
}

impl SafeSearchThresholds {
    pub fn get(&self, category: SafeSearchCategory) -> Likelihood {
        match category {
            SafeSearchCategory::Adult => self.adult,
            SafeSearchCategory::Violence => self.violence,
            SafeSearchCategory::Racy => self.racy,
            SafeSearchCategory::Medical => self.medical,
            SafeSearchCategory::Spoof => self.spoof,
        }
    }
}

/// Read-only after load; share behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub version: String,
    pub thresholds: SafeSearchThresholds,
    /// Label / object names that force rejection, matched case-insensitively
    pub blocklist: Vec<String>,
    /// Labels and objects must score strictly above this to match the blocklist
    pub min_confidence: f32,
    /// `None` allows any number of faces; `Some(0)` for listings that must not show people
    pub max_faces: Option<u32>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            version: DEFAULT_POLICY_VERSION.to_string(),
            thresholds: SafeSearchThresholds::default(),
            blocklist: Vec::new(),
            min_confidence: 0.5,
            max_faces: None,
        }
    }
}

impl PolicyConfig {
    pub fn with_blocklist<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocklist = terms.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_faces(mut self, max_faces: Option<u32>) -> Self {
        self.max_faces = max_faces;
        self
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.version.trim().is_empty() {
            return Err(PolicyError("version must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(PolicyError(format!(
                "min_confidence must be within 0..=1, got {}",
                self.min_confidence
            )));
        }
        if self.blocklist.iter().any(|t| t.trim().is_empty()) {
            return Err(PolicyError("blocklist contains an empty term".into()));
        }
        Ok(())
    }

    fn blocklisted(&self, name: &str) -> Option<String> {
        let name = name.trim().to_lowercase();
        self.blocklist
            .iter()
            .map(|term| term.trim().to_lowercase())
            .find(|term| *term == name)
    }
}

/// Decide with the current time as the decision timestamp.
pub fn decide(result: &AnalysisResult, policy: &PolicyConfig) -> ModerationDecision {
    decide_at(result, policy, Utc::now())
}

/// Pure decision: identical inputs always give identical output.
pub fn decide_at(
    result: &AnalysisResult,
    policy: &PolicyConfig,
    at: DateTime<Utc>,
) -> ModerationDecision {
    let finish = |verdict, fired| ModerationDecision::new(verdict, fired, &policy.version, at);

    let blocked = blocklist_hits(result, policy);
    if !blocked.is_empty() {
        return finish(Verdict::Rejected, blocked);
    }

    let mut fired = Vec::new();
    for category in REJECT_CATEGORIES {
        if result.safe_search.get(category) >= policy.thresholds.get(category) {
            fired.push(rules::safesearch(category.name()));
        }
    }
    if !fired.is_empty() {
        return finish(Verdict::Rejected, fired);
    }

    for category in REVIEW_CATEGORIES {
        if result.safe_search.get(category) >= policy.thresholds.get(category) {
            fired.push(rules::uncertain(category.name()));
        }
    }
    for category in REJECT_CATEGORIES {
        if policy.thresholds.get(category).below() == Some(result.safe_search.get(category)) {
            fired.push(rules::borderline(category.name()));
        }
    }

    if let Some(max) = policy.max_faces {
        if result.face_count() > max as usize {
            fired.push(rules::FACES_OVER_LIMIT.to_string());
        }
    }

    if fired.is_empty() {
        finish(Verdict::Approved, fired)
    } else {
        finish(Verdict::NeedsReview, fired)
    }
}

/// Fail-safe decision when no analysis could be obtained.
pub fn decide_unavailable(policy: &PolicyConfig, at: DateTime<Utc>) -> ModerationDecision {
    ModerationDecision::new(
        Verdict::NeedsReview,
        vec![rules::ANALYSIS_UNAVAILABLE.to_string()],
        &policy.version,
        at,
    )
}

fn blocklist_hits(result: &AnalysisResult, policy: &PolicyConfig) -> Vec<String> {
    if policy.blocklist.is_empty() {
        return Vec::new();
    }
    let labels = result
        .labels
        .iter()
        .map(|l| (l.name.as_str(), l.confidence));
    let objects = result
        .objects
        .iter()
        .map(|o| (o.name.as_str(), o.confidence));

    let mut hits: Vec<String> = Vec::new();
    for (name, confidence) in labels.chain(objects) {
        if confidence <= policy.min_confidence {
            continue;
        }
        if let Some(term) = policy.blocklisted(name) {
            let rule = rules::blocklist(&term);
            if !hits.contains(&rule) {
                hits.push(rule);
            }
        }
    }
    hits
}
