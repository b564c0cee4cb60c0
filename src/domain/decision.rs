//! Moderation verdicts and the rule names recorded with them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    Rejected,
    NeedsReview,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Approved => "approved",
            Verdict::Rejected => "rejected",
            Verdict::NeedsReview => "needs_review",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rule identifiers written to `triggered_rules`. Audit-only; never shown to uploaders.
pub mod rules {
    pub const ANALYSIS_UNAVAILABLE: &str = "analysis:unavailable";
    pub const INPUT_OVERSIZE: &str = "input:oversize";
    pub const INPUT_UNSUPPORTED_FORMAT: &str = "input:unsupported_format";
    pub const INPUT_EMPTY: &str = "input:empty";
    pub const WATERMARK_DECODE_ERROR: &str = "watermark:decode_error";
    pub const WATERMARK_FAILED: &str = "watermark:failed";
    pub const FACES_OVER_LIMIT: &str = "faces:over_limit";

    pub fn blocklist(term: &str) -> String {
        format!("blocklist:{}", term)
    }

    pub fn safesearch(category: &str) -> String {
        format!("safesearch:{}", category)
    }

    pub fn uncertain(category: &str) -> String {
        format!("uncertain:{}", category)
    }

    pub fn borderline(category: &str) -> String {
        format!("borderline:{}", category)
    }
}

/// Category-level reason an upload handler may show an end user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCategory {
    RestrictedContent,
    ExplicitContent,
    ViolentContent,
    InvalidImage,
    ProcessingFailure,
    PendingReview,
}

impl fmt::Display for ViolationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ViolationCategory::RestrictedContent => "contains restricted content",
            ViolationCategory::ExplicitContent => "contains explicit content",
            ViolationCategory::ViolentContent => "contains violent content",
            ViolationCategory::InvalidImage => "unsupported or oversized image",
            ViolationCategory::ProcessingFailure => "image could not be processed",
            ViolationCategory::PendingReview => "awaiting manual review",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationDecision {
    pub verdict: Verdict,
    /// Rules in the order they fired
    pub triggered_rules: Vec<String>,
    pub policy_version: String,
    pub decided_at: DateTime<Utc>,
}

impl ModerationDecision {
    pub fn new(
        verdict: Verdict,
        triggered_rules: Vec<String>,
        policy_version: impl Into<String>,
        decided_at: DateTime<Utc>,
    ) -> Self {
        Self {
            verdict,
            triggered_rules,
            policy_version: policy_version.into(),
            decided_at,
        }
    }

    /// Only approved images may reach a public listing.
    pub fn is_publishable(&self) -> bool {
        self.verdict == Verdict::Approved
    }

    /// Replace the verdict after a post-decision failure, keeping the earlier rules.
    pub fn downgrade(mut self, verdict: Verdict, rule: &str, at: DateTime<Utc>) -> Self {
        self.verdict = verdict;
        self.triggered_rules.push(rule.to_string());
        self.decided_at = at;
        self
    }

    /// Map the first decisive rule to a user-facing category.
    pub fn category(&self) -> Option<ViolationCategory> {
        match self.verdict {
            Verdict::Approved => None,
            Verdict::NeedsReview => Some(ViolationCategory::PendingReview),
            Verdict::Rejected => Some(
                self.triggered_rules
                    .iter()
                    .find_map(|rule| rejection_category(rule))
                    .unwrap_or(ViolationCategory::RestrictedContent),
            ),
        }
    }
}

fn rejection_category(rule: &str) -> Option<ViolationCategory> {
    let (kind, detail) = rule.split_once(':')?;
    match kind {
        "blocklist" => Some(ViolationCategory::RestrictedContent),
        "safesearch" if detail == "violence" => Some(ViolationCategory::ViolentContent),
        "safesearch" => Some(ViolationCategory::ExplicitContent),
        "input" => Some(ViolationCategory::InvalidImage),
        "watermark" => Some(ViolationCategory::ProcessingFailure),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(rules: &[&str]) -> ModerationDecision {
        ModerationDecision::new(
            Verdict::Rejected,
            rules.iter().map(|r| r.to_string()).collect(),
            "v1",
            Utc::now(),
        )
    }

    #[test]
    fn test_category_hides_matched_term() {
        let decision = rejected(&["blocklist:handgun"]);
        let category = decision.category().unwrap();
        assert_eq!(category, ViolationCategory::RestrictedContent);
        assert!(!category.to_string().contains("handgun"));
    }

    #[test]
    fn test_category_for_safesearch_rules() {
        assert_eq!(
            rejected(&["safesearch:violence"]).category(),
            Some(ViolationCategory::ViolentContent)
        );
        assert_eq!(
            rejected(&["safesearch:racy", "safesearch:violence"]).category(),
            Some(ViolationCategory::ExplicitContent)
        );
    }

    #[test]
    fn test_downgrade_keeps_history() {
        let approved = ModerationDecision::new(Verdict::Approved, vec![], "v1", Utc::now());
        assert!(approved.is_publishable());
        assert_eq!(approved.category(), None);

        let downgraded =
            approved.downgrade(Verdict::Rejected, rules::WATERMARK_DECODE_ERROR, Utc::now());
        assert!(!downgraded.is_publishable());
        assert_eq!(downgraded.triggered_rules, vec!["watermark:decode_error"]);
        assert_eq!(downgraded.category(), Some(ViolationCategory::ProcessingFailure));
    }
}
