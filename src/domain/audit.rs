//! Audit records: one self-contained entry per moderated image.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::decision::{ModerationDecision, Verdict};
use crate::models::ModerationContext;

/// States a submission moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Received,
    Analyzing,
    Deciding,
    Watermarking,
    Published,
    Rejected,
    NeedsReview,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Published | PipelineState::Rejected | PipelineState::NeedsReview
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub state: PipelineState,
    pub at: DateTime<Utc>,
    /// Rule fired or error encountered, when there is one
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub image_id: String,
    pub property_id: String,
    pub uploader_id: String,
    pub verdict: Verdict,
    pub triggered_rules: Vec<String>,
    pub policy_version: String,
    pub transitions: Vec<Transition>,
}

impl AuditRecord {
    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        self.transitions.first().map(|t| t.at)
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.transitions.last().map(|t| t.at)
    }

    pub fn final_state(&self) -> Option<PipelineState> {
        self.transitions.last().map(|t| t.state)
    }
}

/// Accumulates timestamped transitions for one submission.
#[derive(Debug, Clone)]
pub struct AuditTrail {
    transitions: Vec<Transition>,
}

impl AuditTrail {
    pub fn start() -> Self {
        let mut trail = Self {
            transitions: Vec::with_capacity(6),
        };
        trail.enter(PipelineState::Received, None);
        trail
    }

    pub fn enter(&mut self, state: PipelineState, reason: Option<String>) {
        self.transitions.push(Transition {
            state,
            at: Utc::now(),
            reason,
        });
    }

    pub fn current(&self) -> PipelineState {
        self.transitions
            .last()
            .map(|t| t.state)
            .unwrap_or(PipelineState::Received)
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn finish(
        self,
        image_id: &str,
        ctx: &ModerationContext,
        decision: &ModerationDecision,
    ) -> AuditRecord {
        AuditRecord {
            image_id: image_id.to_string(),
            property_id: ctx.property_id.clone(),
            uploader_id: ctx.uploader_id.clone(),
            verdict: decision.verdict,
            triggered_rules: decision.triggered_rules.clone(),
            policy_version: decision.policy_version.clone(),
            transitions: self.transitions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trail_builds_record() {
        let mut trail = AuditTrail::start();
        trail.enter(PipelineState::Analyzing, None);
        trail.enter(PipelineState::Deciding, None);
        trail.enter(PipelineState::Rejected, Some("safesearch:adult".into()));
        assert!(trail.current().is_terminal());

        let decision = ModerationDecision::new(
            Verdict::Rejected,
            vec!["safesearch:adult".into()],
            "v1",
            Utc::now(),
        );
        let record = trail.finish("abc", &ModerationContext::new("p-1", "u-1"), &decision);

        assert_eq!(record.property_id, "p-1");
        assert_eq!(record.final_state(), Some(PipelineState::Rejected));
        assert_eq!(record.transitions.len(), 4);
        assert!(record.received_at() <= record.completed_at());
    }

    #[test]
    fn test_record_serializes_snake_case() {
        let record = AuditRecord {
            image_id: "i".into(),
            property_id: "p".into(),
            uploader_id: "u".into(),
            verdict: Verdict::NeedsReview,
            triggered_rules: vec![],
            policy_version: "v1".into(),
            transitions: vec![],
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"verdict\":\"needs_review\""));
        assert!(json.contains("\"image_id\":\"i\""));
    }
}
