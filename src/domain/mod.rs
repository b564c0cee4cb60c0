pub mod analysis;
pub mod audit;
pub mod decision;

pub use analysis::{
    AnalysisResult, BoundingBox, DetectedObject, Label, Likelihood, SafeSearch, SafeSearchCategory,
};
pub use audit::{AuditRecord, AuditTrail, PipelineState, Transition};
pub use decision::{ModerationDecision, Verdict, ViolationCategory, rules};
