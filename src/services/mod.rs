pub mod audit;
pub mod glyphs;
pub mod pipeline;
pub mod policy;
pub mod retry;
pub mod vision;
pub mod vision_api;
pub mod watermark;

pub use audit::{
    AuditError, AuditSink, FanoutAuditSink, JsonLinesAuditSink, MemoryAuditSink, PgAuditSink,
    TracingAuditSink,
};
pub use pipeline::{ModerationPipeline, PipelineBuilder, PipelineResult};
pub use policy::{
    PolicyConfig, PolicyError, SafeSearchThresholds, decide, decide_at, decide_unavailable,
};
pub use retry::RetryPolicy;
pub use vision::{
    AnalysisError, InputError, TransportError, VisionAnalysisClient, VisionAnalyzer,
    VisionTransport,
};
pub use vision_api::HttpVisionTransport;
pub use watermark::{Anchor, WatermarkError, WatermarkLayout, WatermarkSpec};
