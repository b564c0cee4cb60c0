//! Moderation and watermarking for property listing photos.
//!
//! [`ModerationPipeline`] is the entry point: it analyses an upload with a
//! [`VisionAnalyzer`], decides with a [`PolicyConfig`], watermarks approved
//! images and writes one audit record per image.

pub mod config;
pub mod constants;
pub mod domain;
pub mod logging;
pub mod models;
pub mod services;

pub use config::{ConfigError, PolicyFile, Settings};
pub use domain::{
    AnalysisResult, AuditRecord, Likelihood, ModerationDecision, PipelineState, Verdict,
    ViolationCategory,
};
pub use models::{ImageAsset, ImageError, ImageFormat, ModerationContext};
pub use services::{
    ModerationPipeline, PipelineResult, PolicyConfig, VisionAnalyzer, WatermarkSpec,
};
