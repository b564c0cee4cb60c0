//! Moderation pipeline orchestrator.
//!
//! `Received → Analyzing → Deciding → Watermarking → Published`, or
//! `Rejected` / `NeedsReview` from any step. Every submission ends in a
//! terminal state, produces a decision and writes exactly one audit record.
//!
//! Each submission runs on its own task so a caller dropping the future does
//! not lose the audit record for a vision call that was already paid for.

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use super::audit::{AuditSink, TracingAuditSink};
use super::policy::{self, PolicyConfig};
use super::vision::{AnalysisError, InputError, VisionAnalyzer};
use super::watermark::{self, WatermarkError, WatermarkSpec};
use crate::constants::{DEFAULT_VISION_CONCURRENCY, MODERATION_BUDGET_SECS};
use crate::domain::{
    AnalysisResult, AuditRecord, AuditTrail, ModerationDecision, PipelineState, Verdict, rules,
};
use crate::models::{ImageAsset, ModerationContext};

/// What the caller gets back for one image.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub decision: ModerationDecision,
    /// Present only when the verdict is `Approved`
    pub watermarked: Option<ImageAsset>,
    pub audit: AuditRecord,
}

impl PipelineResult {
    pub fn verdict(&self) -> Verdict {
        self.decision.verdict
    }
}

pub struct PipelineBuilder {
    analyzer: Arc<dyn VisionAnalyzer>,
    policy: PolicyConfig,
    watermark: WatermarkSpec,
    audit: Arc<dyn AuditSink>,
    max_concurrency: usize,
    budget: Duration,
}

impl PipelineBuilder {
    pub fn policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    pub fn watermark(mut self, spec: WatermarkSpec) -> Self {
        self.watermark = spec;
        self
    }

    pub fn audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    pub fn max_concurrency(mut self, permits: usize) -> Self {
        self.max_concurrency = permits.max(1);
        self
    }

    pub fn budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn build(self) -> ModerationPipeline {
        ModerationPipeline {
            inner: Arc::new(Inner {
                analyzer: self.analyzer,
                policy: self.policy,
                watermark: Arc::new(self.watermark),
                audit: self.audit,
                permits: Semaphore::new(self.max_concurrency),
                max_concurrency: self.max_concurrency,
                budget: self.budget,
            }),
        }
    }
}

struct Inner {
    analyzer: Arc<dyn VisionAnalyzer>,
    policy: PolicyConfig,
    watermark: Arc<WatermarkSpec>,
    audit: Arc<dyn AuditSink>,
    /// Bounds concurrent vision calls process-wide
    permits: Semaphore,
    max_concurrency: usize,
    budget: Duration,
}

/// Cheap to clone; clones share the semaphore and collaborators.
#[derive(Clone)]
pub struct ModerationPipeline {
    inner: Arc<Inner>,
}

enum Analysis {
    Ready(AnalysisResult),
    Invalid(InputError),
    Unavailable(String),
}

impl ModerationPipeline {
    pub fn builder(analyzer: Arc<dyn VisionAnalyzer>) -> PipelineBuilder {
        PipelineBuilder {
            analyzer,
            policy: PolicyConfig::default(),
            watermark: WatermarkSpec::default(),
            audit: Arc::new(TracingAuditSink),
            max_concurrency: DEFAULT_VISION_CONCURRENCY,
            budget: Duration::from_secs(MODERATION_BUDGET_SECS),
        }
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.inner.policy
    }

    pub fn budget(&self) -> Duration {
        self.inner.budget
    }

    pub fn max_concurrency(&self) -> usize {
        self.inner.max_concurrency
    }

    pub fn available_permits(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Vision calls currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.inner
            .max_concurrency
            .saturating_sub(self.inner.permits.available_permits())
    }

    /// Moderate one image. Expected failures resolve to a decision; only a
    /// panic inside the pipeline propagates.
    pub async fn submit(&self, image: ImageAsset, ctx: ModerationContext) -> PipelineResult {
        let inner = self.inner.clone();
        let fallback = (image.id().to_string(), ctx.clone());
        let task = tokio::spawn(async move { inner.run(image, ctx).await });

        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                let (image_id, ctx) = fallback;
                error!(image_id = %image_id, error = %e, "moderation task cancelled");
                self.inner.abandoned(&image_id, &ctx).await
            }
        }
    }

    /// Moderate several images concurrently; results follow input order.
    pub async fn submit_all(
        &self,
        images: Vec<ImageAsset>,
        ctx: &ModerationContext,
    ) -> Vec<PipelineResult> {
        join_all(
            images
                .into_iter()
                .map(|image| self.submit(image, ctx.clone())),
        )
        .await
    }
}

impl Inner {
    async fn run(&self, image: ImageAsset, ctx: ModerationContext) -> PipelineResult {
        let mut trail = AuditTrail::start();

        let analysis = match self.analyzer.validate(&image) {
            Ok(()) => self.analyze(&image, &mut trail).await,
            Err(err) => {
                warn!(image_id = %image.id(), error = %err, "image rejected before analysis");
                Analysis::Invalid(err)
            }
        };

        let decision = match analysis {
            Analysis::Invalid(err) => {
                let rule = match err {
                    InputError::Oversize { .. } => rules::INPUT_OVERSIZE,
                    InputError::UnsupportedFormat => rules::INPUT_UNSUPPORTED_FORMAT,
                    InputError::Empty => rules::INPUT_EMPTY,
                };
                ModerationDecision::new(
                    Verdict::Rejected,
                    vec![rule.to_string()],
                    &self.policy.version,
                    Utc::now(),
                )
            }
            Analysis::Unavailable(reason) => {
                trail.enter(PipelineState::Deciding, Some(reason));
                policy::decide_unavailable(&self.policy, Utc::now())
            }
            Analysis::Ready(result) => {
                trail.enter(PipelineState::Deciding, None);
                policy::decide(&result, &self.policy)
            }
        };

        let (decision, watermarked) = if decision.is_publishable() {
            trail.enter(PipelineState::Watermarking, None);
            match self.stamp(&image).await {
                Ok(stamped) => (decision, Some(stamped)),
                Err(rule) => (decision.downgrade(Verdict::Rejected, rule, Utc::now()), None),
            }
        } else {
            (decision, None)
        };

        let terminal = match decision.verdict {
            Verdict::Approved => PipelineState::Published,
            Verdict::Rejected => PipelineState::Rejected,
            Verdict::NeedsReview => PipelineState::NeedsReview,
        };
        let reason = (!decision.triggered_rules.is_empty()).then(|| decision.triggered_rules.join(","));
        trail.enter(terminal, reason);

        info!(
            image_id = %image.id(),
            property_id = %ctx.property_id,
            state = ?trail.current(),
            verdict = %decision.verdict,
            rules = ?decision.triggered_rules,
            "image moderated"
        );

        let audit = trail.finish(image.id(), &ctx, &decision);
        self.record(&audit).await;

        PipelineResult {
            decision,
            watermarked,
            audit,
        }
    }

    /// Waits for a permit, then runs the analyzer under the total budget.
    async fn analyze(&self, image: &ImageAsset, trail: &mut AuditTrail) -> Analysis {
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => return Analysis::Unavailable("vision semaphore closed".into()),
        };
        trail.enter(PipelineState::Analyzing, None);

        match tokio::time::timeout(self.budget, self.analyzer.analyze(image)).await {
            Ok(Ok(result)) => Analysis::Ready(result),
            Ok(Err(AnalysisError::Input(err))) => {
                warn!(image_id = %image.id(), error = %err, "image rejected before analysis");
                Analysis::Invalid(err)
            }
            Ok(Err(err @ AnalysisError::Unavailable { .. })) => Analysis::Unavailable(err.to_string()),
            Err(_) => {
                warn!(
                    image_id = %image.id(),
                    budget_secs = self.budget.as_secs(),
                    "vision analysis exceeded budget"
                );
                Analysis::Unavailable(format!(
                    "analysis budget of {}s exceeded",
                    self.budget.as_secs()
                ))
            }
        }
    }

    /// Watermark off the async workers; returns the rule to record on failure.
    async fn stamp(&self, image: &ImageAsset) -> Result<ImageAsset, &'static str> {
        let source = image.clone();
        let spec = self.watermark.clone();
        let outcome = tokio::task::spawn_blocking(move || watermark::apply(&source, &spec)).await;

        match outcome {
            Ok(Ok(stamped)) => Ok(stamped),
            Ok(Err(WatermarkError::Decode(e))) => {
                warn!(image_id = %image.id(), error = %e, "approved image failed to decode");
                Err(rules::WATERMARK_DECODE_ERROR)
            }
            Ok(Err(e)) => {
                error!(image_id = %image.id(), error = %e, "watermarking failed");
                Err(rules::WATERMARK_FAILED)
            }
            Err(e) => {
                error!(image_id = %image.id(), error = %e, "watermark task failed");
                Err(rules::WATERMARK_FAILED)
            }
        }
    }

    async fn record(&self, audit: &AuditRecord) {
        if let Err(e) = self.audit.append(audit).await {
            error!(image_id = %audit.image_id, error = %e, "failed to write audit record");
        }
    }

    /// Result for a task the runtime cancelled before it finished.
    async fn abandoned(&self, image_id: &str, ctx: &ModerationContext) -> PipelineResult {
        let decision = policy::decide_unavailable(&self.policy, Utc::now());
        let mut trail = AuditTrail::start();
        trail.enter(
            PipelineState::NeedsReview,
            Some("moderation task cancelled".into()),
        );
        let audit = trail.finish(image_id, ctx, &decision);
        self.record(&audit).await;
        PipelineResult {
            decision,
            watermarked: None,
            audit,
        }
    }
}
