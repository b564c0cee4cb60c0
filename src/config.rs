//! Process configuration: environment variables plus an optional policy file.

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::constants::{
    DEFAULT_VISION_CONCURRENCY, DEFAULT_VISION_ENDPOINT, MAX_IMAGE_BYTES, MODERATION_BUDGET_SECS,
    VISION_BACKOFF_BASE_MS, VISION_BACKOFF_MAX_MS, VISION_CALL_TIMEOUT_SECS, VISION_MAX_ATTEMPTS,
};
use crate::services::{
    AuditError, AuditSink, FanoutAuditSink, HttpVisionTransport, JsonLinesAuditSink,
    ModerationPipeline, PgAuditSink, PolicyConfig, RetryPolicy, TracingAuditSink, TransportError,
    VisionAnalysisClient, WatermarkError, WatermarkSpec,
};

const DEFAULT_OUTPUT_DIR: &str = "moderated";
const BACKOFF_JITTER: f64 = 0.5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("failed to read policy file {path}: {source}")]
    PolicyFile {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse policy file {path}: {source}")]
    PolicyJson {
        path: String,
        source: serde_json::Error,
    },
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
    #[error("failed to build vision client: {0}")]
    Client(#[from] TransportError),
    #[error("failed to connect audit database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to prepare audit log: {0}")]
    Audit(#[from] AuditError),
}

/// Policy and watermark settings, loaded once at start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyFile {
    pub policy: PolicyConfig,
    pub watermark: WatermarkSpec,
}

impl PolicyFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::PolicyFile {
            path: path.display().to_string(),
            source,
        })?;
        let file: PolicyFile =
            serde_json::from_str(&raw).map_err(|source| ConfigError::PolicyJson {
                path: path.display().to_string(),
                source,
            })?;
        file.validate()?;
        Ok(file)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.policy
            .validate()
            .map_err(|e| ConfigError::InvalidPolicy(e.0))?;
        self.watermark.validate().map_err(|e| match e {
            WatermarkError::InvalidSpec(msg) => ConfigError::InvalidPolicy(msg),
            other => ConfigError::InvalidPolicy(other.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub vision_endpoint: String,
    pub vision_api_key: Option<String>,
    pub max_image_bytes: usize,
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
    pub max_concurrency: usize,
    pub budget: Duration,
    pub policy_path: Option<PathBuf>,
    pub audit_log: Option<PathBuf>,
    pub database_url: Option<String>,
    pub output_dir: PathBuf,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let max_attempts = positive(&get, "VISION_MAX_ATTEMPTS", VISION_MAX_ATTEMPTS)?;
        let base_ms = positive(&get, "VISION_BACKOFF_BASE_MS", VISION_BACKOFF_BASE_MS)?;
        let max_ms = positive(&get, "VISION_BACKOFF_MAX_MS", VISION_BACKOFF_MAX_MS)?;
        if max_ms < base_ms {
            return Err(ConfigError::Invalid {
                key: "VISION_BACKOFF_MAX_MS",
                value: max_ms.to_string(),
            });
        }

        Ok(Self {
            vision_endpoint: get("VISION_API_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_VISION_ENDPOINT.to_string()),
            vision_api_key: get("VISION_API_KEY"),
            max_image_bytes: positive(&get, "MODERATION_MAX_IMAGE_BYTES", MAX_IMAGE_BYTES)?,
            call_timeout: Duration::from_secs(positive(
                &get,
                "VISION_CALL_TIMEOUT_SECS",
                VISION_CALL_TIMEOUT_SECS,
            )?),
            retry: RetryPolicy::new(
                max_attempts,
                Duration::from_millis(base_ms),
                Duration::from_millis(max_ms),
                BACKOFF_JITTER,
            ),
            max_concurrency: positive(&get, "VISION_MAX_CONCURRENCY", DEFAULT_VISION_CONCURRENCY)?,
            budget: Duration::from_secs(positive(
                &get,
                "MODERATION_BUDGET_SECS",
                MODERATION_BUDGET_SECS,
            )?),
            policy_path: get("MODERATION_POLICY_PATH").map(PathBuf::from),
            audit_log: get("MODERATION_AUDIT_LOG").map(PathBuf::from),
            database_url: get("DATABASE_URL"),
            output_dir: get("MODERATION_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
        })
    }

    pub fn load_policy(&self) -> Result<PolicyFile, ConfigError> {
        match &self.policy_path {
            Some(path) => PolicyFile::load(path),
            None => Ok(PolicyFile::default()),
        }
    }

    pub fn vision_client(&self) -> Result<VisionAnalysisClient<HttpVisionTransport>, ConfigError> {
        let transport = HttpVisionTransport::new(
            &self.vision_endpoint,
            self.vision_api_key.clone(),
            self.call_timeout,
        )?;
        Ok(VisionAnalysisClient::new(transport)
            .with_max_image_bytes(self.max_image_bytes)
            .with_call_timeout(self.call_timeout)
            .with_retry(self.retry))
    }

    /// Log sink always; JSON-lines file and Postgres when configured.
    pub async fn audit_sink(&self) -> Result<Arc<dyn AuditSink>, ConfigError> {
        let mut sink = FanoutAuditSink::new().with(Arc::new(TracingAuditSink));

        if let Some(path) = &self.audit_log {
            info!(path = %path.display(), "audit log file enabled");
            sink = sink.with(Arc::new(JsonLinesAuditSink::new(path)));
        }

        if let Some(url) = &self.database_url {
            let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
            let pg = PgAuditSink::new(pool);
            pg.setup().await?;
            info!("audit database enabled");
            sink = sink.with(Arc::new(pg));
        }

        Ok(Arc::new(sink))
    }

    pub async fn pipeline(&self) -> Result<ModerationPipeline, ConfigError> {
        let PolicyFile { policy, watermark } = self.load_policy()?;
        let audit = self.audit_sink().await?;
        info!(
            policy_version = %policy.version,
            max_concurrency = self.max_concurrency,
            budget_secs = self.budget.as_secs(),
            "moderation pipeline configured"
        );

        Ok(ModerationPipeline::builder(Arc::new(self.vision_client()?))
            .policy(policy)
            .watermark(watermark)
            .audit(audit)
            .max_concurrency(self.max_concurrency)
            .budget(self.budget)
            .build())
    }
}

fn positive<G, T>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr + PartialOrd + Default,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .ok()
            .filter(|v| *v > T::default())
            .ok_or(ConfigError::Invalid { key, value: raw }),
    }
}
