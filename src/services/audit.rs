//! Audit log collaborators.
//!
//! The pipeline hands every terminal decision to an [`AuditSink`]. Sinks are
//! append-only; querying the log is left to the admin side of the system.

use async_trait::async_trait;
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::domain::AuditRecord;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit log io error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("audit record serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("audit database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

/// Writes records to the structured log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        info!(
            image_id = %record.image_id,
            property_id = %record.property_id,
            uploader_id = %record.uploader_id,
            verdict = %record.verdict,
            rules = ?record.triggered_rules,
            policy_version = %record.policy_version,
            "moderation audit"
        );
        Ok(())
    }
}

/// Keeps records in memory, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record.clone());
        Ok(())
    }
}

/// One JSON object per line, appended to a file.
#[derive(Debug)]
pub struct JsonLinesAuditSink {
    path: PathBuf,
    // Serialises writers so lines from concurrent submissions never interleave.
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonLinesAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> AuditError {
        AuditError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl AuditSink for JsonLinesAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.io_error(e))?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        file.write_all(&line).await.map_err(|e| self.io_error(e))?;
        file.flush().await.map_err(|e| self.io_error(e))?;
        Ok(())
    }
}

/// Appends to the `image_moderation_audit` table owned by the admin system.
#[derive(Debug, Clone)]
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the audit table if it does not exist yet.
    pub async fn setup(&self) -> Result<(), AuditError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS image_moderation_audit (
                id BIGSERIAL PRIMARY KEY,
                image_id TEXT NOT NULL,
                property_id TEXT NOT NULL,
                uploader_id TEXT NOT NULL,
                verdict TEXT NOT NULL,
                triggered_rules JSONB NOT NULL,
                policy_version TEXT NOT NULL,
                transitions JSONB NOT NULL,
                received_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        sqlx::query(
            r#"
            INSERT INTO image_moderation_audit
                (image_id, property_id, uploader_id, verdict, triggered_rules,
                 policy_version, transitions, received_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&record.image_id)
        .bind(&record.property_id)
        .bind(&record.uploader_id)
        .bind(record.verdict.as_str())
        .bind(sqlx::types::Json(&record.triggered_rules))
        .bind(&record.policy_version)
        .bind(sqlx::types::Json(&record.transitions))
        .bind(record.received_at())
        .bind(record.completed_at())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Writes every record to each sink; reports the first failure after trying all.
#[derive(Default, Clone)]
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl AuditSink for FanoutAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.append(record).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PipelineState, Transition, Verdict};
    use chrono::Utc;

    fn record(image_id: &str) -> AuditRecord {
        AuditRecord {
            image_id: image_id.into(),
            property_id: "prop-1".into(),
            uploader_id: "user-9".into(),
            verdict: Verdict::Approved,
            triggered_rules: vec![],
            policy_version: "v1".into(),
            transitions: vec![Transition {
                state: PipelineState::Received,
                at: Utc::now(),
                reason: None,
            }],
        }
    }

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn append(&self, _record: &AuditRecord) -> Result<(), AuditError> {
            Err(AuditError::Io {
                path: "nowhere".into(),
                source: std::io::Error::other("disk full"),
            })
        }
    }

    #[tokio::test]
    async fn test_json_lines_appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit").join("moderation.jsonl");
        let sink = JsonLinesAuditSink::new(&path);

        sink.append(&record("a")).await.unwrap();
        sink.append(&record("b")).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: AuditRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.image_id, "b");
        assert_eq!(parsed.transitions.len(), 1);
    }

    #[tokio::test]
    async fn test_json_lines_concurrent_writers_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(JsonLinesAuditSink::new(dir.path().join("audit.jsonl")));

        let writes = (0..25).map(|i| {
            let sink = sink.clone();
            async move { sink.append(&record(&format!("img-{}", i))).await }
        });
        for result in futures::future::join_all(writes).await {
            result.unwrap();
        }

        let contents = tokio::fs::read_to_string(sink.path()).await.unwrap();
        let parsed: Vec<AuditRecord> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(parsed.len(), 25);
    }

    #[tokio::test]
    async fn test_fanout_reaches_every_sink_despite_failure() {
        let memory = Arc::new(MemoryAuditSink::new());
        let fanout = FanoutAuditSink::new()
            .with(Arc::new(FailingSink))
            .with(memory.clone())
            .with(Arc::new(TracingAuditSink));

        let err = fanout.append(&record("x")).await.unwrap_err();
        assert!(matches!(err, AuditError::Io { .. }));
        assert_eq!(memory.len(), 1);
        assert_eq!(fanout.len(), 3);
    }
}
