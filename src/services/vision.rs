//! Vision analysis client.
//!
//! Validates the image locally, then asks a [`VisionTransport`] for all four
//! signal types in one call. Timeouts and transient failures are retried with
//! the configured [`RetryPolicy`]; anything else, or running out of attempts,
//! becomes [`AnalysisError::Unavailable`].

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::retry::RetryPolicy;
use crate::constants::{MAX_IMAGE_BYTES, VISION_CALL_TIMEOUT_SECS};
use crate::domain::AnalysisResult;
use crate::models::ImageAsset;

/// Rejected before any network call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("image is {size} bytes, limit is {max}")]
    Oversize { size: usize, max: usize },
    #[error("image format is not jpeg, png or webp")]
    UnsupportedFormat,
    #[error("image is empty")]
    Empty,
}

/// A single failed call to the vision service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("vision call timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("vision service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed vision response: {0}")]
    Decode(String),
    #[error("vision service error {code}: {message}")]
    Service { code: i32, message: String },
}

impl TransportError {
    /// Worth another attempt: timeouts, network failures, 5xx, throttling.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Timeout | TransportError::Network(_) => true,
            TransportError::Status { status, .. } => *status >= 500 || *status == 429,
            // google.rpc codes: DEADLINE_EXCEEDED, RESOURCE_EXHAUSTED, INTERNAL, UNAVAILABLE
            TransportError::Service { code, .. } => matches!(code, 4 | 8 | 13 | 14),
            TransportError::Decode(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("invalid image: {0}")]
    Input(#[from] InputError),
    #[error("vision analysis unavailable after {attempts} attempt(s): {source}")]
    Unavailable {
        attempts: u32,
        #[source]
        source: TransportError,
    },
}

/// One round trip to a vision backend requesting SafeSearch, labels, faces and objects.
#[async_trait]
pub trait VisionTransport: Send + Sync {
    async fn annotate(&self, image: &ImageAsset) -> Result<AnalysisResult, TransportError>;
}

/// What the pipeline depends on; swap in a double for tests.
#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    /// Local checks only. Runs before the caller queues for a vision slot.
    fn validate(&self, _image: &ImageAsset) -> Result<(), InputError> {
        Ok(())
    }

    async fn analyze(&self, image: &ImageAsset) -> Result<AnalysisResult, AnalysisError>;
}

pub struct VisionAnalysisClient<T> {
    transport: T,
    max_image_bytes: usize,
    call_timeout: Duration,
    retry: RetryPolicy,
}

impl<T: VisionTransport> VisionAnalysisClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            max_image_bytes: MAX_IMAGE_BYTES,
            call_timeout: Duration::from_secs(VISION_CALL_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_max_image_bytes(mut self, max: usize) -> Self {
        self.max_image_bytes = max;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn attempt(&self, image: &ImageAsset) -> Result<AnalysisResult, TransportError> {
        match tokio::time::timeout(self.call_timeout, self.transport.annotate(image)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }
}

#[async_trait]
impl<T: VisionTransport> VisionAnalyzer for VisionAnalysisClient<T> {
    /// Fail fast on inputs the service would reject anyway.
    fn validate(&self, image: &ImageAsset) -> Result<(), InputError> {
        if image.size() == 0 {
            return Err(InputError::Empty);
        }
        if image.size() > self.max_image_bytes {
            return Err(InputError::Oversize {
                size: image.size(),
                max: self.max_image_bytes,
            });
        }
        // An unparsable header means the declared or sniffed format is wrong.
        if image.format().is_none() || image.dimensions().is_none() {
            return Err(InputError::UnsupportedFormat);
        }
        Ok(())
    }

    async fn analyze(&self, image: &ImageAsset) -> Result<AnalysisResult, AnalysisError> {
        self.validate(image)?;

        let mut attempt = 1;
        loop {
            match self.attempt(image).await {
                Ok(result) => {
                    debug!(image_id = %image.id(), attempt, "vision analysis complete");
                    return Ok(result);
                }
                Err(err) if err.is_transient() && self.retry.allows_retry_after(attempt) => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        image_id = %image.id(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "vision call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(
                        image_id = %image.id(),
                        attempt,
                        transient = err.is_transient(),
                        error = %err,
                        "vision analysis unavailable"
                    );
                    return Err(AnalysisError::Unavailable {
                        attempts: attempt,
                        source: err,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod doubles {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays scripted outcomes, then repeats the last one.
    pub struct ScriptedTransport {
        script: Mutex<VecDeque<Result<AnalysisResult, TransportError>>>,
        last: Mutex<Option<Result<AnalysisResult, TransportError>>>,
        pub calls: AtomicUsize,
    }

    impl ScriptedTransport {
        pub fn new(script: Vec<Result<AnalysisResult, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                last: Mutex::new(None),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl VisionTransport for ScriptedTransport {
        async fn annotate(&self, _image: &ImageAsset) -> Result<AnalysisResult, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            let mut last = self.last.lock().unwrap();
            match next {
                Some(outcome) => {
                    *last = Some(outcome.clone());
                    outcome
                }
                None => last
                    .clone()
                    .unwrap_or_else(|| Err(TransportError::Network("empty script".into()))),
            }
        }
    }

    /// Never answers; every call runs into the client's timeout.
    pub struct HangingTransport {
        pub calls: AtomicUsize,
    }

    impl HangingTransport {
        pub fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl VisionTransport for HangingTransport {
        async fn annotate(&self, _image: &ImageAsset) -> Result<AnalysisResult, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
            unreachable!()
        }
    }
}
