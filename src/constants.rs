//! Application constants

/// Maximum accepted image size before any external call (20 MiB)
pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// Per-call timeout for the vision service in seconds
pub const VISION_CALL_TIMEOUT_SECS: u64 = 10;

/// Attempts per image, including the first call
pub const VISION_MAX_ATTEMPTS: u32 = 3;

/// First backoff delay in milliseconds; doubles per retry
pub const VISION_BACKOFF_BASE_MS: u64 = 500;

/// Upper bound for a single backoff delay in milliseconds
pub const VISION_BACKOFF_MAX_MS: u64 = 4_000;

/// Process-wide cap on concurrent outbound vision calls
pub const DEFAULT_VISION_CONCURRENCY: usize = 4;

/// Total time one submission may spend analysing, retries included
pub const MODERATION_BUDGET_SECS: u64 = 35;

/// Google Cloud Vision batch annotate endpoint
pub const DEFAULT_VISION_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";

/// Brand text stamped on approved listing photos
pub const DEFAULT_WATERMARK_TEXT: &str = "360Coordinates";

/// Version tag for the built-in policy
pub const DEFAULT_POLICY_VERSION: &str = "builtin-1";
