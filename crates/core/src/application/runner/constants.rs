// Runner constants (no magic values)
use std::time::Duration;

/// Per-stage retry ceiling; a stage runs at most 1 + this many times
pub const DEFAULT_MAX_STAGE_RETRIES: u32 = 3;

/// Base retry delay, scaled linearly by attempt number
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Job type for the built-in bookmark library maintenance plan
pub const DEFAULT_JOB_TYPE: &str = "library_maintenance";
