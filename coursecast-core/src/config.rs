use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model::MAX_UNIT_SIZE;

/// Knobs for the delivery pipeline. Every field has a working default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Where generated artifacts (archive, archive parts) are written.
    pub work_dir: PathBuf,
    pub max_unit_size: u64,
    pub retry: RetryPolicy,
    /// Optional link embedded in the course card and chat description.
    pub logo: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("session/work"),
            max_unit_size: MAX_UNIT_SIZE,
            retry: RetryPolicy::default(),
            logo: None,
        }
    }
}

impl PipelineConfig {
    pub fn trace_loaded(&self) {
        info!(
            work_dir = %self.work_dir.display(),
            max_unit_size = self.max_unit_size,
            max_attempts = self.retry.max_attempts,
            "Loaded PipelineConfig"
        );
        debug!(?self, "PipelineConfig loaded (full debug)");
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per unit for transient failures. Rate limits do not count.
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Added on top of every server-requested wait.
    pub flood_wait_buffer: Duration,
    pub video_timeout: Duration,
    pub document_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(3),
            flood_wait_buffer: Duration::from_secs(1),
            video_timeout: Duration::from_secs(120 * 60),
            document_timeout: Duration::from_secs(60 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_bot_api_limits() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.max_unit_size, 2_147_483_648);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.retry_delay, Duration::from_secs(3));
        assert_eq!(cfg.retry.flood_wait_buffer, Duration::from_secs(1));
        assert_eq!(cfg.retry.video_timeout, Duration::from_secs(7200));
        assert_eq!(cfg.retry.document_timeout, Duration::from_secs(3600));
    }
}
