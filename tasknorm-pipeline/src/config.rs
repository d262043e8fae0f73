//! Pipeline configuration
//!
//! Defines all configurable parameters for the pipeline including
//! upstream service URLs and the retry policy for their calls.

use std::time::Duration;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// TaskCluster queue base URL
    pub queue_base_url: String,

    /// Search cluster holding already-normalized records (also the sink)
    pub index_base_url: String,

    /// Mercurial server for revision metadata
    pub hg_base_url: String,

    /// Source key reported in logs and conflict warnings for this batch
    pub source_key: String,

    /// Attempts per upstream call
    pub retry_times: u32,

    /// Sleep between retried attempts
    pub retry_sleep: Duration,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - QUEUE_BASE_URL (optional, default: https://queue.taskcluster.net/v1)
    /// - INDEX_BASE_URL (optional, default: http://localhost:9200)
    /// - HG_BASE_URL (optional, default: https://hg.mozilla.org)
    /// - BATCH_SOURCE_KEY (optional, default: tc)
    /// - RETRY_TIMES (optional, default: 3)
    /// - RETRY_SLEEP_SECS (optional, default: 5)
    pub fn from_env() -> anyhow::Result<Self> {
        let queue_base_url = std::env::var("QUEUE_BASE_URL")
            .unwrap_or_else(|_| "https://queue.taskcluster.net/v1".to_string());
        let index_base_url =
            std::env::var("INDEX_BASE_URL").unwrap_or_else(|_| "http://localhost:9200".to_string());
        let hg_base_url =
            std::env::var("HG_BASE_URL").unwrap_or_else(|_| "https://hg.mozilla.org".to_string());
        let source_key =
            std::env::var("BATCH_SOURCE_KEY").unwrap_or_else(|_| "tc".to_string());

        let retry_times = std::env::var("RETRY_TIMES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(3);
        let retry_sleep = std::env::var("RETRY_SLEEP_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(5));

        Ok(Self {
            queue_base_url,
            index_base_url,
            hg_base_url,
            source_key,
            retry_times,
            retry_sleep,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, url) in [
            ("queue_base_url", &self.queue_base_url),
            ("index_base_url", &self.index_base_url),
            ("hg_base_url", &self.hg_base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("{name} must start with http:// or https://");
            }
        }

        if self.source_key.is_empty() {
            anyhow::bail!("source_key cannot be empty");
        }

        if self.retry_times == 0 {
            anyhow::bail!("retry_times must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_base_url: "https://queue.taskcluster.net/v1".to_string(),
            index_base_url: "http://localhost:9200".to_string(),
            hg_base_url: "https://hg.mozilla.org".to_string(),
            source_key: "tc".to_string(),
            retry_times: 3,
            retry_sleep: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.retry_times, 3);
        assert_eq!(config.retry_sleep, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.queue_base_url = "not-a-url".to_string();
        assert!(config.validate().is_err());

        config.queue_base_url = "https://queue.taskcluster.net/v1".to_string();
        config.source_key = String::new();
        assert!(config.validate().is_err());

        config.source_key = "tc".to_string();
        config.retry_times = 0;
        assert!(config.validate().is_err());
    }
}
