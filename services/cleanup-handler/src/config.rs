//! Configuration for the cleanup handler.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use reaper_retry::{
    PollPolicy, RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_DEADLINE, DEFAULT_POLL_INTERVAL,
    DEFAULT_RETRY_BACKOFF,
};

use crate::error::InvocationError;

/// How the teardown sequence treats the kubectl-driven graceful path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanupMode {
    /// Graceful when kubectl resolves, direct termination otherwise.
    #[default]
    Auto,
    /// kubectl is required; its absence is the one FAILED outcome.
    Graceful,
    /// Skip kubectl entirely and force-terminate instances.
    Direct,
}

impl FromStr for CleanupMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "graceful" => Ok(Self::Graceful),
            "direct" => Ok(Self::Direct),
            other => Err(format!("unknown cleanup mode: {other}")),
        }
    }
}

impl std::fmt::Display for CleanupMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::Graceful => "graceful",
            Self::Direct => "direct",
        };
        f.write_str(s)
    }
}

/// Handler configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Teardown mode.
    pub mode: CleanupMode,

    /// Path to the kubectl binary.
    pub kubectl_path: PathBuf,

    /// Directory for the generated kubeconfig.
    pub scratch_dir: PathBuf,

    /// Ambient region, used when the event carries none.
    pub default_region: Option<String>,

    /// Sleep between instance polls.
    pub poll_interval: Duration,

    /// Overall bound on the instance wait.
    pub wait_timeout: Duration,

    /// Sleep between profile-delete attempts on conflict.
    pub retry_backoff: Duration,

    /// Total profile-delete attempts, including the first.
    pub max_retries: u32,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let mode = std::env::var("REAPER_CLEANUP_MODE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();

        let kubectl_path = std::env::var("REAPER_KUBECTL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/opt/kubectl"));

        let scratch_dir = std::env::var("REAPER_SCRATCH_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"));

        let default_region = std::env::var("AWS_REGION")
            .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
            .ok()
            .filter(|r| !r.is_empty());

        let poll_interval = env_secs("REAPER_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL);
        let wait_timeout = env_secs("REAPER_WAIT_TIMEOUT_SECS", DEFAULT_POLL_DEADLINE);
        let retry_backoff = env_secs("REAPER_RETRY_BACKOFF_SECS", DEFAULT_RETRY_BACKOFF);

        let max_retries = std::env::var("REAPER_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_ATTEMPTS);

        let log_level = std::env::var("REAPER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            mode,
            kubectl_path,
            scratch_dir,
            default_region,
            poll_interval,
            wait_timeout,
            retry_backoff,
            max_retries,
            log_level,
        })
    }

    /// Region for one invocation: the event property wins, then the
    /// ambient environment; neither present is a configuration error.
    pub fn resolve_region(&self, event_region: Option<&str>) -> Result<String, InvocationError> {
        event_region
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .or_else(|| self.default_region.clone())
            .ok_or(InvocationError::RegionMissing)
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(self.poll_interval, self.wait_timeout)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_backoff, self.max_retries)
    }
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn config_with_region(region: Option<&str>) -> Config {
        Config {
            mode: CleanupMode::Auto,
            kubectl_path: PathBuf::from("/opt/kubectl"),
            scratch_dir: PathBuf::from("/tmp"),
            default_region: region.map(str::to_string),
            poll_interval: DEFAULT_POLL_INTERVAL,
            wait_timeout: DEFAULT_POLL_DEADLINE,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            max_retries: DEFAULT_MAX_ATTEMPTS,
            log_level: "info".to_string(),
        }
    }

    #[rstest]
    #[case("auto", CleanupMode::Auto)]
    #[case("Graceful", CleanupMode::Graceful)]
    #[case("DIRECT", CleanupMode::Direct)]
    fn parses_cleanup_modes(#[case] input: &str, #[case] expected: CleanupMode) {
        assert_eq!(input.parse::<CleanupMode>().unwrap(), expected);
    }

    #[test]
    fn rejects_unknown_mode() {
        assert!("yolo".parse::<CleanupMode>().is_err());
    }

    #[test]
    fn event_region_takes_precedence() {
        let config = config_with_region(Some("eu-west-1"));
        assert_eq!(
            config.resolve_region(Some("us-east-2")).unwrap(),
            "us-east-2"
        );
        assert_eq!(config.resolve_region(None).unwrap(), "eu-west-1");
        assert_eq!(config.resolve_region(Some("")).unwrap(), "eu-west-1");
    }

    #[test]
    fn missing_region_everywhere_is_a_configuration_error() {
        let config = config_with_region(None);
        assert!(matches!(
            config.resolve_region(None),
            Err(InvocationError::RegionMissing)
        ));
    }

    #[test]
    fn policies_carry_the_configured_timing() {
        let mut config = config_with_region(None);
        config.poll_interval = Duration::from_secs(5);
        config.wait_timeout = Duration::from_secs(60);
        config.retry_backoff = Duration::from_secs(20);
        config.max_retries = 3;

        let poll = config.poll_policy();
        assert_eq!(poll.interval, Duration::from_secs(5));
        assert_eq!(poll.deadline, Duration::from_secs(60));

        let retry = config.retry_policy();
        assert_eq!(retry.backoff, Duration::from_secs(20));
        assert_eq!(retry.max_attempts, 3);
    }
}
