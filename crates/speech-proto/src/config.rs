use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::platform;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// Remote text-to-speech file API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
    /// Period of the activity summary in the log.
    #[serde(default = "default_summary_interval_secs")]
    pub summary_interval_secs: u64,
    /// Delay between successive enqueues of one poll's new files.
    #[serde(default = "default_enqueue_stagger_ms")]
    pub enqueue_stagger_ms: u64,
    /// Treat the first listing as already heard instead of speaking the backlog.
    #[serde(default = "default_skip_initial_snapshot")]
    pub skip_initial_snapshot: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_playback_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_volume")]
    pub volume: f32,
    /// Open the playback gate at startup instead of waiting for
    /// `POST /api/authorize`.
    #[serde(default)]
    pub authorize_on_start: bool,
    /// Download each file (with retries) before handing it to mpv.
    #[serde(default)]
    pub prefetch: bool,
    #[serde(default = "default_prefetch_attempts")]
    pub prefetch_attempts: u32,
    #[serde(default = "default_prefetch_timeout_secs")]
    pub prefetch_timeout_secs: u64,
    #[serde(default = "default_prefetch_backoff_ms")]
    pub prefetch_backoff_ms: u64,
    /// Explicit mpv binary.  When unset the usual lookup applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mpv_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval_secs(),
            summary_interval_secs: default_summary_interval_secs(),
            enqueue_stagger_ms: default_enqueue_stagger_ms(),
            skip_initial_snapshot: default_skip_initial_snapshot(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_playback_timeout_secs(),
            volume: default_volume(),
            authorize_on_start: false,
            prefetch: false,
            prefetch_attempts: default_prefetch_attempts(),
            prefetch_timeout_secs: default_prefetch_timeout_secs(),
            prefetch_backoff_ms: default_prefetch_backoff_ms(),
            mpv_path: None,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

fn default_base_url() -> String {
    "https://duc-speacker-tts.onrender.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_summary_interval_secs() -> u64 {
    60
}

fn default_enqueue_stagger_ms() -> u64 {
    50
}

fn default_skip_initial_snapshot() -> bool {
    true
}

fn default_playback_timeout_secs() -> u64 {
    30
}

fn default_volume() -> f32 {
    1.0
}

fn default_prefetch_attempts() -> u32 {
    3
}

fn default_prefetch_timeout_secs() -> u64 {
    10
}

fn default_prefetch_backoff_ms() -> u64 {
    1000
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn summary_interval(&self) -> Duration {
        Duration::from_secs(self.summary_interval_secs.max(1))
    }

    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.enqueue_stagger_ms)
    }
}

impl PlaybackConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.prefetch_attempts.max(1),
            attempt_timeout: Duration::from_secs(self.prefetch_timeout_secs.max(1)),
            backoff_step: Duration::from_millis(self.prefetch_backoff_ms),
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

impl Config {
    /// Load the default config file, writing one with defaults if absent.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save_to(&config_path)?;
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    /// Load an explicit config file.  It must exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.polling.interval(), Duration::from_secs(10));
        assert_eq!(config.polling.summary_interval(), Duration::from_secs(60));
        assert_eq!(config.polling.stagger(), Duration::from_millis(50));
        assert!(config.polling.skip_initial_snapshot);
        assert_eq!(config.playback.timeout(), Duration::from_secs(30));
        assert!(!config.playback.authorize_on_start);
        assert!(config.http.enabled);
        assert_eq!(config.http.port, 8990);
        assert!(config.api.base_url.starts_with("https://"));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let policy = PlaybackConfig::default().retry_policy();
        assert_eq!(policy, RetryPolicy::default());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [api]
            base_url = "http://localhost:5000"

            [playback]
            authorize_on_start = true
            "#,
        )
        .unwrap();
        assert_eq!(config.api.base_url, "http://localhost:5000");
        assert_eq!(config.api.request_timeout_secs, 15);
        assert!(config.playback.authorize_on_start);
        assert_eq!(config.playback.timeout_secs, 30);
        assert_eq!(config.polling.interval_secs, 10);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.http.port = 9100;
        config.playback.prefetch = true;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.http.port, 9100);
        assert!(loaded.playback.prefetch);
    }
}
