use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

use crate::error::{config_invalid, config_missing, PollcastResult};

// Default configuration values
const DEFAULT_WS_URL: &str =
    "ws://127.0.0.1:6001/app/pollcast?protocol=7&client=js&version=7.0.6&flash=false";
const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000/api";
const DEFAULT_POLL_DURATION_MINUTES: u64 = 5;
const DEFAULT_DELETE_BUFFER_SECONDS: u64 = 10;
const DEFAULT_RECONNECT_ATTEMPTS: usize = 5;
const DEFAULT_BACKOFF_BASE_SECONDS: f64 = 2.0;
const DEFAULT_JITTER_RATIO: f64 = 0.9;
const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 5;
const DEFAULT_PONG_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_CONFIG_FILE: &str = "pollcast.json";

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Backend endpoints and credentials
    #[serde(default)]
    pub backend: BackendConfig,
    /// Poll lifecycle timings
    #[serde(default)]
    pub polls: PollConfig,
    /// Reconnect policy for the realtime connection
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Backend endpoints and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Pusher-compatible WebSocket endpoint including its query string
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// Base URL of the REST API
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Bearer token for REST calls
    #[serde(default = "default_api_token")]
    pub api_token: String,
    /// Broadcaster channel id, used to build the private channel name
    #[serde(default = "default_channel_id")]
    pub channel_id: String,
}

/// Poll lifecycle timings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// How long a locally created poll runs
    #[serde(default = "default_poll_duration_minutes")]
    pub duration_minutes: u64,
    /// Wait between conclusion and the delete call so late votes land
    #[serde(default = "default_delete_buffer_seconds")]
    pub delete_buffer_seconds: u64,
}

/// Reconnect policy for the realtime connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_attempts")]
    pub max_attempts: usize,
    /// Backoff for attempt k is base^k seconds
    #[serde(default = "default_backoff_base_seconds")]
    pub backoff_base_seconds: f64,
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    /// Silence tolerated after our own ping before the socket is dropped
    #[serde(default = "default_pong_timeout_seconds")]
    pub pong_timeout_seconds: u64,
}

fn env_or<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(fallback)
}

// Default functions
fn default_ws_url() -> String {
    std::env::var("POLLCAST_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.to_string())
}

fn default_api_base_url() -> String {
    std::env::var("POLLCAST_API_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string())
}

fn default_api_token() -> String {
    std::env::var("POLLCAST_API_TOKEN").unwrap_or_default()
}

fn default_channel_id() -> String {
    std::env::var("POLLCAST_CHANNEL_ID").unwrap_or_default()
}

fn default_poll_duration_minutes() -> u64 {
    env_or("POLLCAST_POLL_DURATION_MINUTES", DEFAULT_POLL_DURATION_MINUTES)
}

fn default_delete_buffer_seconds() -> u64 {
    env_or("POLLCAST_DELETE_BUFFER_SECONDS", DEFAULT_DELETE_BUFFER_SECONDS)
}

fn default_reconnect_attempts() -> usize {
    env_or("POLLCAST_RECONNECT_ATTEMPTS", DEFAULT_RECONNECT_ATTEMPTS)
}

fn default_backoff_base_seconds() -> f64 {
    env_or("POLLCAST_BACKOFF_BASE_SECONDS", DEFAULT_BACKOFF_BASE_SECONDS)
}

fn default_jitter_ratio() -> f64 {
    env_or("POLLCAST_JITTER_RATIO", DEFAULT_JITTER_RATIO)
}

fn default_connect_timeout_seconds() -> u64 {
    env_or("POLLCAST_CONNECT_TIMEOUT_SECONDS", DEFAULT_CONNECT_TIMEOUT_SECONDS)
}

fn default_pong_timeout_seconds() -> u64 {
    env_or("POLLCAST_PONG_TIMEOUT_SECONDS", DEFAULT_PONG_TIMEOUT_SECONDS)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            polls: PollConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            api_base_url: default_api_base_url(),
            api_token: default_api_token(),
            channel_id: default_channel_id(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            duration_minutes: default_poll_duration_minutes(),
            delete_buffer_seconds: default_delete_buffer_seconds(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_reconnect_attempts(),
            backoff_base_seconds: default_backoff_base_seconds(),
            jitter_ratio: default_jitter_ratio(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
            pong_timeout_seconds: default_pong_timeout_seconds(),
        }
    }
}

impl BackendConfig {
    /// Private channel the backend broadcasts this streamer's events on
    pub fn channel_name(&self) -> String {
        format!("private-private.{}", self.channel_id)
    }
}

impl PollConfig {
    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.duration_minutes as i64)
    }

    pub fn delete_buffer(&self) -> Duration {
        Duration::from_secs(self.delete_buffer_seconds)
    }
}

impl ReconnectConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_seconds)
    }
}

impl Config {
    /// Reject values the core cannot run with
    pub fn validate(&self) -> PollcastResult<()> {
        if self.backend.channel_id.trim().is_empty() {
            return Err(config_missing("backend.channel_id"));
        }
        if self.backend.ws_url.trim().is_empty() {
            return Err(config_missing("backend.ws_url"));
        }
        if self.polls.duration_minutes == 0 {
            return Err(config_invalid(
                "polls.duration_minutes",
                "0",
                "polls must run for at least one minute",
            ));
        }
        if self.reconnect.connect_timeout_seconds == 0 {
            return Err(config_invalid(
                "reconnect.connect_timeout_seconds",
                "0",
                "connect attempts need a non-zero timeout",
            ));
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter_ratio) {
            return Err(config_invalid(
                "reconnect.jitter_ratio",
                &self.reconnect.jitter_ratio.to_string(),
                "must be between 0 and 1",
            ));
        }
        Ok(())
    }
}

/// Load the configuration from `POLLCAST_CONFIG_PATH` or the default file
pub async fn load_config() -> Result<Config> {
    let path = get_config_path();
    load_or_create_config(&path).await
}

/// Get the path to the configuration file
fn get_config_path() -> PathBuf {
    std::env::var("POLLCAST_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Load configuration from file or create default
pub async fn load_or_create_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        let default_config = Config::default();
        save_config(path, &default_config).await?;
        info!("Created default configuration at {}", path.display());
        return Ok(default_config);
    }

    let config_str = fs::read_to_string(path).await?;
    let config: Config = serde_json::from_str(&config_str)?;
    debug!("Loaded configuration from {}", path.display());

    Ok(config)
}

/// Save configuration to file
pub async fn save_config(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let config_str = serde_json::to_string_pretty(config)?;
    fs::write(path, config_str).await?;
    debug!("Saved configuration to {}", path.display());

    Ok(())
}
