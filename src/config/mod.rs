//! Application configuration loaded from environment.

use std::net::SocketAddr;
use std::time::Duration;

use crate::services::channel::ReconnectPolicy;
use crate::services::classifier::ClassifierSettings;

/// Application configuration loaded from `.env` and environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Relay bind address (e.g. `0.0.0.0:3000`).
    pub server_addr: SocketAddr,
    /// Key the REST backend presents on trigger endpoints (`x-app-key`).
    pub app_key: String,
    /// Secret for signing trigger request bodies (`x-signature`).
    pub app_secret: String,
    /// JWT signing secret for session tokens (min 32 chars).
    pub jwt_secret: String,
    /// Log level: `error`, `warn`, `info`, `debug`, `trace`.
    pub log_level: String,
    /// Push channel endpoint the watcher connects to.
    pub events_url: String,
    /// Base URL of the REST API (collaborator).
    pub api_base_url: String,
    /// Session token sent as the `session` cookie by clients.
    pub session_token: Option<String>,
    /// OpenAI-compatible base URL of the categorization model.
    pub classifier_url: String,
    pub classifier_api_key: Option<String>,
    pub classifier_model: String,
    /// Per-call timeout for the categorization collaborator.
    pub classify_timeout: Duration,
    pub classify_max_attempts: u32,
    /// Reconnect attempts after the push channel drops.
    pub reconnect_max_attempts: u32,
    /// Trailing window kept by the subscription registry.
    pub event_log_capacity: usize,
}

impl Config {
    /// Load configuration from environment. Call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let server_addr = std::env::var("SERVER_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let server_addr: SocketAddr = server_addr
            .parse()
            .map_err(|_| ConfigLoadError::InvalidServerAddr)?;

        let app_key = std::env::var("APP_KEY").unwrap_or_else(|_| "dashfeed_key".to_string());
        let app_secret =
            std::env::var("APP_SECRET").unwrap_or_else(|_| "dashfeed_secret".to_string());
        let jwt_secret = std::env::var("JWT_SECRET")
            .unwrap_or_else(|_| "dashfeed_jwt_secret_change_in_production_32c".to_string());
        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let events_url = std::env::var("EVENTS_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:3000/api/events".to_string());
        let api_base_url = std::env::var("API_BASE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:6969".to_string());
        let session_token = std::env::var("SESSION_TOKEN").ok().filter(|s| !s.is_empty());

        let classifier_url = std::env::var("CLASSIFIER_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let classifier_api_key = std::env::var("CLASSIFIER_API_KEY").ok().filter(|s| !s.is_empty());
        let classifier_model =
            std::env::var("CLASSIFIER_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let classify_timeout =
            Duration::from_secs(parse_var("CLASSIFY_TIMEOUT_SECS", 30u64)?);
        let classify_max_attempts = parse_var("CLASSIFY_MAX_ATTEMPTS", 3u32)?;
        let reconnect_max_attempts = parse_var("RECONNECT_MAX_ATTEMPTS", 8u32)?;
        let event_log_capacity = parse_var("EVENT_LOG_CAPACITY", 512usize)?;
        if event_log_capacity == 0 {
            return Err(ConfigLoadError::InvalidNumber("EVENT_LOG_CAPACITY"));
        }

        Ok(Self {
            server_addr,
            app_key,
            app_secret,
            jwt_secret,
            log_level,
            events_url,
            api_base_url,
            session_token,
            classifier_url,
            classifier_api_key,
            classifier_model,
            classify_timeout,
            classify_max_attempts,
            reconnect_max_attempts,
            event_log_capacity,
        })
    }

    pub fn classifier_settings(&self) -> ClassifierSettings {
        ClassifierSettings {
            timeout: self.classify_timeout,
            max_attempts: self.classify_max_attempts.max(1),
            ..ClassifierSettings::default()
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect_max_attempts,
            ..ReconnectPolicy::default()
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigLoadError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigLoadError::InvalidNumber(name)),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Invalid SERVER_ADDR")]
    InvalidServerAddr,
    #[error("Invalid value for {0}")]
    InvalidNumber(&'static str),
}
