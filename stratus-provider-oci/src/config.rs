//! Provider configuration
//!
//! The `provider` block of `stratus.json`. Environment variables override the
//! file so tokens never have to be written to disk.

use std::time::Duration;

use serde::Deserialize;
use stratus_core::{Backoff, RetryPolicy};
use thiserror::Error;

pub const ENV_ENDPOINT: &str = "STRATUS_ENDPOINT";
pub const ENV_AUTH_TOKEN: &str = "STRATUS_AUTH_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no endpoint configured (set provider.endpoint or {ENV_ENDPOINT})")]
    MissingEndpoint,

    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("invalid retry settings: {0}")]
    InvalidRetry(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the control plane, without the API version
    pub endpoint: Option<String>,
    /// Path segment placed between the endpoint and every resource path
    pub api_version: String,
    /// Opaque bearer token passed through as `Authorization`
    pub auth_token: Option<String>,
    /// Per-request timeout of the HTTP client
    pub request_timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_version: "20190531".to_string(),
            auth_token: None,
            request_timeout_secs: 60,
            retry: RetryConfig::default(),
        }
    }
}

impl ProviderConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Apply `STRATUS_ENDPOINT` and `STRATUS_AUTH_TOKEN` when set
    pub fn apply_env(mut self) -> Self {
        self.apply_overrides(
            std::env::var(ENV_ENDPOINT).ok(),
            std::env::var(ENV_AUTH_TOKEN).ok(),
        );
        self
    }

    fn apply_overrides(&mut self, endpoint: Option<String>, auth_token: Option<String>) {
        if let Some(endpoint) = endpoint.filter(|e| !e.is_empty()) {
            self.endpoint = Some(endpoint);
        }
        if let Some(token) = auth_token.filter(|t| !t.is_empty()) {
            self.auth_token = Some(token);
        }
    }

    /// `{endpoint}/{api_version}` with no trailing slash
    pub fn base_url(&self) -> Result<String, ConfigError> {
        let endpoint = self
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or(ConfigError::MissingEndpoint)?;

        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: "scheme must be http or https".to_string(),
            });
        }

        let endpoint = endpoint.trim_end_matches('/');
        let version = self.api_version.trim_matches('/');
        if version.is_empty() {
            Ok(endpoint.to_string())
        } else {
            Ok(format!("{}/{}", endpoint, version))
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Backoff and not-found handling shared by every wait
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Retry 404s for a short window after an entity is created
    pub retry_not_found: bool,
    pub not_found_window_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            retry_not_found: true,
            not_found_window_secs: RetryPolicy::DEFAULT_NOT_FOUND_WINDOW.as_secs(),
        }
    }
}

impl RetryConfig {
    /// Base policy for the provider; each wait replaces `max_elapsed` with
    /// the timeout of its operation.
    pub fn to_policy(&self) -> Result<RetryPolicy, ConfigError> {
        if self.initial_delay_ms == 0 {
            return Err(ConfigError::InvalidRetry(
                "initial_delay_ms must be greater than zero".to_string(),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::InvalidRetry(format!(
                "multiplier must be at least 1.0, got {}",
                self.multiplier
            )));
        }

        let backoff = Backoff::new(
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.multiplier,
        );

        Ok(RetryPolicy::default()
            .with_backoff(backoff)
            .with_not_found_retries(self.retry_not_found)
            .with_not_found_window(Duration::from_secs(self.not_found_window_secs)))
    }
}
