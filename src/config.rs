use serde::{Deserialize, Deserializer};
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

use crate::models::{TestConfig, TestMode, TrafficType, UserAgentType};

/// Upper bound on requests per test
pub const MAX_REQUESTS: u32 = 10_000;

/// Upper bound on test duration in seconds
pub const MAX_DURATION_SECS: u32 = 3_600;

/// A test configuration that cannot be run
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("target_url is required")]
    MissingTargetUrl,
    #[error("target_url is not a valid URL: {0}")]
    InvalidTargetUrl(String),
    #[error("total_requests must be greater than 0")]
    NoRequests,
    #[error("total_requests cannot exceed 10000 (safety limit)")]
    TooManyRequests,
    #[error("duration must be greater than 0")]
    NoDuration,
    #[error("duration cannot exceed 3600 seconds (1 hour)")]
    DurationTooLong,
    #[error("traffic_type must be 'normal' or 'attack', got '{0}'")]
    TrafficType(String),
    #[error("test_mode must be 'baseline' or 'burst', got '{0}'")]
    TestMode(String),
    #[error("user_agent_type must be 'legitimate' or 'scanner', got '{0}'")]
    UserAgentType(String),
}

impl FromStr for TrafficType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "normal" => Ok(Self::Normal),
            "attack" => Ok(Self::Attack),
            other => Err(ConfigError::TrafficType(other.to_string())),
        }
    }
}

impl FromStr for TestMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "baseline" => Ok(Self::Baseline),
            "burst" => Ok(Self::Burst),
            other => Err(ConfigError::TestMode(other.to_string())),
        }
    }
}

impl FromStr for UserAgentType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "legitimate" => Ok(Self::Legitimate),
            "scanner" => Ok(Self::Scanner),
            other => Err(ConfigError::UserAgentType(other.to_string())),
        }
    }
}

impl TestConfig {
    /// Create a configuration with the required fields and defaults for the rest
    pub fn new(target_url: impl Into<String>, total_requests: u32, duration: u32) -> Self {
        Self {
            target_url: target_url.into(),
            total_requests,
            duration,
            http_method: "GET".to_string(),
            ..Default::default()
        }
    }

    /// Check the configuration and fill in defaults.
    ///
    /// Must pass before a session starts; a session never re-validates.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        self.target_url = self.target_url.trim().to_string();
        if self.target_url.is_empty() {
            return Err(ConfigError::MissingTargetUrl);
        }
        Url::parse(&self.target_url)
            .map_err(|e| ConfigError::InvalidTargetUrl(e.to_string()))?;

        if self.total_requests == 0 {
            return Err(ConfigError::NoRequests);
        }
        if self.total_requests > MAX_REQUESTS {
            return Err(ConfigError::TooManyRequests);
        }
        if self.duration == 0 {
            return Err(ConfigError::NoDuration);
        }
        if self.duration > MAX_DURATION_SECS {
            return Err(ConfigError::DurationTooLong);
        }

        let method = self.http_method.trim().to_ascii_uppercase();
        self.http_method = if method.is_empty() { "GET".to_string() } else { method };

        if self
            .custom_user_agent
            .as_deref()
            .is_some_and(|ua| ua.trim().is_empty())
        {
            self.custom_user_agent = None;
        }

        Ok(self)
    }

    /// Whether GET-style query injection applies
    pub fn is_get(&self) -> bool {
        self.http_method.is_empty() || self.http_method.eq_ignore_ascii_case("GET")
    }
}

/// Deserialize a string field, treating "" as the type's default
pub(crate) fn empty_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Default,
    T::Err: Display,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(T::default()),
        Some(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Deserialize an optional string field, treating "" as absent
pub(crate) fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}
