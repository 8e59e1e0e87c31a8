//! Cache settings

use crate::{ConfigError, RecallError, RecallResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default cache lifetime in minutes.
pub const DEFAULT_CACHE_DURATION_MINUTES: u64 = 15;

/// Process-wide cache options, read once when a caching repository is built.
///
/// Mirrors the two named options `cache.enabled` and `cache.duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Whether cached reads are allowed at all.
    pub enabled: bool,
    /// Lifetime of a cache entry, in minutes.
    pub duration_minutes: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_minutes: DEFAULT_CACHE_DURATION_MINUTES,
        }
    }
}

impl CacheSettings {
    /// Create settings with explicit values.
    pub fn new(enabled: bool, duration_minutes: u64) -> Self {
        Self {
            enabled,
            duration_minutes,
        }
    }

    /// Settings with caching turned off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Enable or disable caching.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the entry lifetime in minutes.
    pub fn with_duration(mut self, minutes: u64) -> Self {
        self.duration_minutes = minutes;
        self
    }

    /// Entry lifetime as a `Duration`.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.duration_minutes.saturating_mul(60))
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `RECALL_CACHE_ENABLED`: `true`/`false`/`1`/`0` (default: true)
    /// - `RECALL_CACHE_DURATION`: entry lifetime in minutes (default: 15)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            enabled: std::env::var("RECALL_CACHE_ENABLED")
                .ok()
                .and_then(|s| parse_flag(&s))
                .unwrap_or(defaults.enabled),
            duration_minutes: std::env::var("RECALL_CACHE_DURATION")
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.duration_minutes),
        }
    }

    /// Validate the settings.
    ///
    /// The duration must be positive; a zero lifetime would store entries
    /// that are already expired.
    pub fn validate(&self) -> RecallResult<()> {
        if self.duration_minutes == 0 {
            return Err(RecallError::Config(ConfigError::InvalidValue {
                field: "cache.duration".to_string(),
                value: self.duration_minutes.to_string(),
                reason: "cache.duration must be greater than 0".to_string(),
            }));
        }

        Ok(())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = CacheSettings::default();
        assert!(settings.enabled);
        assert_eq!(settings.duration_minutes, 15);
        assert_eq!(settings.ttl(), Duration::from_secs(900));
    }

    #[test]
    fn test_disabled_settings() {
        let settings = CacheSettings::disabled();
        assert!(!settings.enabled);
        assert_eq!(settings.duration_minutes, DEFAULT_CACHE_DURATION_MINUTES);
    }

    #[test]
    fn test_builder_pattern() {
        let settings = CacheSettings::default()
            .with_enabled(false)
            .with_duration(60);

        assert!(!settings.enabled);
        assert_eq!(settings.ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn test_validate_rejects_zero_duration() {
        let err = CacheSettings::default()
            .with_duration(0)
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            RecallError::Config(ConfigError::InvalidValue { .. })
        ));
        assert!(CacheSettings::default().validate().is_ok());
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" 0 "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_settings_serde_roundtrip() {
        let settings = CacheSettings::new(false, 30);
        let json = serde_json::to_string(&settings).unwrap();
        let back: CacheSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(settings, back);
    }
}
