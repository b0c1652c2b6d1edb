//! Dashboard configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file is a valid
//! configuration pointing at `http://localhost:8080/api` with one line `L1`.
//! Durations are integer milliseconds (`*_ms`).

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// REST API settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    /// Base URL every path is joined onto
    pub base_url: String,
    /// Path substrings whose 401 must not log the user out
    pub auth_ignore_paths: Vec<String>,
    /// Request timeout; `None` keeps the HTTP stack default
    pub timeout_ms: Option<u64>,
    /// File the bearer token is persisted in; `None` keeps it in memory
    pub token_store: Option<PathBuf>,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            auth_ignore_paths: vec!["/auth/login".to_string()],
            timeout_ms: None,
            token_store: None,
        }
    }
}

impl ApiSection {
    /// Request timeout
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Poller schedules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSection {
    /// Production counters and machine status
    pub production_interval_ms: u64,
    /// Status timeline
    pub timeline_interval_ms: u64,
    /// OEE recompute while the OEE view is open
    pub oee_interval_ms: u64,
    /// Wall clock ticker
    pub clock_interval_ms: u64,
    /// Consecutive failures that suspend a poller
    pub max_consecutive_errors: u32,
    /// Skip production polls while the window is hidden or unfocused
    pub pause_when_hidden: bool,
}

impl Default for PollingSection {
    fn default() -> Self {
        Self {
            production_interval_ms: 5_000,
            timeline_interval_ms: 30_000,
            oee_interval_ms: 60_000,
            clock_interval_ms: 1_000,
            max_consecutive_errors: 3,
            pause_when_hidden: true,
        }
    }
}

impl PollingSection {
    /// Production poll interval
    #[inline]
    #[must_use]
    pub fn production_interval(&self) -> Duration {
        Duration::from_millis(self.production_interval_ms)
    }

    /// Timeline poll interval
    #[inline]
    #[must_use]
    pub fn timeline_interval(&self) -> Duration {
        Duration::from_millis(self.timeline_interval_ms)
    }

    /// OEE poll interval
    #[inline]
    #[must_use]
    pub fn oee_interval(&self) -> Duration {
        Duration::from_millis(self.oee_interval_ms)
    }

    /// Clock tick interval
    #[inline]
    #[must_use]
    pub fn clock_interval(&self) -> Duration {
        Duration::from_millis(self.clock_interval_ms)
    }
}

/// Cache windows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Freshness of timeline results
    pub timeline_ttl_ms: u64,
    /// Freshness of OEE history results
    pub oee_history_ttl_ms: u64,
    /// Identical requests inside this window are not re-issued
    pub debounce_ms: u64,
    /// Keys kept per cache
    pub max_entries: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            timeline_ttl_ms: 30_000,
            oee_history_ttl_ms: 300_000,
            debounce_ms: 1_000,
            max_entries: 256,
        }
    }
}

impl CacheSection {
    /// Timeline TTL
    #[inline]
    #[must_use]
    pub fn timeline_ttl(&self) -> Duration {
        Duration::from_millis(self.timeline_ttl_ms)
    }

    /// OEE history TTL
    #[inline]
    #[must_use]
    pub fn oee_history_ttl(&self) -> Duration {
        Duration::from_millis(self.oee_history_ttl_ms)
    }

    /// Debounce window
    #[inline]
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Full dashboard configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Lines shown on the timeline; the first is the controlled line
    pub lines: Vec<String>,
    /// How far back the timeline reaches
    pub timeline_window_hours: u32,
    /// REST API
    pub api: ApiSection,
    /// Poller schedules
    pub polling: PollingSection,
    /// Cache windows
    pub cache: CacheSection,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            lines: vec!["L1".to_string()],
            timeline_window_hours: 8,
            api: ApiSection::default(),
            polling: PollingSection::default(),
            cache: CacheSection::default(),
        }
    }
}

impl DashboardConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML
    ///
    /// # Errors
    /// Fails on malformed TOML or unknown value types.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML file
    ///
    /// # Errors
    /// Fails if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Serialize to TOML
    ///
    /// # Errors
    /// Fails only if a value cannot be represented in TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Reject configurations the dashboard cannot run with
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("api.base_url is empty".to_string()));
        }
        if self.lines.is_empty() {
            return Err(ConfigError::Invalid("lines is empty".to_string()));
        }
        if let Some(line) = self.lines.iter().find(|l| l.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("blank line id {line:?}")));
        }
        let intervals = [
            ("polling.production_interval_ms", self.polling.production_interval_ms),
            ("polling.timeline_interval_ms", self.polling.timeline_interval_ms),
            ("polling.oee_interval_ms", self.polling.oee_interval_ms),
            ("polling.clock_interval_ms", self.polling.clock_interval_ms),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, ms)| *ms == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be positive")));
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid("cache.max_entries must be positive".to_string()));
        }
        if self.timeline_window_hours == 0 {
            return Err(ConfigError::Invalid("timeline_window_hours must be positive".to_string()));
        }
        Ok(())
    }

    /// Line controlled by the operator
    #[must_use]
    pub fn primary_line(&self) -> Option<&str> {
        self.lines.first().map(String::as_str)
    }

    /// With base URL
    #[inline]
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api.base_url = base_url.into();
        self
    }

    /// With lines
    #[inline]
    #[must_use]
    pub fn with_lines(mut self, lines: Vec<String>) -> Self {
        self.lines = lines;
        self
    }

    /// With poller schedules
    #[inline]
    #[must_use]
    pub fn with_polling(mut self, polling: PollingSection) -> Self {
        self.polling = polling;
        self
    }

    /// With cache windows
    #[inline]
    #[must_use]
    pub fn with_cache(mut self, cache: CacheSection) -> Self {
        self.cache = cache;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_file_uses_defaults() {
        let config = DashboardConfig::from_toml_str("").unwrap();
        assert_eq!(config, DashboardConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config = DashboardConfig::from_toml_str(
            r#"
            lines = ["L2", "L7"]
            timeline_window_hours = 12

            [api]
            base_url = "http://mes.plant.local/api"
            timeout_ms = 15000

            [polling]
            production_interval_ms = 2000
            pause_when_hidden = false
            "#,
        )
        .unwrap();

        assert_eq!(config.primary_line(), Some("L2"));
        assert_eq!(config.api.timeout(), Some(Duration::from_secs(15)));
        assert_eq!(config.polling.production_interval(), Duration::from_secs(2));
        assert_eq!(config.polling.timeline_interval(), Duration::from_secs(30));
        assert!(!config.polling.pause_when_hidden);
        assert_eq!(config.cache, CacheSection::default());
        assert_eq!(config.api.auth_ignore_paths, vec!["/auth/login".to_string()]);
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let mut config = DashboardConfig::default();
        config.polling.clock_interval_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("polling.clock_interval_ms"));
    }

    #[test]
    fn validate_rejects_empty_lines_and_url() {
        let config = DashboardConfig::default().with_lines(Vec::new());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = DashboardConfig::default().with_base_url("  ");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            DashboardConfig::from_toml_str("lines = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_and_serialize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dashboard.toml");
        let config = DashboardConfig::default().with_lines(vec!["L3".to_string()]);
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        assert_eq!(DashboardConfig::load(&path).unwrap(), config);
        assert!(matches!(
            DashboardConfig::load(dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
