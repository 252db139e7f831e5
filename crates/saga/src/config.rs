//! Orchestrator configuration loaded from environment variables.

use std::time::Duration;

/// Orchestrator settings with sensible defaults.
///
/// Reads from environment variables:
/// - `SAGA_CLEANUP_INTERVAL_SECS`: period of the eviction sweep (default: `60`)
/// - `SAGA_STATS_REFRESH_INTERVAL_SECS`: period of the statistics refresh (default: `30`)
/// - `SAGA_CONTEXT_RETENTION_SECS`: how long terminal contexts are kept (default: `86400`)
/// - `SAGA_RECORD_LATE_RESULTS`: keep outcomes of steps that finish after a
///   cancellation (default: `false`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub cleanup_interval: Duration,
    pub statistics_refresh_interval: Duration,
    pub context_retention: Duration,
    pub record_late_results: bool,
}

impl OrchestratorConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// missing or unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Self {
            cleanup_interval: secs("SAGA_CLEANUP_INTERVAL_SECS", defaults.cleanup_interval),
            statistics_refresh_interval: secs(
                "SAGA_STATS_REFRESH_INTERVAL_SECS",
                defaults.statistics_refresh_interval,
            ),
            context_retention: secs("SAGA_CONTEXT_RETENTION_SECS", defaults.context_retention),
            record_late_results: lookup("SAGA_RECORD_LATE_RESULTS")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.record_late_results),
        }
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn with_statistics_refresh_interval(mut self, interval: Duration) -> Self {
        self.statistics_refresh_interval = interval;
        self
    }

    pub fn with_context_retention(mut self, retention: Duration) -> Self {
        self.context_retention = retention;
        self
    }

    pub fn with_record_late_results(mut self, record: bool) -> Self {
        self.record_late_results = record;
        self
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(60),
            statistics_refresh_interval: Duration::from_secs(30),
            context_retention: Duration::from_secs(24 * 60 * 60),
            record_late_results: false,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.cleanup_interval, Duration::from_secs(60));
        assert_eq!(config.statistics_refresh_interval, Duration::from_secs(30));
        assert_eq!(config.context_retention, Duration::from_secs(86_400));
        assert!(!config.record_late_results);
    }

    #[test]
    fn test_overrides_from_lookup() {
        let config = OrchestratorConfig::from_lookup(lookup(&[
            ("SAGA_CLEANUP_INTERVAL_SECS", "5"),
            ("SAGA_STATS_REFRESH_INTERVAL_SECS", " 7 "),
            ("SAGA_CONTEXT_RETENTION_SECS", "3600"),
            ("SAGA_RECORD_LATE_RESULTS", "TRUE"),
        ]));
        assert_eq!(config.cleanup_interval, Duration::from_secs(5));
        assert_eq!(config.statistics_refresh_interval, Duration::from_secs(7));
        assert_eq!(config.context_retention, Duration::from_secs(3600));
        assert!(config.record_late_results);
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let config = OrchestratorConfig::from_lookup(lookup(&[
            ("SAGA_CLEANUP_INTERVAL_SECS", "soon"),
            ("SAGA_RECORD_LATE_RESULTS", "maybe"),
        ]));
        assert_eq!(config, OrchestratorConfig::default());
    }

    #[test]
    fn test_builders() {
        let config = OrchestratorConfig::default()
            .with_cleanup_interval(Duration::from_millis(10))
            .with_context_retention(Duration::ZERO)
            .with_record_late_results(true);
        assert_eq!(config.cleanup_interval, Duration::from_millis(10));
        assert_eq!(config.context_retention, Duration::ZERO);
        assert!(config.record_late_results);
    }
}
