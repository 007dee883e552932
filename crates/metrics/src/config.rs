//! Typed settings for the metrics facade.
//!
//! Key names and defaults follow the `metrics` block of the host
//! application's config file. Loading is a pure translation with no
//! side effects; a present `graphiteReporter` block missing `host` or
//! `port`, or an unparsable period, is a [`ConfigError`].

use {
    crate::error::ConfigError,
    serde::Deserialize,
    std::{fs, path::Path, time::Duration},
};

/// Unit in which exported rates or durations are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Length of one unit in seconds.
    #[must_use]
    pub fn as_secs(self) -> f64 {
        match self {
            Self::Nanoseconds => 1e-9,
            Self::Microseconds => 1e-6,
            Self::Milliseconds => 1e-3,
            Self::Seconds => 1.0,
            Self::Minutes => 60.0,
            Self::Hours => 3_600.0,
            Self::Days => 86_400.0,
        }
    }

    /// A duration of `count` of this unit.
    #[must_use]
    pub fn duration(self, count: u64) -> Duration {
        Duration::from_secs_f64(self.as_secs() * count as f64)
    }
}

/// Wire protocol used to reach the Graphite endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GraphiteProtocol {
    /// Plaintext protocol over a TCP stream.
    Tcp,
    /// Plaintext protocol in UDP datagrams.
    Udp,
    /// Batched pickle protocol over TCP.
    #[default]
    Pickle,
}

/// The export period, either a duration string ("500ms", "10s") or a
/// bare count interpreted in `periodUnit`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum PeriodValue {
    Count(u64),
    Text(String),
}

/// Settings of the periodic Graphite exporter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GraphiteReporterConfig {
    /// Prefix applied to every name sent to Graphite, on top of the
    /// names already in the registry.
    #[serde(default)]
    pub prefix: Option<String>,
    /// Wire protocol variant.
    #[serde(rename = "type", default)]
    pub protocol: GraphiteProtocol,
    #[serde(default)]
    period: Option<PeriodValue>,
    #[serde(default = "TimeUnit::seconds")]
    period_unit: TimeUnit,
    /// Graphite endpoint host. Required when the block is present.
    pub host: String,
    /// Graphite endpoint port. Required when the block is present.
    pub port: u16,
    /// Frame size for the pickle protocol; 100 when unset.
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Unit rates are converted to at export time.
    #[serde(default = "TimeUnit::seconds")]
    pub rate_unit: TimeUnit,
    /// Unit durations are converted to at export time.
    #[serde(default = "TimeUnit::milliseconds")]
    pub duration_unit: TimeUnit,
}

impl TimeUnit {
    fn seconds() -> Self {
        Self::Seconds
    }

    fn milliseconds() -> Self {
        Self::Milliseconds
    }
}

impl GraphiteReporterConfig {
    /// Export cadence. 10 seconds when not configured.
    pub fn period(&self) -> Result<Duration, ConfigError> {
        match &self.period {
            None => Ok(Duration::from_secs(10)),
            Some(PeriodValue::Count(count)) => Ok(self.period_unit.duration(*count)),
            Some(PeriodValue::Text(text)) => {
                humantime::parse_duration(text).map_err(|e| ConfigError::InvalidPeriod {
                    value: text.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Returns a copy with the given exporter prefix.
    #[must_use]
    pub fn with_prefix(&self, prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..self.clone()
        }
    }
}

/// Root settings of the metrics facade, one instance per application
/// start, immutable once loaded.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct MetricsConfig {
    /// Namespacing root for every registered metric name.
    pub prefix: String,
    /// Enable the circuit-breaker gauge sets.
    pub enable_circuit_breaker: bool,
    /// Enable the runtime introspection gauge sets.
    #[serde(rename = "enableJVM")]
    pub enable_jvm: bool,
    /// Enable connection-pool metrics.
    pub enable_hikari: bool,
    /// Enable the secondary-datastore exporter.
    pub enable_cassandra: bool,
    /// Settings of the Graphite exporter; absent disables export.
    pub graphite_reporter: Option<GraphiteReporterConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigRoot {
    metrics: MetricsConfig,
}

impl MetricsConfig {
    /// Parses the `metrics` block out of a TOML document.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let root: ConfigRoot = toml::from_str(toml)?;
        root.metrics.validate()?;
        Ok(root.metrics)
    }

    /// Loads the config file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(graphite) = &self.graphite_reporter {
            graphite.period()?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MetricsConfig::from_toml_str("").unwrap();
        assert_eq!(config.prefix, "");
        assert!(!config.enable_circuit_breaker);
        assert!(!config.enable_jvm);
        assert!(!config.enable_hikari);
        assert!(!config.enable_cassandra);
        assert!(config.graphite_reporter.is_none());
    }

    #[test]
    fn test_enable_flags() {
        let config = MetricsConfig::from_toml_str(
            r#"
            [metrics]
            enableJVM = true
            enableCircuitBreaker = true
            enableHikari = true
            enableCassandra = true
            "#,
        )
        .unwrap();
        assert!(config.enable_jvm);
        assert!(config.enable_circuit_breaker);
        assert!(config.enable_hikari);
        assert!(config.enable_cassandra);
    }

    #[test]
    fn test_minimal_graphite_reporter() {
        let config = MetricsConfig::from_toml_str(
            r#"
            [metrics.graphiteReporter]
            host = "localhost"
            port = 1000
            "#,
        )
        .unwrap();
        let graphite = config.graphite_reporter.unwrap();
        assert_eq!(graphite.prefix, None);
        assert_eq!(graphite.protocol, GraphiteProtocol::Pickle);
        assert_eq!(graphite.host, "localhost");
        assert_eq!(graphite.port, 1000);
        assert_eq!(graphite.batch_size, None);
        assert_eq!(graphite.rate_unit, TimeUnit::Seconds);
        assert_eq!(graphite.duration_unit, TimeUnit::Milliseconds);
        assert_eq!(graphite.period().unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn test_full_graphite_reporter() {
        let config = MetricsConfig::from_toml_str(
            r#"
            [metrics.graphiteReporter]
            prefix = "prefix"
            type = "TCP"
            period = "500ms"
            host = "localhost"
            port = 1000
            batchSize = 1000
            rateUnit = "MILLISECONDS"
            durationUnit = "SECONDS"
            "#,
        )
        .unwrap();
        let graphite = config.graphite_reporter.unwrap();
        assert_eq!(graphite.prefix.as_deref(), Some("prefix"));
        assert_eq!(graphite.protocol, GraphiteProtocol::Tcp);
        assert_eq!(graphite.period().unwrap(), Duration::from_millis(500));
        assert_eq!(graphite.batch_size, Some(1000));
        assert_eq!(graphite.rate_unit, TimeUnit::Milliseconds);
        assert_eq!(graphite.duration_unit, TimeUnit::Seconds);
    }

    #[test]
    fn test_period_as_count_with_unit() {
        let config = MetricsConfig::from_toml_str(
            r#"
            [metrics.graphiteReporter]
            host = "localhost"
            port = 2003
            period = 2
            periodUnit = "MINUTES"
            "#,
        )
        .unwrap();
        let graphite = config.graphite_reporter.unwrap();
        assert_eq!(graphite.period().unwrap(), Duration::from_secs(120));
    }

    #[test]
    fn test_missing_host_is_an_error() {
        let result = MetricsConfig::from_toml_str(
            r#"
            [metrics.graphiteReporter]
            port = 2003
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_period_is_an_error() {
        let result = MetricsConfig::from_toml_str(
            r#"
            [metrics.graphiteReporter]
            host = "localhost"
            port = 2003
            period = "often"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidPeriod { .. })));
    }

    #[test]
    fn test_unknown_reporter_key_is_an_error() {
        let result = MetricsConfig::from_toml_str(
            r#"
            [metrics.graphiteReporter]
            host = "localhost"
            port = 2003
            batchsize = 10
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_time_unit_conversions() {
        assert_eq!(TimeUnit::Milliseconds.duration(500), Duration::from_millis(500));
        assert_eq!(TimeUnit::Minutes.duration(2), Duration::from_secs(120));
        assert!((TimeUnit::Days.as_secs() - 86_400.0).abs() < f64::EPSILON);
    }
}
