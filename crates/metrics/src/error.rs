use std::io;

/// Errors raised while loading or validating the metrics configuration.
///
/// These are fatal at application startup and surfaced to the operator;
/// everything else in this crate degrades and logs instead of failing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse metrics config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid graphite period `{value}`: {reason}")]
    InvalidPeriod { value: String, reason: String },
}

/// Failure of a single export tick.
///
/// Logged by the exporter task; never stops the periodic schedule and
/// never propagates into request handling.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("pickle encoding failed: {0}")]
    Pickle(#[from] serde_pickle::Error),
}
