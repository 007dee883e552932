//! Application metrics facade with periodic Graphite export.
//!
//! The facade owns a process-wide [`MetricRegistry`] of named counters,
//! meters, timers and read-side gauges. [`Metrics::start`] wires the
//! optional integrations the host provides (circuit-breaker status
//! feeds, connection pools, runtime introspection, a secondary
//! datastore) according to the enable flags in [`MetricsConfig`], then
//! starts the configured [`GraphiteExporter`]s. HTTP request
//! instrumentation lives in the companion `argus-axum` crate.

pub mod breaker;
pub mod capability;
pub mod config;
pub mod error;
pub mod facade;
pub mod graphite;
pub mod normalize;
pub mod registry;
pub mod runtime;
pub mod shutdown;

pub use {
    breaker::{BreakerGaugeSet, BreakerStatus, LatencySummary, SharedBreakerStatuses},
    capability::{
        BreakerStatusSource, Capabilities, ConnectionPools, DatastoreHandle, DatastoreResolver,
        InstrumentedPool,
    },
    config::{GraphiteProtocol, GraphiteReporterConfig, MetricsConfig, TimeUnit},
    error::{ConfigError, ExportError},
    facade::Metrics,
    graphite::GraphiteExporter,
    normalize::normalize,
    registry::{GaugeSet, Meter, MetricRegistry, ReadGauge, Timer, TimerContext, metric_name},
    runtime::{RuntimeMetricSets, RuntimeSetKind},
    shutdown::ShutdownHooks,
};

#[cfg(feature = "system")]
pub use runtime::SystemMetricSets;
