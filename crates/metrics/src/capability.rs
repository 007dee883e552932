//! Optional host-runtime integrations.
//!
//! Every integration the host may or may not provide is an explicit
//! capability with an absent case, checked once at startup. An absent
//! capability downgrades the corresponding feature to a logged no-op;
//! it never fails the application.

use {
    crate::{breaker::BreakerStatus, registry::MetricRegistry},
    std::sync::Arc,
    tokio::sync::mpsc,
};

/// Feed of circuit-breaker status batches from the host runtime.
pub trait BreakerStatusSource: Send + Sync {
    /// Opens the status feed. The producer pushes batches for the life
    /// of the application; ordering is preserved within a batch.
    fn subscribe(&self) -> mpsc::Receiver<Vec<BreakerStatus>>;
}

/// A managed connection pool able to publish its own metrics.
pub trait InstrumentedPool: Send + Sync {
    fn name(&self) -> &str;

    /// Attaches the registry so the pool registers its instruments
    /// under its own vendor naming scheme.
    fn attach_registry(&self, registry: Arc<MetricRegistry>) -> anyhow::Result<()>;
}

/// Enumerates the connection pools managed by the host.
pub trait ConnectionPools: Send + Sync {
    fn pools(&self) -> Vec<Arc<dyn InstrumentedPool>>;
}

/// Handle to a secondary datastore exposing its own metric registry.
pub trait DatastoreHandle: Send + Sync {
    /// Short name used as the last segment of the derived exporter
    /// prefix, e.g. `cassandra`.
    fn name(&self) -> &str;

    /// The datastore driver's internal registry.
    fn registry(&self) -> Arc<MetricRegistry>;
}

/// Asynchronously resolves the secondary datastore handle once its
/// session is established.
#[async_trait::async_trait]
pub trait DatastoreResolver: Send + Sync {
    async fn resolve(&self) -> anyhow::Result<Arc<dyn DatastoreHandle>>;
}

/// The optional integrations handed to [`Metrics::start`].
///
/// [`Metrics::start`]: crate::facade::Metrics::start
#[derive(Default)]
pub struct Capabilities {
    pub breaker_source: Option<Arc<dyn BreakerStatusSource>>,
    pub pools: Option<Arc<dyn ConnectionPools>>,
    pub runtime_sets: Option<Arc<dyn crate::runtime::RuntimeMetricSets>>,
    pub datastore: Option<Arc<dyn DatastoreResolver>>,
}
