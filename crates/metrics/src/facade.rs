//! Startup registrar and naming authority.
//!
//! [`Metrics::start`] reads the enable flags once, wires every enabled
//! feature against the capabilities the host actually provides and
//! starts the configured exporters. A flag whose capability is absent
//! logs an error and the rest of startup continues; nothing here fails
//! the application.

use {
    crate::{
        breaker::{BreakerGaugeSet, SharedBreakerStatuses},
        capability::{BreakerStatusSource, Capabilities, ConnectionPools, DatastoreResolver},
        config::{GraphiteReporterConfig, MetricsConfig},
        graphite::GraphiteExporter,
        registry::{Meter, MetricRegistry, Timer, metric_name},
        runtime::{RuntimeMetricSets, RuntimeSetKind},
        shutdown::ShutdownHooks,
    },
    dashmap::DashMap,
    std::sync::Arc,
    tracing::{error, info},
};

/// The started metrics facade.
///
/// Holds the registry and the configured name prefix; request
/// instrumentation goes through [`route_timer`](Self::route_timer) and
/// [`route_meter`](Self::route_meter) so every caller spells names the
/// same way.
pub struct Metrics {
    config: MetricsConfig,
    registry: Arc<MetricRegistry>,
}

impl Metrics {
    /// Wires every enabled feature and starts the configured
    /// exporters. Exporter stop hooks land in `shutdown`.
    pub fn start(
        config: MetricsConfig,
        registry: Arc<MetricRegistry>,
        capabilities: Capabilities,
        shutdown: &ShutdownHooks,
    ) -> Arc<Self> {
        let metrics = Arc::new(Self { config, registry });
        if metrics.config.enable_jvm {
            metrics.register_runtime_sets(capabilities.runtime_sets);
        }
        if metrics.config.enable_circuit_breaker {
            metrics.register_circuit_breakers(capabilities.breaker_source);
        }
        if metrics.config.enable_hikari {
            metrics.register_pools(capabilities.pools);
        }
        metrics.init_graphite(capabilities.datastore, shutdown);
        metrics
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// The timer named `<prefix>.routes.<parts>.timer`.
    #[must_use]
    pub fn route_timer(&self, parts: &[&str]) -> Timer {
        self.registry.timer(&self.route_name(parts, "timer"))
    }

    /// The meter named `<prefix>.routes.<parts>.meter`.
    #[must_use]
    pub fn route_meter(&self, parts: &[&str]) -> Meter {
        self.registry.meter(&self.route_name(parts, "meter"))
    }

    fn route_name(&self, parts: &[&str], kind: &str) -> String {
        let mut segments = vec![self.config.prefix.as_str(), "routes"];
        segments.extend_from_slice(parts);
        segments.push(kind);
        metric_name(segments)
    }

    fn name(&self, part: &str) -> String {
        metric_name([self.config.prefix.as_str(), part])
    }

    fn register_runtime_sets(&self, provider: Option<Arc<dyn RuntimeMetricSets>>) {
        let Some(provider) = provider else {
            error!("enableJVM is set but no runtime introspection provider is available");
            return;
        };
        for kind in RuntimeSetKind::ALL {
            match provider.set(kind) {
                Some(set) => {
                    self.registry.register_gauge_set(&self.name(kind.metric_name()), set.as_ref());
                }
                None => {
                    error!(category = kind.metric_name(), "runtime metric category unavailable");
                }
            }
        }
    }

    fn register_circuit_breakers(&self, source: Option<Arc<dyn BreakerStatusSource>>) {
        let Some(source) = source else {
            error!("enableCircuitBreaker is set but the runtime provides no breaker status feed");
            return;
        };
        let statuses: SharedBreakerStatuses = Arc::new(DashMap::new());
        let mut feed = source.subscribe();
        let registry = Arc::clone(&self.registry);
        let base = self.name("cb");
        info!("metrics for circuit breakers enabled");
        tokio::spawn(async move {
            while let Some(batch) = feed.recv().await {
                for status in batch {
                    let id = status.id.clone();
                    let first_report = statuses.insert(id.clone(), status).is_none();
                    if first_report {
                        let set = BreakerGaugeSet::new(id.clone(), Arc::clone(&statuses));
                        registry.register_gauge_set(&metric_name([base.as_str(), id.as_str()]), &set);
                    }
                }
            }
        });
    }

    fn register_pools(&self, pools: Option<Arc<dyn ConnectionPools>>) {
        let Some(pools) = pools else {
            error!("enableHikari is set but the runtime manages no connection pools");
            return;
        };
        for pool in pools.pools() {
            match pool.attach_registry(Arc::clone(&self.registry)) {
                Ok(()) => info!(pool = pool.name(), "connection pool metrics enabled"),
                Err(error) => {
                    error!(%error, pool = pool.name(), "connection pool metrics unavailable");
                }
            }
        }
    }

    fn init_graphite(&self, datastore: Option<Arc<dyn DatastoreResolver>>, shutdown: &ShutdownHooks) {
        let Some(graphite) = self.config.graphite_reporter.clone() else {
            return;
        };
        start_exporter(graphite.clone(), Arc::clone(&self.registry), shutdown);

        if !self.config.enable_cassandra {
            return;
        }
        let Some(resolver) = datastore else {
            error!("enableCassandra is set but no datastore resolver is available");
            return;
        };
        // the datastore session comes up asynchronously; its exporter
        // prefix adds the handle name under the configured prefixes
        let derived_prefix = metric_name([
            graphite.prefix.as_deref().unwrap_or_default(),
            self.config.prefix.as_str(),
        ]);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match resolver.resolve().await {
                Ok(handle) => {
                    let config = graphite
                        .with_prefix(metric_name([derived_prefix.as_str(), handle.name()]));
                    start_exporter(config, handle.registry(), &shutdown);
                }
                Err(error) => error!(%error, "datastore metrics unavailable"),
            }
        });
    }
}

fn start_exporter(
    config: GraphiteReporterConfig,
    registry: Arc<MetricRegistry>,
    shutdown: &ShutdownHooks,
) {
    match GraphiteExporter::start(config, registry) {
        Ok(exporter) => {
            shutdown.add_hook(async move { exporter.stop().await });
        }
        Err(error) => error!(%error, "graphite reporter failed to start"),
    }
}
