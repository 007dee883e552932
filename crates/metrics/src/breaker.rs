//! Circuit-breaker status and its derived gauge set.
//!
//! The host runtime pushes status batches; the facade upserts them into
//! a shared id-keyed map and registers one [`BreakerGaugeSet`] per id.
//! Gauges never cache: every read goes back to the map, so a value
//! observed downstream is always the latest status pushed so far.

use {
    crate::registry::{GaugeSet, ReadGauge},
    dashmap::DashMap,
    std::sync::Arc,
};

/// Latency distribution summary reported by a circuit breaker, in
/// microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencySummary {
    pub mean: f64,
    pub median: f64,
    pub p98: f64,
    pub p99: f64,
    pub p999: f64,
    pub min: u64,
    pub max: u64,
}

/// One breaker's most recent status.
///
/// `state` is kept as the raw text the runtime reported; anything
/// other than `open`, `half-open` or `closed` maps to an absent state
/// gauge value.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerStatus {
    pub id: String,
    pub state: String,
    pub total_success_count: u64,
    pub total_failure_count: u64,
    pub throughput_one_minute: f64,
    pub failed_throughput_one_minute: f64,
    pub latency_micros: LatencySummary,
}

/// Shared id-keyed store of the latest breaker statuses.
///
/// Concurrent upsert-by-key and read-by-key are safe; last writer wins
/// per key and there is no cross-key atomicity within a batch. No
/// history is retained.
pub type SharedBreakerStatuses = Arc<DashMap<String, BreakerStatus>>;

fn state_code(state: &str) -> Option<f64> {
    // numeric codes sort naturally in dashboards
    match state {
        "open" => Some(1.0),
        "half-open" => Some(2.0),
        "closed" => Some(3.0),
        _ => None,
    }
}

/// The fixed set of gauges projecting one breaker's live status.
///
/// Construction is cheap (an id and a map handle) and safe to repeat;
/// registration under the same name is deduplicated by the registry.
/// An id with no entry in the map yields an absent value from every
/// gauge, which is a valid state for a breaker that has not reported
/// yet.
pub struct BreakerGaugeSet {
    id: String,
    statuses: SharedBreakerStatuses,
}

impl BreakerGaugeSet {
    #[must_use]
    pub fn new(id: impl Into<String>, statuses: SharedBreakerStatuses) -> Self {
        Self {
            id: id.into(),
            statuses,
        }
    }

    fn gauge(&self, read: fn(&BreakerStatus) -> Option<f64>) -> Arc<dyn ReadGauge> {
        Arc::new(StatusGauge {
            id: self.id.clone(),
            statuses: Arc::clone(&self.statuses),
            read,
        })
    }
}

struct StatusGauge {
    id: String,
    statuses: SharedBreakerStatuses,
    read: fn(&BreakerStatus) -> Option<f64>,
}

impl ReadGauge for StatusGauge {
    fn value(&self) -> Option<f64> {
        self.statuses
            .get(&self.id)
            .and_then(|status| (self.read)(status.value()))
    }
}

impl GaugeSet for BreakerGaugeSet {
    fn gauges(&self) -> Vec<(String, Arc<dyn ReadGauge>)> {
        vec![
            ("state".to_owned(), self.gauge(|s| state_code(&s.state))),
            ("totalSuccessCount".to_owned(), self.gauge(|s| Some(s.total_success_count as f64))),
            ("totalFailureCount".to_owned(), self.gauge(|s| Some(s.total_failure_count as f64))),
            ("throughputOneMinute".to_owned(), self.gauge(|s| Some(s.throughput_one_minute))),
            (
                "failedThroughputOneMinute".to_owned(),
                self.gauge(|s| Some(s.failed_throughput_one_minute)),
            ),
            ("latency.mean".to_owned(), self.gauge(|s| Some(s.latency_micros.mean))),
            ("latency.median".to_owned(), self.gauge(|s| Some(s.latency_micros.median))),
            ("latency.p98".to_owned(), self.gauge(|s| Some(s.latency_micros.p98))),
            ("latency.p99".to_owned(), self.gauge(|s| Some(s.latency_micros.p99))),
            ("latency.p999".to_owned(), self.gauge(|s| Some(s.latency_micros.p999))),
            ("latency.min".to_owned(), self.gauge(|s| Some(s.latency_micros.min as f64))),
            ("latency.max".to_owned(), self.gauge(|s| Some(s.latency_micros.max as f64))),
        ]
    }
}
