//! Process-wide table of named measurement instruments.
//!
//! Counters, meters and timers are get-or-create handles over
//! `metrics-util` atomic storage; requesting an existing name reuses
//! the underlying storage instead of duplicating it. Gauges are
//! read-only callbacks registered at most once per name and evaluated
//! lazily at export time.

use {
    dashmap::{DashMap, mapref::entry::Entry},
    metrics::{Counter, Histogram, Key},
    metrics_util::registry::{AtomicStorage, Registry},
    std::{
        sync::{Arc, atomic::Ordering},
        time::{Duration, Instant},
    },
};

/// Joins metric name segments with dots, skipping empty segments so an
/// empty prefix never produces a leading dot.
pub fn metric_name<'a, I>(parts: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut name = String::new();
    for part in parts {
        if part.is_empty() {
            continue;
        }
        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(part);
    }
    name
}

/// Instrument exposing an instantaneous externally-computed value.
///
/// `None` means the value is currently absent; absent values are valid
/// (an observed source that has not reported yet) and are skipped at
/// export time rather than treated as errors.
pub trait ReadGauge: Send + Sync {
    fn value(&self) -> Option<f64>;
}

impl<F> ReadGauge for F
where
    F: Fn() -> Option<f64> + Send + Sync,
{
    fn value(&self) -> Option<f64> {
        self()
    }
}

/// A named bundle of gauges registered and deregistered as one unit.
pub trait GaugeSet: Send + Sync {
    /// The gauges of this set, keyed by their name relative to the
    /// set's registration base.
    fn gauges(&self) -> Vec<(String, Arc<dyn ReadGauge>)>;
}

/// Instrument tracking event rate.
#[derive(Clone)]
pub struct Meter {
    counter: Counter,
}

impl Meter {
    /// Records one event.
    pub fn mark(&self) {
        self.counter.increment(1);
    }
}

/// Instrument tracking event duration distribution plus rate.
///
/// Durations are stored as seconds; unit conversion happens at export
/// time, independent of what is recorded here.
#[derive(Clone)]
pub struct Timer {
    histogram: Histogram,
}

impl Timer {
    /// Records one completed event of the given duration.
    pub fn record(&self, elapsed: Duration) {
        self.histogram.record(elapsed.as_secs_f64());
    }

    /// Starts timing one event; [`TimerContext::stop`] records it.
    #[must_use]
    pub fn start(&self) -> TimerContext {
        TimerContext {
            timer: self.clone(),
            started: Instant::now(),
        }
    }
}

/// Measures the time between its creation and [`stop`](Self::stop).
pub struct TimerContext {
    timer: Timer,
    started: Instant,
}

impl TimerContext {
    pub fn stop(self) {
        self.timer.record(self.started.elapsed());
    }
}

/// The process-wide mapping from dotted metric name to instrument.
///
/// Safe for concurrent use: instrument creation, recording and the
/// exporter's snapshot visits may all happen at once.
pub struct MetricRegistry {
    storage: Registry<Key, AtomicStorage>,
    gauges: DashMap<String, Arc<dyn ReadGauge>>,
    gauge_sets: DashMap<String, ()>,
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            storage: Registry::atomic(),
            gauges: DashMap::new(),
            gauge_sets: DashMap::new(),
        }
    }

    /// Returns the counter registered under `name`, creating it if
    /// absent.
    pub fn counter(&self, name: &str) -> Counter {
        self.storage
            .get_or_create_counter(&Key::from_name(name.to_owned()), |shared| {
                Counter::from_arc(shared.clone())
            })
    }

    /// Returns the meter registered under `name`, creating it if
    /// absent.
    pub fn meter(&self, name: &str) -> Meter {
        Meter {
            counter: self.counter(name),
        }
    }

    /// Returns the timer registered under `name`, creating it if
    /// absent.
    pub fn timer(&self, name: &str) -> Timer {
        let histogram = self
            .storage
            .get_or_create_histogram(&Key::from_name(name.to_owned()), |shared| {
                Histogram::from_arc(shared.clone())
            });
        Timer { histogram }
    }

    /// Registers `gauge` under `name` unless that name is taken.
    /// Returns whether the registration happened.
    pub fn register_gauge(&self, name: &str, gauge: Arc<dyn ReadGauge>) -> bool {
        match self.gauges.entry(name.to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(gauge);
                true
            }
        }
    }

    /// Registers every gauge of `set` under `<base>.<gauge name>`.
    /// A second registration under the same base is a no-op, so
    /// repeated attempts for the same source yield exactly one set of
    /// instruments.
    pub fn register_gauge_set(&self, base: &str, set: &dyn GaugeSet) -> bool {
        match self.gauge_sets.entry(base.to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                for (name, gauge) in set.gauges() {
                    self.register_gauge(&metric_name([base, name.as_str()]), gauge);
                }
                slot.insert(());
                true
            }
        }
    }

    /// Visits every counter with its current count.
    pub fn visit_counters(&self, mut visit: impl FnMut(&str, u64)) {
        self.storage
            .visit_counters(|key, counter| visit(key.name(), counter.load(Ordering::Relaxed)));
    }

    /// Visits every registered gauge, evaluating it now. Absent values
    /// are reported as `None`.
    pub fn visit_gauges(&self, mut visit: impl FnMut(&str, Option<f64>)) {
        for entry in self.gauges.iter() {
            visit(entry.key(), entry.value().value());
        }
    }

    /// Drains the samples buffered in every histogram since the last
    /// drain. Samples are durations in seconds.
    pub fn drain_histograms(&self, mut visit: impl FnMut(&str, &[f64])) {
        self.storage
            .visit_histograms(|key, bucket| bucket.clear_with(|samples| visit(key.name(), samples)));
    }

    /// Current value of the gauge registered under `name`, if any.
    pub fn gauge_value(&self, name: &str) -> Option<f64> {
        self.gauges.get(name).and_then(|gauge| gauge.value().value())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, std::collections::HashMap};

    struct TwoGauges;

    impl GaugeSet for TwoGauges {
        fn gauges(&self) -> Vec<(String, Arc<dyn ReadGauge>)> {
            vec![
                ("one".to_owned(), Arc::new(|| Some(1.0)) as Arc<dyn ReadGauge>),
                ("absent".to_owned(), Arc::new(|| None) as Arc<dyn ReadGauge>),
            ]
        }
    }

    #[test]
    fn test_metric_name_skips_empty_segments() {
        assert_eq!(metric_name(["prefix", "routes", "all", "timer"]), "prefix.routes.all.timer");
        assert_eq!(metric_name(["", "routes", "all", "meter"]), "routes.all.meter");
        assert_eq!(metric_name(["prefix", "", "x"]), "prefix.x");
        assert_eq!(metric_name([""; 3]), "");
    }

    #[test]
    fn test_meter_is_get_or_create() {
        let registry = MetricRegistry::new();
        registry.meter("requests.meter").mark();
        registry.meter("requests.meter").mark();

        let mut counts = HashMap::new();
        registry.visit_counters(|name, count| {
            counts.insert(name.to_owned(), count);
        });
        assert_eq!(counts.len(), 1);
        assert_eq!(counts["requests.meter"], 2);
    }

    #[test]
    fn test_timer_records_seconds() {
        let registry = MetricRegistry::new();
        let timer = registry.timer("requests.timer");
        timer.record(Duration::from_millis(250));
        registry.timer("requests.timer").record(Duration::from_millis(750));

        let mut samples = Vec::new();
        registry.drain_histograms(|name, drained| {
            assert_eq!(name, "requests.timer");
            samples.extend_from_slice(drained);
        });
        samples.sort_by(f64::total_cmp);
        assert_eq!(samples, vec![0.25, 0.75]);

        // drained once; a second visit sees nothing new
        let mut empty = true;
        registry.drain_histograms(|_, drained| empty &= drained.is_empty());
        assert!(empty);
    }

    #[test]
    fn test_timer_context_measures_elapsed() {
        let registry = MetricRegistry::new();
        let context = registry.timer("t.timer").start();
        std::thread::sleep(Duration::from_millis(5));
        context.stop();

        let mut samples = Vec::new();
        registry.drain_histograms(|_, drained| samples.extend_from_slice(drained));
        assert_eq!(samples.len(), 1);
        assert!(samples[0] >= 0.005);
    }

    #[test]
    fn test_gauge_set_registration_is_idempotent() {
        let registry = MetricRegistry::new();
        assert!(registry.register_gauge_set("cb.db", &TwoGauges));
        assert!(!registry.register_gauge_set("cb.db", &TwoGauges));

        let mut names = Vec::new();
        registry.visit_gauges(|name, _| names.push(name.to_owned()));
        names.sort();
        assert_eq!(names, vec!["cb.db.absent", "cb.db.one"]);
        assert_eq!(registry.gauge_value("cb.db.one"), Some(1.0));
        assert_eq!(registry.gauge_value("cb.db.absent"), None);
    }
}
