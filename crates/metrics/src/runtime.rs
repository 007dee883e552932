//! Process-runtime introspection gauge sets.
//!
//! The four categories mirror the `jvm.attr`, `jvm.gc`, `jvm.memory`
//! and `jvm.threads` names existing dashboards already graph. A
//! provider may support only a subset; the registrar logs and skips
//! the categories it cannot get.

use crate::registry::GaugeSet;

/// Category of a runtime metric set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeSetKind {
    Attr,
    Gc,
    Memory,
    Threads,
}

impl RuntimeSetKind {
    pub const ALL: [RuntimeSetKind; 4] = [Self::Attr, Self::Gc, Self::Memory, Self::Threads];

    /// Registration name of the category, relative to the prefix.
    #[must_use]
    pub fn metric_name(self) -> &'static str {
        match self {
            Self::Attr => "jvm.attr",
            Self::Gc => "jvm.gc",
            Self::Memory => "jvm.memory",
            Self::Threads => "jvm.threads",
        }
    }
}

/// Provider of runtime introspection gauge sets.
pub trait RuntimeMetricSets: Send + Sync {
    /// The gauge set for `kind`, or `None` when this provider cannot
    /// supply that category.
    fn set(&self, kind: RuntimeSetKind) -> Option<Box<dyn GaugeSet>>;
}

#[cfg(feature = "system")]
mod system {
    use {
        super::{RuntimeMetricSets, RuntimeSetKind},
        crate::registry::{GaugeSet, ReadGauge},
        std::sync::{Arc, Mutex, PoisonError},
        sysinfo::{Pid, ProcessesToUpdate, System},
    };

    type ProcessRead = fn(&sysinfo::Process) -> Option<f64>;

    /// `sysinfo`-backed provider covering the attr, memory and thread
    /// categories. There is no collector to introspect, so the gc
    /// category stays absent.
    pub struct SystemMetricSets {
        system: Arc<Mutex<System>>,
        pid: Option<Pid>,
    }

    impl SystemMetricSets {
        #[must_use]
        pub fn new() -> Self {
            Self {
                system: Arc::new(Mutex::new(System::new())),
                pid: sysinfo::get_current_pid().ok(),
            }
        }
    }

    impl Default for SystemMetricSets {
        fn default() -> Self {
            Self::new()
        }
    }

    struct ProcessGauge {
        system: Arc<Mutex<System>>,
        pid: Option<Pid>,
        read: ProcessRead,
    }

    impl ReadGauge for ProcessGauge {
        fn value(&self) -> Option<f64> {
            let pid = self.pid?;
            let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
            system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            system.process(pid).and_then(|process| (self.read)(process))
        }
    }

    struct ProcessGaugeSet {
        gauges: Vec<(&'static str, ProcessRead)>,
        system: Arc<Mutex<System>>,
        pid: Option<Pid>,
    }

    impl GaugeSet for ProcessGaugeSet {
        fn gauges(&self) -> Vec<(String, Arc<dyn ReadGauge>)> {
            self.gauges
                .iter()
                .map(|(name, read)| {
                    let gauge = ProcessGauge {
                        system: Arc::clone(&self.system),
                        pid: self.pid,
                        read: *read,
                    };
                    ((*name).to_owned(), Arc::new(gauge) as Arc<dyn ReadGauge>)
                })
                .collect()
        }
    }

    impl RuntimeMetricSets for SystemMetricSets {
        fn set(&self, kind: RuntimeSetKind) -> Option<Box<dyn GaugeSet>> {
            let gauges: Vec<(&'static str, ProcessRead)> = match kind {
                RuntimeSetKind::Attr => vec![
                    ("uptime", |p| Some(p.run_time() as f64)),
                    ("cpu.usage", |p| Some(f64::from(p.cpu_usage()))),
                ],
                RuntimeSetKind::Memory => vec![
                    ("resident", |p| Some(p.memory() as f64)),
                    ("virtual", |p| Some(p.virtual_memory() as f64)),
                ],
                // thread enumeration is only available on some platforms;
                // the gauge reports absent elsewhere
                RuntimeSetKind::Threads => {
                    vec![("count", (|p| p.tasks().map(|tasks| tasks.len() as f64)) as ProcessRead)]
                }
                RuntimeSetKind::Gc => return None,
            };
            Some(Box::new(ProcessGaugeSet {
                gauges,
                system: Arc::clone(&self.system),
                pid: self.pid,
            }))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_gc_category_is_absent() {
            let provider = SystemMetricSets::new();
            assert!(provider.set(RuntimeSetKind::Gc).is_none());
            assert!(provider.set(RuntimeSetKind::Attr).is_some());
        }

        #[test]
        fn test_memory_gauges_read_the_current_process() {
            let provider = SystemMetricSets::new();
            let set = provider.set(RuntimeSetKind::Memory).map(|s| s.gauges());
            let gauges = set.unwrap_or_default();
            assert_eq!(gauges.len(), 2);
            let resident = gauges.iter().find(|(name, _)| name == "resident");
            let value = resident.and_then(|(_, gauge)| gauge.value());
            assert!(value.is_some_and(|bytes| bytes > 0.0));
        }
    }
}

#[cfg(feature = "system")]
pub use system::SystemMetricSets;
