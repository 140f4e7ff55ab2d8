//! Accumulator exposing records through a `prometheus-client` registry.

use std::{collections::HashMap, sync::atomic::Ordering::Relaxed};

use prometheus_client::{
    encoding::text,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::{Registry, Unit},
};

use crate::metric::{Accumulator, FieldValue, Metric};

/// Record tags, used as the label set of every family.
type Labels = Vec<(String, String)>;

enum Kind {
    Counter,
    Gauge,
}

/// Type, help text and unit of a record field.
fn describe(field: &str) -> (Kind, &'static str, Option<Unit>) {
    let nanoseconds = || Some(Unit::Other("nanoseconds".to_owned()));
    match field {
        "jited_size" => (
            Kind::Gauge,
            "Size of program's JIT-compiled machine code",
            Some(Unit::Bytes),
        ),
        "xlated_size" => (
            Kind::Gauge,
            "Size of program's translated bytecode",
            Some(Unit::Bytes),
        ),
        "time_loaded" => (
            Kind::Gauge,
            "Time since boot at which the program was loaded",
            nanoseconds(),
        ),
        "created_by_uid" => (Kind::Gauge, "User ID of the program's creator", None),
        "run_time" => (
            Kind::Counter,
            "Accumulated duration the program has actively ran",
            nanoseconds(),
        ),
        "run_count" => (
            Kind::Counter,
            "Accumulated execution count of the program",
            None,
        ),
        "recursion_misses" => (
            Kind::Counter,
            "Number of times the program was skipped due to recursion",
            None,
        ),
        "verified_instructions" => (
            Kind::Gauge,
            "Number of verified instructions in the program",
            None,
        ),
        _ => (Kind::Gauge, "", None),
    }
}

/// OpenMetrics exposition of `bpf_prog` records.
///
/// Families are registered the first time a field shows up, under the `bpf_prog_` prefix, with
/// the record's tags as labels. Monotonic fields become counters, the rest gauges. String fields
/// become `<field>_info` gauges carrying the value as a label.
///
/// # Example
///
/// ```no_run
/// use bpf_prog_input::{BpfProgInput, KernelRegistry, OpenMetrics};
///
/// let input = BpfProgInput::new(KernelRegistry);
/// let mut metrics = OpenMetrics::new();
/// input.gather(&mut metrics)?;
///
/// let mut buffer = String::new();
/// metrics.export(&mut buffer)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct OpenMetrics {
    /// Registry for where metric families are registered into.
    registry: Registry,
    /// Metric family counters currently being tracked.
    counters: HashMap<String, Family<Labels, Counter>>,
    /// Metric family gauges currently being tracked.
    gauges: HashMap<String, Family<Labels, Gauge>>,
}

impl OpenMetrics {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            registry: Registry::with_prefix("bpf_prog"),
            counters: Default::default(),
            gauges: Default::default(),
        }
    }

    /// Exports the metrics into the provided buffer with the OpenMetrics text format, then clears
    /// the recorded samples so that programs unloaded since are not reported again.
    pub fn export(&self, buffer: &mut String) -> Result<(), std::fmt::Error> {
        text::encode(buffer, &self.registry)?;
        for family in self.counters.values() {
            family.clear();
        }
        for family in self.gauges.values() {
            family.clear();
        }
        Ok(())
    }

    fn counter(&mut self, name: &str, help: &str, unit: Option<Unit>) -> &Family<Labels, Counter> {
        let registry = &mut self.registry;
        self.counters.entry(name.to_owned()).or_insert_with(|| {
            let family = Family::<Labels, Counter>::default();
            match unit {
                Some(unit) => registry.register_with_unit(name, help, unit, family.clone()),
                None => registry.register(name, help, family.clone()),
            }
            family
        })
    }

    fn gauge(&mut self, name: &str, help: &str, unit: Option<Unit>) -> &Family<Labels, Gauge> {
        let registry = &mut self.registry;
        self.gauges.entry(name.to_owned()).or_insert_with(|| {
            let family = Family::<Labels, Gauge>::default();
            match unit {
                Some(unit) => registry.register_with_unit(name, help, unit, family.clone()),
                None => registry.register(name, help, family.clone()),
            }
            family
        })
    }
}

impl Default for OpenMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Accumulator for OpenMetrics {
    fn add_metric(&mut self, metric: Metric) {
        let labels: Labels = metric
            .tags
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        for (field, value) in &metric.fields {
            match value {
                FieldValue::UInt(value) => match describe(field) {
                    (Kind::Counter, help, unit) => {
                        self.counter(field, help, unit)
                            .get_or_create(&labels)
                            .inner()
                            .store(*value, Relaxed);
                    }
                    (Kind::Gauge, help, unit) => {
                        self.gauge(field, help, unit)
                            .get_or_create(&labels)
                            .set(i64::try_from(*value).unwrap_or(i64::MAX));
                    }
                },
                FieldValue::Str(value) => {
                    let mut labels = labels.clone();
                    labels.push((field.clone(), value.clone()));
                    self.gauge(&format!("{field}_info"), "", None)
                        .get_or_create(&labels)
                        .set(1);
                }
            }
        }
    }
}
