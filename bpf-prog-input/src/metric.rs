//! Metric records and the sink they are handed to.

use std::{collections::BTreeMap, fmt, time::SystemTime};

/// Measurement name of every record emitted by this crate.
pub const MEASUREMENT: &str = "bpf_prog";

/// Value of a record field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue {
    /// Unsigned integer (sizes in bytes, durations in nanoseconds, counts).
    UInt(u64),
    /// Free-form string.
    Str(String),
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        Self::UInt(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        Self::UInt(value.into())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UInt(value) => write!(f, "{value}"),
            Self::Str(value) => f.write_str(value),
        }
    }
}

/// One measurement: identity tags, numeric or string fields and the capture time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Metric {
    /// Measurement name.
    pub name: &'static str,
    /// Low-cardinality identity dimensions.
    pub tags: BTreeMap<String, String>,
    /// Measured values.
    pub fields: BTreeMap<String, FieldValue>,
    /// When the record was captured.
    pub timestamp: SystemTime,
}

impl Metric {
    /// Empty record for `name` captured at `timestamp`.
    pub fn new(name: &'static str, timestamp: SystemTime) -> Self {
        Self {
            name,
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    /// Looks up a tag value.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Looks up a field value.
    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub(crate) fn add_tag(&mut self, key: &str, value: impl Into<String>) {
        self.tags.insert(key.to_owned(), value.into());
    }

    pub(crate) fn add_field(&mut self, key: &str, value: impl Into<FieldValue>) {
        self.fields.insert(key.to_owned(), value.into());
    }
}

/// Receiver of finished records.
pub trait Accumulator {
    /// Takes ownership of one record.
    fn add_metric(&mut self, metric: Metric);
}

impl Accumulator for Vec<Metric> {
    fn add_metric(&mut self, metric: Metric) {
        self.push(metric);
    }
}

impl<A: Accumulator + ?Sized> Accumulator for &mut A {
    fn add_metric(&mut self, metric: Metric) {
        (**self).add_metric(metric);
    }
}
