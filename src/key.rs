//! Metric identity: the canonical (name, label set) key every partition indexes by.

use crate::types::{truncate_utf8, Label};

/// Canonical metric key: metric name plus its valid, truncated labels sorted by name.
/// Two label sets that differ only in order produce equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    name: String,
    /// Sorted by label name, then value.
    labels: Vec<Label>,
}

impl MetricKey {
    /// Builds the canonical key. Labels with an empty name or value are dropped and the
    /// caller's labels are never modified.
    pub fn new(name: &str, labels: &[Label]) -> Self {
        let mut labels: Vec<Label> = labels
            .iter()
            .filter(|l| l.is_valid())
            .map(Label::truncated)
            .collect();
        labels.sort();
        Self {
            name: name.to_string(),
            labels,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Serializes the key into its opaque byte form.
    ///
    /// Without labels the key is the raw name. Otherwise every string is written with a
    /// big-endian u16 length prefix: the name first, then each label's name and value.
    pub fn encode(&self) -> Vec<u8> {
        if self.labels.is_empty() {
            return self.name.as_bytes().to_vec();
        }

        let name = truncate_utf8(&self.name, u16::MAX as usize);
        let size = 2
            + name.len()
            + self
                .labels
                .iter()
                .map(|l| 4 + l.name.len() + l.value.len())
                .sum::<usize>();

        let mut out = Vec::with_capacity(size);
        put_str(&mut out, name);
        for label in &self.labels {
            put_str(&mut out, &label.name);
            put_str(&mut out, &label.value);
        }
        out
    }
}

// Callers guarantee `s` fits in a u16 length.
fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u16).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// Encodes `(name, labels)` into the opaque lookup key bytes.
pub fn encode_metric_name(name: &str, labels: &[Label]) -> Vec<u8> {
    MetricKey::new(name, labels).encode()
}
