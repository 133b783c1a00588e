use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Timestamp type, in units of the engine's [`TimestampPrecision`].
pub type Timestamp = i64;

/// Value type.
pub type Value = f64;

/// Maximum length in bytes of a label name; longer names are truncated.
pub const MAX_LABEL_NAME_LEN: usize = 256;

/// Maximum length in bytes of a label value; longer values are truncated.
pub const MAX_LABEL_VALUE_LEN: usize = 16384;

/// A metadata pair attached to a metric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// A label with an empty name or value does not take part in metric identity.
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() && !self.value.is_empty()
    }

    /// Returns a copy with name and value cut down to their maximum lengths.
    pub fn truncated(&self) -> Self {
        Self {
            name: truncate_utf8(&self.name, MAX_LABEL_NAME_LEN).to_string(),
            value: truncate_utf8(&self.value, MAX_LABEL_VALUE_LEN).to_string(),
        }
    }
}

/// Cuts `s` to at most `max` bytes without splitting a character.
pub(crate) fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// A single sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp: Timestamp,
    pub value: Value,
}

impl DataPoint {
    pub fn new(timestamp: Timestamp, value: Value) -> Self {
        Self { timestamp, value }
    }
}

/// One ingest unit: a data point plus the metric it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub metric: String,
    #[serde(default)]
    pub labels: Vec<Label>,
    pub data_point: DataPoint,
}

impl Row {
    pub fn new(metric: impl Into<String>, data_point: DataPoint) -> Self {
        Self {
            metric: metric.into(),
            labels: Vec::new(),
            data_point,
        }
    }

    pub fn with_labels(metric: impl Into<String>, labels: Vec<Label>, data_point: DataPoint) -> Self {
        Self {
            metric: metric.into(),
            labels,
            data_point,
        }
    }
}

/// Unit of every timestamp handled by an engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampPrecision {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    #[default]
    Seconds,
}

impl TimestampPrecision {
    /// Converts a duration into this precision's units, saturating at `i64::MAX`.
    pub fn duration_to_units(self, d: Duration) -> i64 {
        let units = match self {
            TimestampPrecision::Nanoseconds => d.as_nanos(),
            TimestampPrecision::Microseconds => d.as_micros(),
            TimestampPrecision::Milliseconds => d.as_millis(),
            TimestampPrecision::Seconds => d.as_secs() as u128,
        };
        i64::try_from(units).unwrap_or(i64::MAX)
    }

    /// Current wall-clock time since the Unix epoch in this precision.
    pub fn now(self) -> Timestamp {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        self.duration_to_units(since_epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_label_keeps_caller_copy() {
        let label = Label::new("k".repeat(300), "v".repeat(20_000));
        let t = label.truncated();
        assert_eq!(t.name.len(), MAX_LABEL_NAME_LEN);
        assert_eq!(t.value.len(), MAX_LABEL_VALUE_LEN);
        assert_eq!(label.name.len(), 300);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // 'é' is two bytes, so 256 bytes cannot end mid-character.
        let label = Label::new(format!("a{}", "é".repeat(200)), "v");
        let t = label.truncated();
        assert_eq!(t.name.len(), 255);
        assert!(t.name.is_char_boundary(t.name.len()));
    }

    #[test]
    fn precision_conversions() {
        let d = Duration::from_secs(300);
        assert_eq!(TimestampPrecision::Seconds.duration_to_units(d), 300);
        assert_eq!(TimestampPrecision::Milliseconds.duration_to_units(d), 300_000);
        assert_eq!(TimestampPrecision::Microseconds.duration_to_units(d), 300_000_000);
        assert_eq!(TimestampPrecision::Nanoseconds.duration_to_units(d), 300_000_000_000);
        assert_eq!(TimestampPrecision::Nanoseconds.duration_to_units(Duration::MAX), i64::MAX);
    }

    #[test]
    fn now_grows_with_precision() {
        let s = TimestampPrecision::Seconds.now();
        let ms = TimestampPrecision::Milliseconds.now();
        assert!(s > 0);
        assert!(ms / 1000 >= s);
    }

    #[test]
    fn row_deserializes_without_labels() {
        let row: Row = serde_json::from_str(
            r#"{"metric":"cpu","data_point":{"timestamp":5,"value":0.5}}"#,
        )
        .unwrap();
        assert_eq!(row, Row::new("cpu", DataPoint::new(5, 0.5)));

        let precision: TimestampPrecision = serde_json::from_str(r#""milliseconds""#).unwrap();
        assert_eq!(precision, TimestampPrecision::Milliseconds);
    }
}
