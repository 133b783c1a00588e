//! Heap-resident partition: per-metric point buffers behind a key map.

use crate::error::DbError;
use crate::key::MetricKey;
use crate::partition::Partition;
use crate::types::{DataPoint, Label, Row, Timestamp, TimestampPrecision};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

/// Points of one metric inside a partition.
///
/// `points` is strictly ascending by timestamp. A point that does not extend it lands in
/// `out_of_order` and is kept but never returned by [`MetricPoints::select`].
#[derive(Debug, Default)]
pub struct MetricPoints {
    points: Vec<DataPoint>,
    out_of_order: Vec<DataPoint>,
}

impl MetricPoints {
    pub fn insert(&mut self, point: DataPoint) {
        match self.points.last() {
            Some(last) if point.timestamp <= last.timestamp => self.out_of_order.push(point),
            _ => self.points.push(point),
        }
    }

    /// Ordered points in `[start, end)`.
    pub fn select(&self, start: Timestamp, end: Timestamp) -> Vec<DataPoint> {
        let (first, last) = match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => (first.timestamp, last.timestamp),
            _ => return Vec::new(),
        };
        if end <= first || start > last {
            return Vec::new();
        }

        let start_idx = self.points.partition_point(|p| p.timestamp < start);
        let end_idx = self.points.partition_point(|p| p.timestamp < end);
        self.points[start_idx..end_idx].to_vec()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn out_of_order_len(&self) -> usize {
        self.out_of_order.len()
    }
}

type SharedMetricPoints = Arc<RwLock<MetricPoints>>;

/// In-memory partition.
///
/// The key map lock is only held to resolve a metric; appends and range reads lock the
/// metric's own buffer, so writers of different metrics do not contend.
#[derive(Debug)]
pub struct MemoryPartition {
    metrics: RwLock<HashMap<MetricKey, SharedMetricPoints>>,
    min_timestamp: OnceLock<Timestamp>,
    max_timestamp: AtomicI64,
    num_points: AtomicUsize,
    /// Span in precision units before the partition stops being active.
    partition_duration: i64,
    /// Retention in precision units.
    retention: i64,
    precision: TimestampPrecision,
}

impl MemoryPartition {
    pub fn new(partition_duration: i64, retention: i64, precision: TimestampPrecision) -> Self {
        Self {
            metrics: RwLock::new(HashMap::new()),
            min_timestamp: OnceLock::new(),
            max_timestamp: AtomicI64::new(Timestamp::MIN),
            num_points: AtomicUsize::new(0),
            partition_duration,
            retention,
            precision,
        }
    }

    /// Number of distinct metrics stored.
    pub fn metric_count(&self) -> Result<usize, DbError> {
        Ok(self.metrics.read()?.len())
    }

    fn get_or_create_metric(&self, key: MetricKey) -> Result<SharedMetricPoints, DbError> {
        if let Some(m) = self.metrics.read()?.get(&key) {
            return Ok(Arc::clone(m));
        }
        let mut guard = self.metrics.write()?;
        Ok(Arc::clone(guard.entry(key).or_default()))
    }

    fn get_metric(&self, key: &MetricKey) -> Result<Option<SharedMetricPoints>, DbError> {
        Ok(self.metrics.read()?.get(key).cloned())
    }
}

impl Partition for MemoryPartition {
    fn insert_rows(&self, rows: &[Row]) -> Result<Vec<Row>, DbError> {
        if rows.is_empty() {
            return Err(DbError::NoRowsGiven);
        }

        // Zero means "now"; resolve it before the batch minimum is taken.
        let now = self.precision.now();
        let timestamps: Vec<Timestamp> = rows
            .iter()
            .map(|r| match r.data_point.timestamp {
                0 => now,
                ts => ts,
            })
            .collect();

        let min = *self
            .min_timestamp
            .get_or_init(|| timestamps.iter().copied().min().unwrap_or(now));

        let mut outdated = Vec::new();
        let mut batch_max = Timestamp::MIN;
        let mut inserted = 0usize;
        for (row, &ts) in rows.iter().zip(&timestamps) {
            if ts < min {
                outdated.push(row.clone());
                continue;
            }
            batch_max = batch_max.max(ts);

            let metric = self.get_or_create_metric(MetricKey::new(&row.metric, &row.labels))?;
            metric.write()?.insert(DataPoint::new(ts, row.data_point.value));
            inserted += 1;
        }

        if inserted > 0 {
            self.num_points.fetch_add(inserted, Ordering::AcqRel);
            self.max_timestamp.fetch_max(batch_max, Ordering::AcqRel);
        }
        Ok(outdated)
    }

    fn select_data_points(
        &self,
        metric: &str,
        labels: &[Label],
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<DataPoint>, DbError> {
        match self.get_metric(&MetricKey::new(metric, labels))? {
            Some(points) => Ok(points.read()?.select(start, end)),
            None => Ok(Vec::new()),
        }
    }

    fn min_timestamp(&self) -> Timestamp {
        self.min_timestamp.get().copied().unwrap_or(0)
    }

    // Falls back to the minimum until the first batch has published its maximum.
    fn max_timestamp(&self) -> Timestamp {
        let max = self.max_timestamp.load(Ordering::Acquire);
        if max == Timestamp::MIN {
            self.min_timestamp()
        } else {
            max
        }
    }

    fn size(&self) -> usize {
        self.num_points.load(Ordering::Acquire)
    }

    fn active(&self) -> bool {
        let span = self
            .max_timestamp()
            .saturating_sub(self.min_timestamp())
            .saturating_add(1);
        span < self.partition_duration
    }

    fn expired(&self) -> bool {
        if self.size() == 0 {
            return false;
        }
        self.max_timestamp().saturating_add(self.retention) < self.precision.now()
    }

    fn clean(&self) -> Result<(), DbError> {
        self.metrics.write()?.clear();
        Ok(())
    }
}
