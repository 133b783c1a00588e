//! Core engine: partition rotation, bounded writers, merged reads, eviction and shutdown.

use crate::concurrency::{InFlight, WritePermit, WritePermits};
use crate::error::DbError;
use crate::list::PartitionList;
use crate::memory::MemoryPartition;
use crate::partition::{Partition, SharedPartition};
use crate::telemetry::{noop_event_listener, storage_metrics, StorageEvent, StorageEventListener};
use crate::types::{DataPoint, Label, Row, Timestamp, TimestampPrecision};

use rayon::prelude::*;
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Number of newest partitions that accept writes. Anything older is read-only and
/// eligible for eviction.
pub const WRITABLE_PARTITIONS_NUM: usize = 2;

/// Configuration options for [`Storage`].
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Time span a partition covers before a new head is created.
    pub partition_duration: Duration,
    /// Partitions whose newest point is older than this are removed on eviction passes.
    pub retention: Duration,
    /// Unit of every timestamp passed in and out.
    pub timestamp_precision: TimestampPrecision,
    /// How long a writer waits for a free write permit.
    pub write_timeout: Duration,
    /// Maximum number of concurrently writing callers.
    pub workers_limit: usize,
    /// Structured event hook (no-op by default).
    pub event_listener: Arc<dyn StorageEventListener>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            partition_duration: Duration::from_secs(5 * 60),
            retention: Duration::from_secs(24 * 60 * 60),
            timestamp_precision: TimestampPrecision::Seconds,
            write_timeout: Duration::from_secs(30),
            workers_limit: 1,
            event_listener: noop_event_listener(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), DbError> {
        if self.workers_limit == 0 {
            return Err(DbError::ConfigError(
                "workers_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fluent construction of a [`Storage`].
#[derive(Debug, Clone, Default)]
pub struct StorageBuilder {
    config: StorageConfig,
}

impl StorageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_partition_duration(mut self, duration: Duration) -> Self {
        self.config.partition_duration = duration;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.config.retention = retention;
        self
    }

    pub fn with_timestamp_precision(mut self, precision: TimestampPrecision) -> Self {
        self.config.timestamp_precision = precision;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    pub fn with_workers_limit(mut self, limit: usize) -> Self {
        self.config.workers_limit = limit;
        self
    }

    pub fn with_event_listener(mut self, listener: Arc<dyn StorageEventListener>) -> Self {
        self.config.event_listener = listener;
        self
    }

    pub fn build(self) -> Result<Storage, DbError> {
        Storage::new(self.config)
    }
}

/// State shared with background eviction threads.
#[derive(Debug)]
struct StorageInner {
    partitions: PartitionList,
    permits: WritePermits,
    in_flight: InFlight,
    /// Serializes the check-then-insert of a new head.
    rotation: Mutex<()>,
    /// Serializes eviction passes.
    eviction: Mutex<()>,
    /// Partition duration in precision units.
    partition_duration: i64,
    /// Retention in precision units.
    retention: i64,
    config: StorageConfig,
}

impl StorageInner {
    fn new_partition(&self) -> SharedPartition {
        Arc::new(MemoryPartition::new(
            self.partition_duration,
            self.retention,
            self.config.timestamp_precision,
        ))
    }

    fn emit(&self, event: StorageEvent) {
        self.config.event_listener.on_event(event);
    }

    /// Removes every partition beyond the writable window, then expired ones.
    fn evict(&self) -> Result<(), DbError> {
        let _eviction = self.eviction.lock()?;

        for partition in self.partitions.iter()?.skip(WRITABLE_PARTITIONS_NUM) {
            let partition = partition?;
            let (min_timestamp, max_timestamp, points) = (
                partition.min_timestamp(),
                partition.max_timestamp(),
                partition.size(),
            );
            self.partitions
                .remove(&partition)
                .map_err(|e| e.context("failed to remove partition"))?;
            storage_metrics::record_eviction(self.partitions.size());
            self.emit(StorageEvent::PartitionEvicted {
                min_timestamp,
                max_timestamp,
                points,
            });
        }

        self.remove_expired()
    }

    // Caller holds the eviction lock. Writable partitions are never removed here, however old
    // their data is.
    fn remove_expired(&self) -> Result<(), DbError> {
        for partition in self.partitions.iter()?.skip(WRITABLE_PARTITIONS_NUM) {
            let partition = partition?;
            if !partition.expired() {
                continue;
            }
            let (min_timestamp, max_timestamp) =
                (partition.min_timestamp(), partition.max_timestamp());
            self.partitions
                .remove(&partition)
                .map_err(|e| e.context("failed to remove expired partition"))?;
            storage_metrics::record_eviction(self.partitions.size());
            self.emit(StorageEvent::ExpiredPartitionRemoved {
                min_timestamp,
                max_timestamp,
            });
        }
        Ok(())
    }
}

/// The embedded, in-memory time-series storage engine.
///
/// Writes go to the newest [`WRITABLE_PARTITIONS_NUM`] partitions; at most
/// `workers_limit` callers write at a time. Reads never wait for writers.
#[derive(Debug)]
pub struct Storage {
    inner: Arc<StorageInner>,
    /// Eviction threads spawned on rotation; joined by [`Storage::close`].
    eviction_handles: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Storage {
    /// Creates a storage with a single empty partition.
    ///
    /// # Errors
    /// Returns `DbError::ConfigError` if the configuration is invalid.
    pub fn new(config: StorageConfig) -> Result<Self, DbError> {
        config.validate()?;
        let precision = config.timestamp_precision;
        let inner = StorageInner {
            partitions: PartitionList::new(),
            permits: WritePermits::new(config.workers_limit),
            in_flight: InFlight::default(),
            rotation: Mutex::new(()),
            eviction: Mutex::new(()),
            partition_duration: precision.duration_to_units(config.partition_duration),
            retention: precision.duration_to_units(config.retention),
            config,
        };
        inner.partitions.insert(inner.new_partition())?;

        Ok(Storage {
            inner: Arc::new(inner),
            eviction_handles: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn builder() -> StorageBuilder {
        StorageBuilder::new()
    }

    pub fn config(&self) -> &StorageConfig {
        &self.inner.config
    }

    /// Number of partitions currently in the list.
    pub fn partition_count(&self) -> usize {
        self.inner.partitions.size()
    }

    /// Inserts a batch of rows.
    ///
    /// Rows land in the head partition; rows older than the head's minimum timestamp
    /// are retried on the next older writable partition. Rows older than every writable
    /// partition are dropped and reported as [`StorageEvent::RowsDropped`].
    ///
    /// # Errors
    /// * `DbError::NoRowsGiven` for an empty batch.
    /// * `DbError::Overloaded` if no write permit became free within `write_timeout`.
    /// * `DbError::Closed` once [`Storage::close`] has started.
    pub fn insert_rows(&self, rows: &[Row]) -> Result<(), DbError> {
        if rows.is_empty() {
            return Err(DbError::NoRowsGiven);
        }
        let _in_flight = self.inner.in_flight.enter()?;
        if self.closed.load(Ordering::SeqCst) {
            return Err(DbError::Closed);
        }

        let _permit = self.acquire_permit()?;
        self.ensure_active_head()?;

        let mut pending: Cow<'_, [Row]> = Cow::Borrowed(rows);
        for partition in self.inner.partitions.iter()?.take(WRITABLE_PARTITIONS_NUM) {
            if pending.is_empty() {
                break;
            }
            let partition = partition?;
            let outdated = partition
                .insert_rows(&pending)
                .map_err(|e| e.context("failed to insert rows"))?;
            pending = Cow::Owned(outdated);
        }

        let dropped = pending.len();
        storage_metrics::record_ingest_rows((rows.len() - dropped) as u64);
        if dropped > 0 {
            storage_metrics::record_dropped_rows(dropped as u64);
            self.inner.emit(StorageEvent::RowsDropped { count: dropped });
        }
        Ok(())
    }

    /// Returns the points of one metric in `[start, end)` across all partitions,
    /// ascending by timestamp.
    ///
    /// # Errors
    /// * `DbError::EmptyMetricName` / `DbError::InvalidTimeRange` for malformed arguments.
    /// * `DbError::NoDataPoints` if the query is valid but matched nothing; check with
    ///   [`DbError::is_no_data_points`].
    pub fn select(
        &self,
        metric: &str,
        labels: &[Label],
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<DataPoint>, DbError> {
        if metric.is_empty() {
            return Err(DbError::EmptyMetricName);
        }
        if start >= end {
            return Err(DbError::InvalidTimeRange { start, end });
        }

        let candidates = self.candidate_partitions(start, end)?;
        let per_partition = candidates
            .par_iter()
            .map(|p| p.select_data_points(metric, labels, start, end))
            .collect::<Result<Vec<_>, DbError>>()
            .map_err(|e| e.context("failed to select data points"))?;

        // Older partitions first to keep the merged result ascending.
        let points: Vec<DataPoint> = per_partition.into_iter().rev().flatten().collect();
        if points.is_empty() {
            return Err(DbError::NoDataPoints);
        }
        Ok(points)
    }

    /// Shuts the storage down.
    ///
    /// Waits for in-flight inserts and background evictions, turns the current writable
    /// partitions read-only by inserting fresh ones, evicts everything beyond the writable
    /// window and removes expired partitions. Subsequent inserts fail with `DbError::Closed`.
    pub fn close(&self) -> Result<(), DbError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.in_flight.wait_idle()?;
        self.join_evictions()?;

        for _ in 0..WRITABLE_PARTITIONS_NUM {
            self.inner.partitions.insert(self.inner.new_partition())?;
        }
        self.inner
            .evict()
            .map_err(|e| e.context("failed to close storage"))?;

        self.inner.emit(StorageEvent::StorageClosed);
        Ok(())
    }

    /// Non-empty partitions that may hold points in `[start, end)`, newest first.
    fn candidate_partitions(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<SharedPartition>, DbError> {
        // Newest first, so once a partition ends before `start` every older one does too.
        let mut candidates = Vec::new();
        for partition in self.inner.partitions.iter()? {
            let partition = partition?;
            if partition.size() == 0 {
                continue;
            }
            if partition.max_timestamp() < start {
                break;
            }
            if partition.min_timestamp() >= end {
                continue;
            }
            candidates.push(partition);
        }
        Ok(candidates)
    }

    fn acquire_permit(&self) -> Result<WritePermit<'_>, DbError> {
        let permits = &self.inner.permits;
        if let Some(permit) = permits.try_acquire()? {
            return Ok(permit);
        }

        // All writers are busy; wait for up to write_timeout.
        let timeout = self.inner.config.write_timeout;
        match permits.acquire_timeout(timeout)? {
            Some(permit) => Ok(permit),
            None => {
                let limit = permits.limit();
                storage_metrics::record_write_timeout();
                self.inner
                    .emit(StorageEvent::WriteOverloaded { limit, timeout });
                Err(DbError::Overloaded { limit, timeout })
            }
        }
    }

    /// Creates a new head if the current one is no longer active.
    fn ensure_active_head(&self) -> Result<(), DbError> {
        if self.head_is_active()? {
            return Ok(());
        }

        let _rotation = self.inner.rotation.lock()?;
        if self.head_is_active()? {
            return Ok(());
        }
        self.inner.partitions.insert(self.inner.new_partition())?;

        let partitions = self.inner.partitions.size();
        storage_metrics::record_rotation(partitions);
        self.inner.emit(StorageEvent::PartitionCreated { partitions });
        self.spawn_eviction()
    }

    fn head_is_active(&self) -> Result<bool, DbError> {
        Ok(self
            .inner
            .partitions
            .head()?
            .map_or(false, |head| head.active()))
    }

    fn spawn_eviction(&self) -> Result<(), DbError> {
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name("partdb-eviction".to_string())
            .spawn(move || {
                if let Err(e) = inner.evict() {
                    inner.emit(StorageEvent::EvictionFailed {
                        error: e.to_string(),
                    });
                }
            });

        match spawned {
            Ok(handle) => {
                let mut handles = self.eviction_handles.lock()?;
                handles.retain(|h| !h.is_finished());
                handles.push(handle);
            }
            Err(e) => self.inner.emit(StorageEvent::EvictionFailed {
                error: format!("failed to spawn eviction thread: {e}"),
            }),
        }
        Ok(())
    }

    fn join_evictions(&self) -> Result<(), DbError> {
        let handles = std::mem::take(&mut *self.eviction_handles.lock()?);
        for handle in handles {
            if handle.join().is_err() {
                self.inner.emit(StorageEvent::EvictionFailed {
                    error: "eviction thread panicked".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Performs a best-effort [`Storage::close`] if the caller did not.
impl Drop for Storage {
    fn drop(&mut self) {
        // Errors cannot be reported from drop; call close() explicitly to observe them.
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(metric: &str, ts: Timestamp, value: f64) -> Row {
        Row::new(metric, DataPoint::new(ts, value))
    }

    #[test]
    fn test_starts_with_one_partition() {
        let storage = Storage::new(StorageConfig::default()).unwrap();
        assert_eq!(storage.partition_count(), 1);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = Storage::builder().with_workers_limit(0).build();
        assert!(matches!(result, Err(DbError::ConfigError(_))));
    }

    #[test]
    fn test_builder_sets_config() {
        let storage = Storage::builder()
            .with_partition_duration(Duration::from_secs(60))
            .with_retention(Duration::from_secs(120))
            .with_timestamp_precision(TimestampPrecision::Milliseconds)
            .with_write_timeout(Duration::from_millis(10))
            .with_workers_limit(4)
            .build()
            .unwrap();
        let cfg = storage.config();
        assert_eq!(cfg.partition_duration, Duration::from_secs(60));
        assert_eq!(cfg.retention, Duration::from_secs(120));
        assert_eq!(cfg.timestamp_precision, TimestampPrecision::Milliseconds);
        assert_eq!(cfg.write_timeout, Duration::from_millis(10));
        assert_eq!(cfg.workers_limit, 4);
        assert_eq!(storage.inner.partition_duration, 60_000);
        assert_eq!(storage.inner.retention, 120_000);
    }

    #[test]
    fn test_overloaded_when_permits_exhausted() {
        let storage = Storage::builder()
            .with_write_timeout(Duration::from_millis(20))
            .build()
            .unwrap();
        let _held = storage.inner.permits.try_acquire().unwrap().unwrap();

        let err = storage.insert_rows(&[row("m", 1, 1.0)]).unwrap_err();
        assert!(matches!(
            err,
            DbError::Overloaded { limit: 1, timeout } if timeout == Duration::from_millis(20)
        ));
    }

    #[test]
    fn test_no_rotation_while_head_active() {
        let storage = Storage::new(StorageConfig::default()).unwrap();
        storage.insert_rows(&[row("m", 1, 1.0)]).unwrap();
        storage.insert_rows(&[row("m", 2, 1.0)]).unwrap();
        assert_eq!(storage.partition_count(), 1);
    }

    #[test]
    fn test_candidates_skip_partitions_outside_range() {
        let storage = Storage::builder()
            .with_partition_duration(Duration::from_secs(10))
            .build()
            .unwrap();
        storage.insert_rows(&[row("m", 1, 1.0), row("m", 10, 1.0)]).unwrap();
        storage.insert_rows(&[row("m", 20, 1.0), row("m", 29, 1.0)]).unwrap();

        let mins = |start, end| -> Vec<Timestamp> {
            storage
                .candidate_partitions(start, end)
                .unwrap()
                .iter()
                .map(|p| p.min_timestamp())
                .collect()
        };
        assert_eq!(mins(0, 100), vec![20, 1]);
        // A partition starting exactly at `end` cannot hold points in the range.
        assert_eq!(mins(0, 20), vec![1]);
        assert_eq!(mins(11, 20), Vec::<Timestamp>::new());
        assert_eq!(mins(25, 30), vec![20]);
        assert_eq!(timestamps_of(&storage.select("m", &[], 0, 20).unwrap()), vec![1, 10]);
    }

    fn timestamps_of(points: &[DataPoint]) -> Vec<Timestamp> {
        points.iter().map(|p| p.timestamp).collect()
    }

    #[test]
    fn test_expiry_spares_writable_partitions() {
        let storage = Storage::builder()
            .with_partition_duration(Duration::from_secs(10))
            .with_retention(Duration::from_secs(1))
            .build()
            .unwrap();
        storage.insert_rows(&[row("m", 1, 1.0), row("m", 10, 1.0)]).unwrap();
        storage.insert_rows(&[row("m", 11, 1.0), row("m", 20, 1.0)]).unwrap();
        assert_eq!(storage.partition_count(), WRITABLE_PARTITIONS_NUM);

        storage.join_evictions().unwrap();
        storage.inner.evict().unwrap();
        assert_eq!(storage.partition_count(), WRITABLE_PARTITIONS_NUM);
        assert_eq!(
            timestamps_of(&storage.select("m", &[], 0, 100).unwrap()),
            vec![1, 10, 11, 20]
        );
    }

    #[test]
    fn test_close_is_idempotent_and_rejects_inserts() {
        let storage = Storage::new(StorageConfig::default()).unwrap();
        storage.insert_rows(&[row("m", 1, 1.0)]).unwrap();
        storage.close().unwrap();
        storage.close().unwrap();
        assert_eq!(storage.partition_count(), WRITABLE_PARTITIONS_NUM);
        assert!(matches!(
            storage.insert_rows(&[row("m", 2, 1.0)]),
            Err(DbError::Closed)
        ));
        assert_eq!(storage.inner.in_flight.count().unwrap(), 0);
    }
}
