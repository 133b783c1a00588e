use std::sync::Arc;
use std::time::Duration;

/// Structured, in-process event hook for observability.
///
/// The engine never prints. Callers provide an implementation that forwards these events
/// to `log`, metrics, or custom sinks; [`LogEventListener`] does the former.
pub trait StorageEventListener: std::fmt::Debug + Send + Sync + 'static {
    fn on_event(&self, event: StorageEvent);
}

/// Structured events emitted by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageEvent {
    /// A new head partition was created because the previous one became inactive.
    PartitionCreated { partitions: usize },
    /// A partition beyond the writable window was evicted.
    PartitionEvicted { min_timestamp: i64, max_timestamp: i64, points: usize },
    /// A partition past its retention was removed.
    ExpiredPartitionRemoved { min_timestamp: i64, max_timestamp: i64 },
    /// Background eviction failed; nothing is propagated to callers.
    EvictionFailed { error: String },
    /// Rows older than every writable partition were discarded.
    RowsDropped { count: usize },
    /// A writer gave up waiting for a write permit.
    WriteOverloaded { limit: usize, timeout: Duration },
    StorageClosed,
}

#[derive(Debug)]
pub struct NoopEventListener;

impl StorageEventListener for NoopEventListener {
    #[inline]
    fn on_event(&self, _event: StorageEvent) {}
}

pub fn noop_event_listener() -> Arc<dyn StorageEventListener> {
    Arc::new(NoopEventListener)
}

/// Forwards events to the `log` facade under the `partdb` target.
#[derive(Debug, Default)]
pub struct LogEventListener;

impl StorageEventListener for LogEventListener {
    fn on_event(&self, event: StorageEvent) {
        match event {
            StorageEvent::PartitionCreated { partitions } => {
                log::debug!(target: "partdb", "created head partition, {partitions} partitions in list");
            }
            StorageEvent::PartitionEvicted {
                min_timestamp,
                max_timestamp,
                points,
            } => {
                log::debug!(
                    target: "partdb",
                    "evicted partition [{min_timestamp}, {max_timestamp}] holding {points} points"
                );
            }
            StorageEvent::ExpiredPartitionRemoved {
                min_timestamp,
                max_timestamp,
            } => {
                log::info!(
                    target: "partdb",
                    "removed expired partition [{min_timestamp}, {max_timestamp}]"
                );
            }
            StorageEvent::EvictionFailed { error } => {
                log::error!(target: "partdb", "failed to evict partitions: {error}");
            }
            StorageEvent::RowsDropped { count } => {
                log::warn!(target: "partdb", "dropped {count} rows older than the writable partitions");
            }
            StorageEvent::WriteOverloaded { limit, timeout } => {
                log::warn!(
                    target: "partdb",
                    "write timed out after {timeout:?} with {limit} concurrent writers"
                );
            }
            StorageEvent::StorageClosed => {
                log::info!(target: "partdb", "storage closed");
            }
        }
    }
}

/// Metrics instrumentation through the `metrics` facade.
///
/// Recording is effectively a no-op until the embedding application installs a recorder.
pub mod storage_metrics {
    use ::metrics::{describe_counter, describe_gauge, Unit};

    // Counters are exposed as `<name>_total` by Prometheus-style exporters.
    pub const INGEST_ROWS: &str = "partdb_ingest_rows";
    pub const DROPPED_ROWS: &str = "partdb_dropped_rows";
    pub const ROTATIONS: &str = "partdb_partition_rotations";
    pub const EVICTIONS: &str = "partdb_partition_evictions";
    pub const WRITE_TIMEOUTS: &str = "partdb_write_timeouts";
    pub const PARTITIONS: &str = "partdb_partitions";

    #[inline]
    pub fn record_ingest_rows(rows: u64) {
        if rows > 0 {
            ::metrics::counter!(INGEST_ROWS).increment(rows);
        }
    }

    #[inline]
    pub fn record_dropped_rows(rows: u64) {
        if rows > 0 {
            ::metrics::counter!(DROPPED_ROWS).increment(rows);
        }
    }

    #[inline]
    pub fn record_rotation(partitions: usize) {
        ::metrics::counter!(ROTATIONS).increment(1);
        ::metrics::gauge!(PARTITIONS).set(partitions as f64);
    }

    #[inline]
    pub fn record_eviction(partitions: usize) {
        ::metrics::counter!(EVICTIONS).increment(1);
        ::metrics::gauge!(PARTITIONS).set(partitions as f64);
    }

    #[inline]
    pub fn record_write_timeout() {
        ::metrics::counter!(WRITE_TIMEOUTS).increment(1);
    }

    /// Registers descriptions with the installed recorder. Call once after installing it.
    pub fn describe_all() {
        describe_counter!(INGEST_ROWS, Unit::Count, "Rows accepted by Storage::insert_rows.");
        describe_counter!(
            DROPPED_ROWS,
            Unit::Count,
            "Rows discarded because they were older than every writable partition."
        );
        describe_counter!(ROTATIONS, Unit::Count, "New head partitions created.");
        describe_counter!(EVICTIONS, Unit::Count, "Partitions removed from the list.");
        describe_counter!(
            WRITE_TIMEOUTS,
            Unit::Count,
            "Writes rejected because no write permit became free in time."
        );
        describe_gauge!(PARTITIONS, Unit::Count, "Partitions currently in the list.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_listener_handles_every_event() {
        let listener = LogEventListener;
        let events = vec![
            StorageEvent::PartitionCreated { partitions: 2 },
            StorageEvent::PartitionEvicted {
                min_timestamp: 1,
                max_timestamp: 2,
                points: 3,
            },
            StorageEvent::ExpiredPartitionRemoved {
                min_timestamp: 1,
                max_timestamp: 2,
            },
            StorageEvent::EvictionFailed {
                error: "boom".to_string(),
            },
            StorageEvent::RowsDropped { count: 4 },
            StorageEvent::WriteOverloaded {
                limit: 1,
                timeout: Duration::from_millis(1),
            },
            StorageEvent::StorageClosed,
        ];
        for event in events {
            listener.on_event(event);
        }
    }

    #[test]
    fn metrics_without_recorder_are_noops() {
        storage_metrics::describe_all();
        storage_metrics::record_ingest_rows(10);
        storage_metrics::record_dropped_rows(0);
        storage_metrics::record_rotation(3);
        storage_metrics::record_eviction(2);
        storage_metrics::record_write_timeout();
    }
}
