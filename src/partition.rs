//! The partition abstraction: a time-bounded store of points for many metrics.

use crate::error::DbError;
use crate::types::{DataPoint, Label, Row, Timestamp};
use std::fmt::Debug;
use std::sync::Arc;

/// A chunk of time-series data covering one time window.
///
/// Lifecycle is writable -> read-only -> evicted; the engine decides which by the
/// partition's position in the list, the partition itself only reports `active()`.
pub trait Partition: Debug + Send + Sync {
    /// Inserts rows and returns the ones older than this partition's minimum timestamp,
    /// so the caller can retry them on an older partition.
    fn insert_rows(&self, rows: &[Row]) -> Result<Vec<Row>, DbError>;

    /// Selects points of one metric in `[start, end)`, ascending by timestamp.
    fn select_data_points(
        &self,
        metric: &str,
        labels: &[Label],
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<DataPoint>, DbError>;

    /// Minimum timestamp, fixed by the first accepted batch (0 while empty).
    fn min_timestamp(&self) -> Timestamp;

    /// Maximum timestamp seen so far (0 while empty).
    fn max_timestamp(&self) -> Timestamp;

    /// Number of points accepted.
    fn size(&self) -> usize;

    /// True while the observed span is shorter than the partition duration.
    fn active(&self) -> bool;

    /// True once the partition falls out of the retention window.
    fn expired(&self) -> bool;

    /// Releases resources held by the partition.
    fn clean(&self) -> Result<(), DbError>;
}

/// Shared partition handle as stored in the partition list.
pub type SharedPartition = Arc<dyn Partition>;
