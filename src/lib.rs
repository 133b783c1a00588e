#![doc = include_str!("../README.md")]
// Declare modules
pub mod concurrency;
pub mod core;
pub mod error;
pub mod key;
pub mod list;
pub mod memory;
pub mod partition;
pub mod telemetry;
pub mod types;

/// Main entry point: the partitioned in-memory storage engine.
pub use crate::core::Storage;
/// Fluent constructor for [`Storage`].
pub use crate::core::StorageBuilder;
/// Configuration options for the storage engine.
pub use crate::core::StorageConfig;
/// Number of newest partitions that accept writes.
pub use crate::core::WRITABLE_PARTITIONS_NUM;
/// Error type for storage operations.
pub use crate::error::DbError;
/// Canonical metric identity and its byte encoding.
pub use crate::key::{encode_metric_name, MetricKey};
/// Heap-resident partition implementation.
pub use crate::memory::MemoryPartition;
/// Partition abstraction.
pub use crate::partition::{Partition, SharedPartition};
/// Structured event hook for observability.
pub use crate::telemetry::{LogEventListener, StorageEvent, StorageEventListener};
/// Sample, ingest row and label types.
pub use crate::types::{DataPoint, Label, Row, Timestamp, TimestampPrecision, Value};
