use std::time::Duration;
use thiserror::Error;

/// Custom error type for storage engine operations.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("No rows given")]
    NoRowsGiven,

    #[error("Metric name must be set")]
    EmptyMetricName,

    #[error("Invalid time range: start={start}, end={end}")]
    InvalidTimeRange { start: i64, end: i64 },

    /// No write permit became free within the configured write timeout.
    #[error("Failed to write rows within {timeout:?}: storage is overloaded with {limit} concurrent writers")]
    Overloaded { limit: usize, timeout: Duration },

    /// A valid query matched nothing. Callers should not treat this as a failure.
    #[error("No data points found")]
    NoDataPoints,

    #[error("Partition list is empty")]
    EmptyPartitionList,

    #[error("Partition not found: min_timestamp={min_timestamp}")]
    PartitionNotFound { min_timestamp: i64 },

    #[error("Storage is closed")]
    Closed,

    #[error("Configuration Error: {0}")]
    ConfigError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// A lower-layer error annotated with what the engine was doing.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<DbError>,
    },
}

impl DbError {
    /// Wraps `self` with a description of the operation that failed.
    pub fn context(self, context: impl Into<String>) -> Self {
        DbError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns true for the "valid query, empty result" sentinel, looking through context wrappers.
    pub fn is_no_data_points(&self) -> bool {
        match self {
            DbError::NoDataPoints => true,
            DbError::Context { source, .. } => source.is_no_data_points(),
            _ => false,
        }
    }
}

// Implement conversion from lock poison errors for convenience
impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        DbError::LockError(format!("Mutex/RwLock poisoned: {}", err))
    }
}
