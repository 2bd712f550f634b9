//! Sink error type and its mapping into the shared ETL taxonomy.

use adsync_types::{EtlError, SemanticType};

/// Error raised by a warehouse sink operation.
///
/// None of these variants leave the target mutated after detection: type
/// alignment runs before any write, and staged loads roll back their
/// transaction on failure.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// A payload column cannot be coerced to the target's declared type.
    #[error("schema mismatch on {table}.{column}: expected {expected}, {detail}")]
    SchemaMismatch {
        table: String,
        column: String,
        expected: SemanticType,
        detail: String,
    },

    /// The target table does not exist in the warehouse catalog.
    #[error("table not found in catalog: {0}")]
    MissingTable(String),

    /// Connection establishment or mid-stream network failure.
    #[error("warehouse connection failure: {0}")]
    Connection(String),

    /// The warehouse rejected the write (unique/check constraint).
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Primary-key columns missing when the load mode requires them.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// A read-only query failed.
    #[error("query failed: {0}")]
    Query(String),

    /// The sink was used after `close()`.
    #[error("sink is closed")]
    Closed,
}

impl SinkError {
    /// Map into the shared taxonomy: connection trouble is a retryable
    /// transient-db error, everything else is a data error that fails the
    /// current table load.
    #[must_use]
    pub fn into_etl_error(self) -> EtlError {
        match self {
            Self::Connection(msg) => EtlError::transient_db("SINK_CONNECTION", msg),
            Self::Closed => EtlError::internal("SINK_CLOSED", "sink used after close"),
            other => EtlError::data("SINK_LOAD", other.to_string()),
        }
    }
}

impl From<SinkError> for EtlError {
    fn from(e: SinkError) -> Self {
        e.into_etl_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adsync_types::ErrorCategory;

    #[test]
    fn connection_failures_map_to_retryable() {
        let err: EtlError = SinkError::Connection("reset by peer".into()).into();
        assert_eq!(err.category, ErrorCategory::TransientDb);
        assert!(err.retryable);
    }

    #[test]
    fn schema_mismatch_maps_to_data_error() {
        let err: EtlError = SinkError::SchemaMismatch {
            table: "t".into(),
            column: "c".into(),
            expected: SemanticType::Integer,
            detail: "got 'abc'".into(),
        }
        .into();
        assert_eq!(err.category, ErrorCategory::Data);
        assert!(!err.retryable);
    }
}
