//! Warehouse sink: bulk loading of tabular payloads under strict load-mode
//! semantics (append, replace, upsert, increment).
//!
//! [`DataSink`] is the contract the platform pipelines load through.
//! [`PostgresSink`] is the warehouse implementation; [`MemorySink`] carries
//! the same mode semantics in memory for tests and local development.

pub mod align;
pub mod catalog;
pub mod copy_format;
pub mod dedupe;
pub mod error;
pub mod memory;
pub mod postgres;

use adsync_types::{Frame, LoadMode};
use async_trait::async_trait;

pub use error::SinkError;
pub use memory::MemorySink;
pub use postgres::{PostgresSink, PostgresSinkConfig};

/// Destination for processed payloads.
///
/// Implementations are shared across concurrently running platforms; all
/// methods take `&self` and serialize internally where required (one
/// bulk-format write per target table at a time).
#[async_trait]
pub trait DataSink: Send + Sync {
    /// Persist a payload into `table` under the given load mode.
    ///
    /// `pk_columns = None` asks the sink to detect keys from catalog
    /// metadata when the mode requires them; `Some(&[])` is an integrity
    /// error for upsert/increment. Returns rows inserted plus rows updated.
    async fn load(
        &self,
        frame: Frame,
        table: &str,
        mode: LoadMode,
        pk_columns: Option<&[String]>,
        increment_columns: &[String],
    ) -> Result<u64, SinkError>;

    /// Read-only query used by pipelines for cross-table driver keys.
    async fn query(&self, sql: &str) -> Result<Frame, SinkError>;

    /// Whether the (suffixed, in test mode) target table exists.
    async fn table_exists(&self, table: &str) -> Result<bool, SinkError>;

    /// Release warehouse sessions. Further calls fail with [`SinkError::Closed`].
    async fn close(&self) -> Result<(), SinkError>;
}
