//! Shared types for the adsync ETL core.
//!
//! The crates above this one (sink, engine, platforms) exchange tabular
//! payloads ([`Frame`]), warehouse schemas ([`TableSchema`]), load-mode
//! declarations ([`LoadMode`]) and structured errors ([`EtlError`]) defined
//! here.

pub mod error;
pub mod frame;
pub mod load;
pub mod schema;
pub mod value;

pub use error::{BackoffClass, ErrorCategory, EtlError};
pub use frame::{Column, Frame};
pub use load::{DateRange, LoadMode};
pub use schema::{ColumnSchema, TableSchema};
pub use value::{SemanticType, Value};
