//! Core abstractions shared by readers, the unifier and the writer.
//!
//! - [`identifier`]: object reference resolution and identifier quoting
//! - [`value`]: cell values and row batches
//! - [`schema`]: output column types and the unified schema
//! - [`traits`]: the [`SourceReader`] abstraction and its batch stream
//! - [`target`]: configured export targets

pub mod identifier;
pub mod schema;
pub mod target;
pub mod traits;
pub mod value;

pub use identifier::{qualify_mssql, quote_mssql, resolve, validate_identifier, ResolvedObject};
pub use schema::{ColumnType, UnifiedColumn, UnifiedSchema};
pub use target::ExportTarget;
pub use traits::{BatchStream, ReadRequest, SourceReader};
pub use value::{RowBatch, SqlValue};
