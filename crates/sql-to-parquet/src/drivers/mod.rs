//! Source driver implementations.
//!
//! - [`mssql`]: Microsoft SQL Server via Tiberius and bb8
//! - [`memory`]: in-memory tables with fault injection

pub mod memory;
pub mod mssql;

pub use memory::MemoryReader;
pub use mssql::{MssqlDialect, MssqlReader, TiberiusConnectionManager};
