//! Microsoft SQL Server driver.
//!
//! - [`MssqlDialect`]: query text for the reader
//! - [`MssqlReader`]: pooled, streaming source reader

mod dialect;
mod reader;

pub use dialect::MssqlDialect;
pub use reader::{MssqlReader, TiberiusConnectionManager};
