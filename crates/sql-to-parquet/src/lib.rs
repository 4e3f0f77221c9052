//! # sql-to-parquet
//!
//! Export Microsoft SQL Server tables and views to Parquet files.
//!
//! Each configured object is read in bounded batches, given a single
//! column schema inferred from its first batch, and written to one Parquet
//! file in the data directory:
//!
//! - **Streaming reads** over a pooled Tiberius connection
//! - **Atomic output** via a `.partial` file renamed on success
//! - **Per-object isolation**: one failed object never stops the run
//! - **Bounded worker pool** for exporting several objects at once
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sql_to_parquet::{Config, MssqlReader, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> sql_to_parquet::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let settings = config.run_settings();
//!     let reader = MssqlReader::connect(&config.source_spec()?, settings.workers as u32).await?;
//!
//!     let orchestrator = Orchestrator::new(Arc::new(reader));
//!     let summary = orchestrator
//!         .run(config.targets(), &settings, CancellationToken::new())
//!         .await?;
//!     println!("Exported {} rows", summary.total_rows_written);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod sink;
pub mod unify;

// Re-exports for convenient access
pub use config::{Config, ExportConfig, LoggingLevel, RunSettings, SourceConfig, SourceSpec};
pub use self::core::{ExportTarget, ResolvedObject, RowBatch, SourceReader, SqlValue, UnifiedSchema};
pub use drivers::{MemoryReader, MssqlDialect, MssqlReader};
pub use error::{ExportError, FailureKind, Result};
pub use orchestrator::{ExportResult, HealthCheckResult, Orchestrator, Outcome, RunSummary};
pub use sink::{ParquetCompression, ParquetFileWriter, WriterOptions};
pub use unify::SchemaUnifier;
