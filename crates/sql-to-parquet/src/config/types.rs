//! Configuration type definitions.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::ExportTarget;
use crate::sink::{ParquetCompression, WriterOptions};

/// Root configuration structure.
///
/// Mirrors the shared config file layout: a `sql_tools` section with
/// settings inherited by every tool, and a `sql_to_parquet` section for
/// this tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Settings shared across tools.
    #[serde(default)]
    pub sql_tools: GlobalConfig,

    /// Source database configuration. Falls back to the
    /// `SQL_TO_PARQUET_DB` environment variable when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceConfig>,

    /// Export behavior configuration.
    pub sql_to_parquet: ExportConfig,
}

/// Settings shared by every tool reading the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Default logging level when the tool section does not set one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging_level: Option<LoggingLevel>,
}

/// Source database (MSSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// Encrypt connection (default: true).
    #[serde(default = "default_true")]
    pub encrypt: bool,

    /// Trust server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .finish()
    }
}

/// Export behavior configuration (the `sql_to_parquet` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Destination directory for output files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Rows per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Verbosity hint; inherits `sql_tools.logging_level` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging_level: Option<LoggingLevel>,

    /// Schema used for object references without a qualifier.
    #[serde(default = "default_dbo_schema")]
    pub default_schema: String,

    /// Output file extension (without the dot).
    #[serde(default = "default_extension")]
    pub output_extension: String,

    /// Parquet compression codec.
    #[serde(default)]
    pub compression: ParquetCompression,

    /// Number of objects exported concurrently (1 = sequential).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Extra re-open attempts after a source read failure.
    #[serde(default)]
    pub max_retries: u32,

    /// Declare every output column nullable instead of inferring it.
    #[serde(default)]
    pub force_nullable: bool,

    /// Objects to export, in order.
    #[serde(default)]
    pub objects: Vec<ExportObject>,
}

/// One configured object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportObject {
    /// Output file stem.
    pub name: String,

    /// `schema.object` or `object`.
    pub object: String,

    /// Source-native predicate applied server-side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl From<&ExportObject> for ExportTarget {
    fn from(obj: &ExportObject) -> Self {
        ExportTarget::new(obj.name.clone(), obj.object.clone(), obj.filter.clone())
    }
}

/// Verbosity hint passed to the log renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoggingLevel {
    /// Only the final summary table and counts.
    #[default]
    Summary,
    /// Per-object progress.
    Verbose,
    /// Per-batch progress and queries.
    Debug,
    /// Errors only, no summary table.
    ErrorsOnly,
}

impl LoggingLevel {
    /// The tracing filter directive for this level.
    pub fn filter_directive(&self) -> &'static str {
        match self {
            LoggingLevel::ErrorsOnly => "error",
            LoggingLevel::Summary => "warn",
            LoggingLevel::Verbose => "info",
            LoggingLevel::Debug => "debug",
        }
    }

    /// Whether the summary table should be rendered.
    pub fn shows_summary(&self) -> bool {
        !matches!(self, LoggingLevel::ErrorsOnly)
    }
}

impl std::str::FromStr for LoggingLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(LoggingLevel::Summary),
            "verbose" => Ok(LoggingLevel::Verbose),
            "debug" => Ok(LoggingLevel::Debug),
            "errors_only" | "errors-only" => Ok(LoggingLevel::ErrorsOnly),
            other => Err(format!(
                "unknown logging level '{}' (expected summary, verbose, debug or errors_only)",
                other
            )),
        }
    }
}

/// Immutable settings threaded through one export run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Destination directory for output files.
    pub data_dir: PathBuf,
    /// Rows per batch.
    pub batch_size: usize,
    /// Schema for unqualified object references.
    pub default_schema: String,
    /// Output file extension.
    pub output_extension: String,
    /// Concurrently exported objects.
    pub workers: usize,
    /// Extra re-open attempts after source read failures.
    pub max_retries: u32,
    /// Declare every column nullable.
    pub force_nullable: bool,
    /// Parquet writer options.
    pub writer: WriterOptions,
}

impl RunSettings {
    /// Settings with defaults for everything but the directory and batch size.
    pub fn new(data_dir: impl Into<PathBuf>, batch_size: usize) -> Self {
        Self {
            data_dir: data_dir.into(),
            batch_size,
            default_schema: default_dbo_schema(),
            output_extension: default_extension(),
            workers: default_workers(),
            max_retries: 0,
            force_nullable: false,
            writer: WriterOptions::default(),
        }
    }

    /// Set the number of concurrent workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the default schema.
    pub fn with_default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = schema.into();
        self
    }

    /// Set the retry budget for source read failures.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Output path for a target name.
    pub fn output_path(&self, name: &str) -> PathBuf {
        self.data_dir
            .join(format!("{}.{}", name, self.output_extension))
    }
}

// Default value functions for serde
pub(crate) fn default_mssql_port() -> u16 {
    1433
}

pub(crate) fn default_dbo_schema() -> String {
    "dbo".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data/")
}

fn default_batch_size() -> usize {
    10_000
}

fn default_extension() -> String {
    "parquet".to_string()
}

fn default_workers() -> usize {
    1
}

fn default_true() -> bool {
    true
}
