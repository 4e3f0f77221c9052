//! Error types for the export library.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for export operations.
#[derive(Error, Debug)]
pub enum ExportError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed object reference or a target that cannot be dispatched.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Connection or query failure while reading batches from the source.
    #[error("Source read failed for {object}: {source}")]
    SourceRead {
        object: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A batch violates the schema fixed from the first batch.
    #[error("Schema conflict in column '{column}': expected {expected}, got {actual}")]
    SchemaConflict {
        column: String,
        expected: String,
        actual: String,
    },

    /// Storage or encoding failure while appending or finalizing an output file.
    #[error("Write failed for {}: {message}", path.display())]
    Write { path: PathBuf, message: String },

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// The run was started without any targets.
    #[error("No objects configured for export")]
    NoTargets,

    /// The output directory cannot be created or written to.
    #[error("Output directory {} is not usable: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Export was cancelled (SIGINT, etc.)
    #[error("Export cancelled")]
    Cancelled,
}

impl ExportError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        ExportError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a SourceRead error for the given object.
    pub fn source_read(
        object: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        ExportError::SourceRead {
            object: object.into(),
            source: source.into(),
        }
    }

    /// Create a Write error for the given path.
    pub fn write(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        ExportError::Write {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Classify this error for the per-target result.
    pub fn kind(&self) -> FailureKind {
        match self {
            ExportError::InvalidConfiguration(_) | ExportError::Config(_) => {
                FailureKind::InvalidConfiguration
            }
            ExportError::SourceRead { .. } | ExportError::Pool { .. } => FailureKind::SourceRead,
            ExportError::SchemaConflict { .. } => FailureKind::SchemaConflict,
            ExportError::Cancelled => FailureKind::Cancelled,
            ExportError::Write { .. }
            | ExportError::Io(_)
            | ExportError::OutputDir { .. }
            | ExportError::NoTargets
            | ExportError::Yaml(_)
            | ExportError::Json(_) => FailureKind::Write,
        }
    }

    /// Whether a bounded re-open of the source may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExportError::SourceRead { .. } | ExportError::Pool { .. })
    }

    /// Process exit code for run-fatal errors.
    pub fn exit_code(&self) -> u8 {
        match self {
            ExportError::Config(_)
            | ExportError::InvalidConfiguration(_)
            | ExportError::Yaml(_)
            | ExportError::NoTargets => 2,
            ExportError::SourceRead { .. } | ExportError::Pool { .. } => 3,
            ExportError::OutputDir { .. } | ExportError::Io(_) | ExportError::Write { .. } => 4,
            ExportError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Category of a per-target failure, as recorded in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidConfiguration,
    SourceRead,
    SchemaConflict,
    Write,
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::InvalidConfiguration => "InvalidConfiguration",
            FailureKind::SourceRead => "SourceReadError",
            FailureKind::SchemaConflict => "SchemaConflictError",
            FailureKind::Write => "WriteError",
            FailureKind::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// Result type alias for export operations.
pub type Result<T> = std::result::Result<T, ExportError>;
