//! Incremental Parquet file writer.
//!
//! Rows are appended batch by batch to `<path>.partial`; `close` writes the
//! footer and renames the file into place. Until then the final path is never
//! touched, and an abandoned writer removes its partial file.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BinaryBuilder, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder,
    TimestampMicrosecondBuilder,
};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::{ColumnType, SqlValue, UnifiedSchema};
use crate::error::{ExportError, Result};

/// Parquet compression codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    #[serde(alias = "uncompressed")]
    None,
    #[default]
    Snappy,
    Gzip,
    Zstd,
}

impl ParquetCompression {
    fn codec(&self) -> Compression {
        match self {
            ParquetCompression::None => Compression::UNCOMPRESSED,
            ParquetCompression::Snappy => Compression::SNAPPY,
            ParquetCompression::Gzip => Compression::GZIP(GzipLevel::default()),
            ParquetCompression::Zstd => Compression::ZSTD(ZstdLevel::default()),
        }
    }
}

impl std::str::FromStr for ParquetCompression {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "uncompressed" => Ok(ParquetCompression::None),
            "snappy" => Ok(ParquetCompression::Snappy),
            "gzip" => Ok(ParquetCompression::Gzip),
            "zstd" => Ok(ParquetCompression::Zstd),
            other => Err(format!("unknown compression '{}'", other)),
        }
    }
}

/// Writer settings shared by every file of a run.
#[derive(Debug, Clone, Default)]
pub struct WriterOptions {
    /// Compression codec.
    pub compression: ParquetCompression,
    /// Maximum rows per row group; the Parquet default when unset.
    pub row_group_size: Option<usize>,
}

impl WriterOptions {
    fn properties(&self) -> WriterProperties {
        let mut builder = WriterProperties::builder()
            .set_compression(self.compression.codec())
            .set_statistics_enabled(EnabledStatistics::Chunk);
        if let Some(size) = self.row_group_size.filter(|s| *s > 0) {
            builder = builder.set_max_row_group_size(size);
        }
        builder.build()
    }
}

/// Path of the in-progress file for `path`.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Writes one object's rows to a single Parquet file.
pub struct ParquetFileWriter {
    path: PathBuf,
    partial: PathBuf,
    schema: SchemaRef,
    types: Vec<ColumnType>,
    writer: Option<ArrowWriter<File>>,
    rows_written: u64,
}

impl ParquetFileWriter {
    /// Create the partial file and write the Parquet header.
    pub fn open(path: &Path, schema: &UnifiedSchema, options: &WriterOptions) -> Result<Self> {
        let partial = partial_path(path);
        let file = File::create(&partial).map_err(|e| ExportError::write(&partial, e))?;

        let arrow_schema = schema.to_arrow_schema();
        let writer = match ArrowWriter::try_new(file, arrow_schema.clone(), Some(options.properties())) {
            Ok(w) => w,
            Err(e) => {
                let _ = fs::remove_file(&partial);
                return Err(ExportError::write(path, e));
            }
        };

        debug!(path = %partial.display(), columns = schema.len(), "opened parquet writer");

        Ok(Self {
            path: path.to_path_buf(),
            partial,
            schema: arrow_schema,
            types: schema.columns.iter().map(|c| c.data_type).collect(),
            writer: Some(writer),
            rows_written: 0,
        })
    }

    /// Final output path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows appended so far.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Append rows already conformed to the writer's schema.
    pub fn append(&mut self, rows: Vec<Vec<SqlValue>>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let count = rows.len();
        let batch = self.record_batch(rows)?;

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| ExportError::write(&self.path, "writer already closed"))?;
        writer
            .write(&batch)
            .map_err(|e| ExportError::write(&self.path, e))?;

        self.rows_written += count as u64;
        Ok(())
    }

    /// Write the footer and move the file into place.
    ///
    /// Returns the number of rows written. On failure the partial file is
    /// removed and the final path is left as it was.
    pub fn close(mut self) -> Result<u64> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| ExportError::write(&self.path, "writer already closed"))?;

        if let Err(e) = writer.close() {
            self.remove_partial();
            return Err(ExportError::write(&self.path, e));
        }

        if let Err(e) = fs::rename(&self.partial, &self.path) {
            self.remove_partial();
            return Err(ExportError::write(&self.path, e));
        }

        debug!(path = %self.path.display(), rows = self.rows_written, "closed parquet writer");
        Ok(self.rows_written)
    }

    /// Discard everything written so far.
    pub fn abort(mut self) {
        self.writer.take();
        self.remove_partial();
    }

    fn remove_partial(&self) {
        if let Err(e) = fs::remove_file(&self.partial) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.partial.display(), "failed to remove partial file: {}", e);
            }
        }
    }

    fn record_batch(&self, rows: Vec<Vec<SqlValue>>) -> Result<RecordBatch> {
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(self.types.len());
        for (idx, data_type) in self.types.iter().enumerate() {
            let array = build_column(*data_type, &rows, idx).map_err(|msg| {
                ExportError::write(
                    &self.path,
                    format!("column '{}': {}", self.schema.field(idx).name(), msg),
                )
            })?;
            columns.push(array);
        }

        RecordBatch::try_new(self.schema.clone(), columns)
            .map_err(|e| ExportError::write(&self.path, e))
    }
}

impl Drop for ParquetFileWriter {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            self.remove_partial();
        }
    }
}

fn build_column(
    data_type: ColumnType,
    rows: &[Vec<SqlValue>],
    idx: usize,
) -> std::result::Result<ArrayRef, String> {
    let cells = rows.iter().map(|r| r.get(idx).unwrap_or(&SqlValue::Null));

    macro_rules! build {
        ($builder:expr, $($pat:pat => $val:expr),+ $(,)?) => {{
            let mut b = $builder;
            for cell in cells {
                match cell {
                    SqlValue::Null => b.append_null(),
                    $($pat => b.append_value($val),)+
                    other => return Err(format!("unexpected {} value", other.kind_name())),
                }
            }
            Arc::new(b.finish()) as ArrayRef
        }};
    }

    let array = match data_type {
        ColumnType::Int64 => build!(Int64Builder::with_capacity(rows.len()), SqlValue::Int(v) => *v),
        ColumnType::Float64 => build!(
            Float64Builder::with_capacity(rows.len()),
            SqlValue::Float(v) => *v,
            SqlValue::Int(v) => *v as f64,
        ),
        ColumnType::Utf8 => build!(StringBuilder::new(), SqlValue::Text(v) => v.as_str()),
        ColumnType::Boolean => build!(BooleanBuilder::with_capacity(rows.len()), SqlValue::Bool(v) => *v),
        ColumnType::Timestamp => build!(
            TimestampMicrosecondBuilder::with_capacity(rows.len()),
            SqlValue::Timestamp(v) => v.and_utc().timestamp_micros(),
        ),
        ColumnType::Binary => build!(BinaryBuilder::new(), SqlValue::Bytes(v) => v.as_slice()),
    };
    Ok(array)
}
