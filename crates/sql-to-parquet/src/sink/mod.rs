//! Columnar output.

pub mod parquet;

pub use self::parquet::{partial_path, ParquetCompression, ParquetFileWriter, WriterOptions};
