//! Output column types and the unified per-object schema.

use std::fmt;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use serde::{Deserialize, Serialize};

use super::value::SqlValue;

/// Logical type of an output column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Int64,
    Float64,
    Utf8,
    Boolean,
    Timestamp,
    Binary,
}

impl ColumnType {
    /// Type of a single non-null value. Returns `None` for NULL.
    pub fn of(value: &SqlValue) -> Option<ColumnType> {
        match value {
            SqlValue::Null => None,
            SqlValue::Int(_) => Some(ColumnType::Int64),
            SqlValue::Float(_) => Some(ColumnType::Float64),
            SqlValue::Text(_) => Some(ColumnType::Utf8),
            SqlValue::Bool(_) => Some(ColumnType::Boolean),
            SqlValue::Timestamp(_) => Some(ColumnType::Timestamp),
            SqlValue::Bytes(_) => Some(ColumnType::Binary),
        }
    }

    /// Narrowest type that holds values of both `self` and `other`.
    ///
    /// Integers widen to floats; every other mix falls back to text.
    pub fn widen(self, other: ColumnType) -> ColumnType {
        use ColumnType::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Int64, Float64) | (Float64, Int64) => Float64,
            _ => Utf8,
        }
    }

    /// Whether a non-null value can be stored in a column of this type.
    ///
    /// NULL handling depends on nullability and is decided by the caller.
    pub fn accepts(&self, value: &SqlValue) -> bool {
        match (self, value) {
            (_, SqlValue::Null) => false,
            (ColumnType::Utf8, _) => true,
            (ColumnType::Int64, SqlValue::Int(_)) => true,
            (ColumnType::Float64, SqlValue::Int(_) | SqlValue::Float(_)) => true,
            (ColumnType::Boolean, SqlValue::Bool(_)) => true,
            (ColumnType::Timestamp, SqlValue::Timestamp(_)) => true,
            (ColumnType::Binary, SqlValue::Bytes(_)) => true,
            _ => false,
        }
    }

    /// Arrow data type used when writing this column.
    pub fn arrow_type(&self) -> DataType {
        match self {
            ColumnType::Int64 => DataType::Int64,
            ColumnType::Float64 => DataType::Float64,
            ColumnType::Utf8 => DataType::Utf8,
            ColumnType::Boolean => DataType::Boolean,
            ColumnType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
            ColumnType::Binary => DataType::Binary,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Int64 => "int64",
            ColumnType::Float64 => "float64",
            ColumnType::Utf8 => "utf8",
            ColumnType::Boolean => "boolean",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Binary => "binary",
        };
        f.write_str(name)
    }
}

/// One column of a unified schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedColumn {
    pub name: String,
    pub data_type: ColumnType,
    pub nullable: bool,
}

impl UnifiedColumn {
    pub fn new(name: impl Into<String>, data_type: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

/// Ordered column list fixed for the whole export of one object.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UnifiedSchema {
    pub columns: Vec<UnifiedColumn>,
}

impl UnifiedSchema {
    pub fn new(columns: Vec<UnifiedColumn>) -> Self {
        Self { columns }
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&UnifiedColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Build the Arrow schema for the Parquet writer.
    pub fn to_arrow_schema(&self) -> SchemaRef {
        let fields: Vec<Field> = self
            .columns
            .iter()
            .map(|c| Field::new(&c.name, c.data_type.arrow_type(), c.nullable))
            .collect();
        Arc::new(Schema::new(fields))
    }
}
