//! Schema unification across successive batches.
//!
//! The output schema is inferred from the first batch of an object and then
//! fixed: later batches are validated and coerced against it, never used to
//! extend it. This keeps memory bounded at the cost of trusting the first
//! batch to be representative (see `force_nullable` for the usual escape
//! hatch).

use std::collections::HashMap;

use tracing::debug;

use crate::core::{ColumnType, RowBatch, SqlValue, UnifiedColumn, UnifiedSchema};
use crate::error::{ExportError, Result};

/// Derive or validate a schema from a batch.
///
/// With no prior state the schema is inferred from `batch`. Otherwise the
/// batch is checked against `state`, which is returned unchanged.
///
/// # Errors
///
/// `SchemaConflict` naming the first offending column.
pub fn observe(batch: &RowBatch, state: Option<UnifiedSchema>) -> Result<UnifiedSchema> {
    match state {
        None => Ok(infer(batch, false)),
        Some(schema) => {
            validate(batch, &schema)?;
            Ok(schema)
        }
    }
}

/// Infer a schema from one batch.
///
/// Each column takes the narrowest type covering its non-null values; a
/// column with no non-null values becomes nullable text.
pub fn infer(batch: &RowBatch, force_nullable: bool) -> UnifiedSchema {
    let columns = batch
        .columns
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let mut data_type: Option<ColumnType> = None;
            let mut saw_null = false;
            for row in &batch.rows {
                match row.get(idx).and_then(ColumnType::of) {
                    Some(t) => data_type = Some(data_type.map_or(t, |cur| cur.widen(t))),
                    None => saw_null = true,
                }
            }
            let nullable = force_nullable || saw_null || data_type.is_none();
            UnifiedColumn::new(name.clone(), data_type.unwrap_or(ColumnType::Utf8), nullable)
        })
        .collect();

    UnifiedSchema::new(columns)
}

/// Check every column and value of `batch` against `schema`.
pub fn validate(batch: &RowBatch, schema: &UnifiedSchema) -> Result<()> {
    let positions = map_columns(batch, schema)?;

    for (col, pos) in schema.columns.iter().zip(&positions) {
        match pos {
            Some(idx) => {
                for row in &batch.rows {
                    check_value(col, row.get(*idx).unwrap_or(&SqlValue::Null))?;
                }
            }
            None if !batch.rows.is_empty() => check_value(col, &SqlValue::Null)?,
            None => {}
        }
    }
    Ok(())
}

/// Reorder and coerce a batch into `schema`.
///
/// Rows come back in schema column order. Integers in float columns are
/// widened, scalars in text columns are rendered to strings, and schema
/// columns missing from the batch are filled with nulls.
pub fn conform(batch: RowBatch, schema: &UnifiedSchema) -> Result<Vec<Vec<SqlValue>>> {
    let positions = map_columns(&batch, schema)?;

    let mut out = Vec::with_capacity(batch.rows.len());
    for mut row in batch.rows {
        let mut conformed = Vec::with_capacity(schema.len());
        for (col, pos) in schema.columns.iter().zip(&positions) {
            let value = pos
                .and_then(|idx| row.get_mut(idx))
                .map(|v| std::mem::replace(v, SqlValue::Null))
                .unwrap_or(SqlValue::Null);
            check_value(col, &value)?;
            conformed.push(coerce(col.data_type, value));
        }
        out.push(conformed);
    }
    Ok(out)
}

/// Stateful unifier for one object's batch sequence.
#[derive(Debug, Default)]
pub struct SchemaUnifier {
    schema: Option<UnifiedSchema>,
    force_nullable: bool,
}

impl SchemaUnifier {
    pub fn new(force_nullable: bool) -> Self {
        Self {
            schema: None,
            force_nullable,
        }
    }

    /// The fixed schema, once the first batch has been seen.
    pub fn schema(&self) -> Option<&UnifiedSchema> {
        self.schema.as_ref()
    }

    /// Observe a batch and return its rows conformed to the fixed schema.
    pub fn push(&mut self, batch: RowBatch) -> Result<Vec<Vec<SqlValue>>> {
        let schema = match self.schema.take() {
            None => {
                let schema = infer(&batch, self.force_nullable);
                debug!(columns = schema.len(), "inferred schema from first batch");
                schema
            }
            Some(schema) => schema,
        };
        let rows = conform(batch, &schema);
        self.schema = Some(schema);
        rows
    }
}

fn map_columns(batch: &RowBatch, schema: &UnifiedSchema) -> Result<Vec<Option<usize>>> {
    let index: HashMap<&str, usize> = batch
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| (c.as_str(), i))
        .collect();

    if let Some(extra) = batch
        .columns
        .iter()
        .find(|c| schema.column(c.as_str()).is_none())
    {
        return Err(ExportError::SchemaConflict {
            column: extra.clone(),
            expected: "no such column".to_string(),
            actual: "new column".to_string(),
        });
    }

    Ok(schema
        .columns
        .iter()
        .map(|c| index.get(c.name.as_str()).copied())
        .collect())
}

fn check_value(col: &UnifiedColumn, value: &SqlValue) -> Result<()> {
    let ok = if value.is_null() {
        col.nullable
    } else {
        col.data_type.accepts(value)
    };
    if ok {
        return Ok(());
    }

    let expected = if value.is_null() {
        format!("non-null {}", col.data_type)
    } else {
        col.data_type.to_string()
    };
    Err(ExportError::SchemaConflict {
        column: col.name.clone(),
        expected,
        actual: value.kind_name().to_string(),
    })
}

fn coerce(target: ColumnType, value: SqlValue) -> SqlValue {
    match (target, value) {
        (_, SqlValue::Null) => SqlValue::Null,
        (ColumnType::Float64, SqlValue::Int(v)) => SqlValue::Float(v as f64),
        (ColumnType::Utf8, SqlValue::Text(v)) => SqlValue::Text(v),
        (ColumnType::Utf8, other) => SqlValue::Text(other.to_string()),
        (_, other) => other,
    }
}
