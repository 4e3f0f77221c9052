//! MSSQL query text.
//!
//! Identifier quoting and SELECT construction for the reader, kept free of
//! any connection so the CLI can show queries without connecting.

use crate::core::{quote_mssql, ResolvedObject};
use crate::error::Result;

/// Primary key columns of one table, in key order.
pub(crate) const PRIMARY_KEY_QUERY: &str = r#"
    SELECT c.COLUMN_NAME
    FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
    JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE c
        ON c.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
        AND c.TABLE_SCHEMA = tc.TABLE_SCHEMA
        AND c.TABLE_NAME = tc.TABLE_NAME
    WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
      AND tc.TABLE_SCHEMA = @P1
      AND tc.TABLE_NAME = @P2
    ORDER BY c.ORDINAL_POSITION
"#;

/// Microsoft SQL Server dialect.
#[derive(Debug, Clone, Default)]
pub struct MssqlDialect;

impl MssqlDialect {
    /// Create a new MSSQL dialect instance.
    pub fn new() -> Self {
        Self
    }

    /// Build the streaming SELECT for one object.
    ///
    /// The filter is wrapped in parentheses and otherwise passed through
    /// untouched. The closing parenthesis goes on its own line so a filter
    /// ending in a `--` comment stays valid. `order_by` columns are quoted; an empty slice leaves rows
    /// in server order.
    pub fn build_select(
        &self,
        object: &ResolvedObject,
        filter: Option<&str>,
        order_by: &[String],
    ) -> Result<String> {
        let mut sql = format!("SELECT * FROM {}", object.quoted()?);

        if let Some(filter) = filter.map(str::trim).filter(|f| !f.is_empty()) {
            sql.push_str(&format!(" WHERE ({}\n)", filter));
        }

        if !order_by.is_empty() {
            let cols = order_by
                .iter()
                .map(|c| quote_mssql(c))
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&cols.join(", "));
        }

        Ok(sql)
    }
}
