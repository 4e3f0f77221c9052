//! Object reference resolution, identifier validation and quoting.
//!
//! SQL identifiers cannot be passed as query parameters, so every schema and
//! object name that ends up in generated SQL goes through
//! [`validate_identifier`] and [`quote_mssql`] first.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ExportError, Result};

/// Maximum identifier length (SQL Server `sysname` is 128 characters).
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// A fully qualified source object, derived from a configured reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedObject {
    /// Schema name (unquoted).
    pub schema: String,
    /// Table or view name (unquoted).
    pub object: String,
}

impl ResolvedObject {
    /// Build a resolved object from already-split parts.
    pub fn new(schema: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            object: object.into(),
        }
    }

    /// Bracket-quoted `[schema].[object]` form for SQL Server.
    pub fn quoted(&self) -> Result<String> {
        qualify_mssql(&self.schema, &self.object)
    }
}

impl fmt::Display for ResolvedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.object)
    }
}

/// Resolve a raw object reference into `(schema, object)`.
///
/// The reference is split on the first `.`; without one the object lives in
/// `default_schema`. Each part is trimmed and may be written in brackets
/// (`[sales].[Orders]`).
///
/// # Examples
///
/// ```ignore
/// let r = resolve("Employees", "dbo")?;
/// assert_eq!(r, ResolvedObject::new("dbo", "Employees"));
///
/// let r = resolve("sales.vw_OrderDetails", "dbo")?;
/// assert_eq!(r, ResolvedObject::new("sales", "vw_OrderDetails"));
/// ```
///
/// # Errors
///
/// Returns `ExportError::InvalidConfiguration` for an empty reference, an
/// empty schema or object part, or a part that fails [`validate_identifier`].
pub fn resolve(raw: &str, default_schema: &str) -> Result<ResolvedObject> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ExportError::InvalidConfiguration(
            "object reference cannot be empty".to_string(),
        ));
    }

    let (schema, object) = match raw.split_once('.') {
        Some((schema, object)) => (unbracket(schema), unbracket(object)),
        None => (unbracket(default_schema), unbracket(raw)),
    };

    if schema.is_empty() || object.is_empty() {
        return Err(ExportError::InvalidConfiguration(format!(
            "object reference {:?} must be 'object' or 'schema.object'",
            raw
        )));
    }

    validate_identifier(schema).map_err(as_invalid)?;
    validate_identifier(object).map_err(as_invalid)?;

    Ok(ResolvedObject::new(schema, object))
}

fn unbracket(part: &str) -> &str {
    let part = part.trim();
    part.strip_prefix('[')
        .and_then(|p| p.strip_suffix(']'))
        .map(str::trim)
        .unwrap_or(part)
}

fn as_invalid(err: ExportError) -> ExportError {
    match err {
        ExportError::Config(msg) => ExportError::InvalidConfiguration(msg),
        other => other,
    }
}

/// Validate an identifier for security issues.
///
/// Rejects:
/// - Empty identifiers
/// - Identifiers containing null bytes (injection vector)
/// - Identifiers exceeding maximum length
///
/// # Errors
///
/// Returns `ExportError::Config` for invalid identifiers with a descriptive message.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ExportError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(ExportError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(ExportError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} characters: {:?}",
            MAX_IDENTIFIER_LENGTH, name
        )));
    }

    Ok(())
}

/// Quote a SQL Server identifier using brackets.
///
/// Escapes closing brackets by doubling them and wraps in brackets.
///
/// ```ignore
/// assert_eq!(quote_mssql("users")?, "[users]");
/// assert_eq!(quote_mssql("table]name")?, "[table]]name]");
/// ```
pub fn quote_mssql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("[{}]", name.replace(']', "]]")))
}

/// Qualify a SQL Server object name with its schema.
pub fn qualify_mssql(schema: &str, object: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_mssql(schema)?, quote_mssql(object)?))
}
