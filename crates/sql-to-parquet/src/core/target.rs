//! Export targets.

use serde::{Deserialize, Serialize};

/// One configured object to export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportTarget {
    /// Output file stem.
    pub name: String,
    /// Raw `schema.object` or `object` reference.
    pub object_ref: String,
    /// Optional source-side row filter.
    pub filter: Option<String>,
}

impl ExportTarget {
    pub fn new(
        name: impl Into<String>,
        object_ref: impl Into<String>,
        filter: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            object_ref: object_ref.into(),
            filter,
        }
    }
}
