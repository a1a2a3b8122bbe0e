//! Table schema string parsing.
//!
//! A table is declared by a comma-separated schema string. The first
//! entry names the primary key, optionally prefixed with `++`
//! (auto-generated) or `&` (unique). Subsequent entries name secondary
//! indexes, optionally prefixed with `&` (unique) or `*` (multi-entry,
//! indexing each element of an array field).
//!
//! ```text
//! "++id,name,&email,*tags"
//! ```

use crate::error::{CoreError, CoreResult};

/// A declared secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Field name the index covers.
    pub name: String,
    /// Whether values must be unique.
    pub unique: bool,
    /// Whether array fields index each element.
    pub multi_entry: bool,
}

/// Parsed shape of one table: primary key plus secondary indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Primary key field name.
    pub primary_key: String,
    /// Whether the store assigns keys (`++` prefix).
    pub auto_increment: bool,
    /// Whether the primary key was declared unique (`&` prefix).
    pub unique_primary: bool,
    /// Secondary indexes in declaration order.
    pub indexes: Vec<IndexSpec>,
}

impl TableSchema {
    /// Parses a schema string.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Schema`] for an empty primary key or a
    /// duplicate index name.
    pub fn parse(schema: &str) -> CoreResult<Self> {
        let mut entries = schema.split(',').map(str::trim);

        let pk_def = entries
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CoreError::schema(schema, "missing primary key"))?;

        let (auto_increment, unique_primary, primary_key) =
            if let Some(rest) = pk_def.strip_prefix("++") {
                (true, false, rest)
            } else if let Some(rest) = pk_def.strip_prefix('&') {
                (false, true, rest)
            } else {
                (false, false, pk_def)
            };

        if primary_key.is_empty() {
            return Err(CoreError::schema(schema, "empty primary key name"));
        }

        let mut indexes = Vec::new();
        for entry in entries {
            if entry.is_empty() {
                continue;
            }
            let (unique, multi_entry, name) = if let Some(rest) = entry.strip_prefix('&') {
                (true, false, rest)
            } else if let Some(rest) = entry.strip_prefix('*') {
                (false, true, rest)
            } else {
                (false, false, entry)
            };

            if name == primary_key || indexes.iter().any(|i: &IndexSpec| i.name == name) {
                return Err(CoreError::schema(
                    schema,
                    format!("duplicate index '{name}'"),
                ));
            }

            indexes.push(IndexSpec {
                name: name.to_string(),
                unique,
                multi_entry,
            });
        }

        Ok(Self {
            primary_key: primary_key.to_string(),
            auto_increment,
            unique_primary,
            indexes,
        })
    }

    /// Looks up a declared index by field name.
    pub fn index(&self, name: &str) -> Option<&IndexSpec> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Returns true if `name` is the primary key or a declared index.
    pub fn has_index(&self, name: &str) -> bool {
        name == self.primary_key || self.index(name).is_some()
    }
}
