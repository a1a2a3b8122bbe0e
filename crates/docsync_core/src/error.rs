//! Error types for the core document store.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the local document store.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A schema rejected a document before any write took place.
    #[error("validation failed for table '{table}': {message}")]
    Validation {
        /// Table whose validator rejected the document.
        table: String,
        /// Validator message.
        message: String,
    },

    /// The underlying store failed; the write did not complete.
    #[error("storage error: {0}")]
    Storage(String),

    /// The requested table is not registered with the store.
    #[error("unknown table '{0}'")]
    UnknownTable(String),

    /// The requested secondary index does not exist on the table.
    ///
    /// The query engine treats this as a signal to degrade to the
    /// memory fallback rather than failing the query.
    #[error("index '{index}' not found on table '{table}'")]
    IndexNotFound {
        /// Table that was scanned.
        table: String,
        /// Missing index name.
        index: String,
    },

    /// A table schema string could not be parsed.
    #[error("invalid schema '{schema}': {message}")]
    Schema {
        /// The offending schema string.
        schema: String,
        /// What was wrong with it.
        message: String,
    },

    /// An operation required a primary key but none was available.
    #[error("document in table '{0}' has no primary key and none was supplied")]
    KeyMissing(String),

    /// A temporary overlay key escaped the overlay.
    ///
    /// Temp keys exist only between an un-keyed optimistic add and the
    /// transaction commit that strips them.
    #[error("temporary key cannot be persisted or serialized")]
    TempKey,

    /// A transaction is already active on this table.
    #[error("a transaction is already active on table '{0}'")]
    TransactionActive(String),

    /// `update` was called for a key that does not exist with a
    /// non-upsertable change set.
    #[error("key not found in table '{0}'")]
    KeyNotFound(String),
}

impl CoreError {
    /// Creates a validation error.
    pub fn validation(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Creates a schema-parse error.
    pub fn schema(schema: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            schema: schema.into(),
            message: message.into(),
        }
    }

    /// Returns true if this is the index-missing signal that lets the
    /// query engine degrade to the memory fallback.
    pub fn is_index_not_found(&self) -> bool {
        matches!(self, CoreError::IndexNotFound { .. })
    }
}
