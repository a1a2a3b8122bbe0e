//! Database: a named registry of tables over one store.

use crate::error::{CoreError, CoreResult};
use crate::store::DocumentStore;
use crate::table::Table;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A collection of tables sharing one [`DocumentStore`].
pub struct Database {
    name: String,
    store: Arc<dyn DocumentStore>,
    tables: RwLock<HashMap<String, Arc<Table>>>,
}

impl Database {
    /// Creates a database over a store.
    pub fn new(name: impl Into<String>, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            name: name.into(),
            store,
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The shared store.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Defines a table, registering its schema with the store.
    ///
    /// Defining the same table twice returns the existing handle; the
    /// store rejects a conflicting schema.
    pub fn define_table(&self, name: &str, schema: &str) -> CoreResult<Arc<Table>> {
        if let Some(existing) = self.tables.read().get(name) {
            return Ok(existing.clone());
        }
        let table = Arc::new(Table::new(name, schema, self.store.clone())?);
        let mut tables = self.tables.write();
        Ok(tables
            .entry(name.to_string())
            .or_insert_with(|| table)
            .clone())
    }

    /// Looks up a defined table.
    pub fn table(&self, name: &str) -> CoreResult<Arc<Table>> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownTable(name.to_string()))
    }

    /// All defined tables.
    pub fn tables(&self) -> Vec<Arc<Table>> {
        self.tables.read().values().cloned().collect()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("tables", &self.tables.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn define_is_idempotent() {
        let db = Database::new("app", Arc::new(MemoryStore::new()));
        let a = db.define_table("users", "++id,name").unwrap();
        let b = db.define_table("users", "++id,name").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn unknown_table_is_an_error() {
        let db = Database::new("app", Arc::new(MemoryStore::new()));
        assert!(matches!(
            db.table("nope"),
            Err(CoreError::UnknownTable(_))
        ));
    }

    #[test]
    fn tables_share_the_store() {
        let db = Database::new("app", Arc::new(MemoryStore::new()));
        let users = db.define_table("users", "++id").unwrap();
        assert!(Arc::ptr_eq(users.store(), db.store()));
    }
}
