//! Document store contract and in-memory reference implementation.
//!
//! The sync engine treats the durable store as an external
//! collaborator; [`DocumentStore`] is the narrow contract it consumes:
//! point reads and writes by primary key plus ordered range scans over
//! the primary key or a declared secondary index.
//!
//! # Transactions
//!
//! Every method takes an optional [`TxnHandle`]. Passing `None` means
//! "auto-commit this single operation"; a store that supports grouped
//! commits applies all operations carrying the same handle atomically.
//! [`MemoryStore`] accepts handles for contract parity but commits
//! each operation immediately.

use crate::document::{cmp_values, Document};
use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::schema::TableSchema;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque handle identifying an ambient store transaction.
///
/// Handles are passed explicitly to every store call that should
/// participate; the store itself holds no transaction context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxnHandle(u64);

impl TxnHandle {
    /// Allocates a fresh, process-unique handle.
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TxnHandle(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw handle id.
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl Default for TxnHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Range constraint for a scan, matched against the scanned field.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanRange {
    /// No constraint.
    All,
    /// Field equals the value.
    Only(Value),
    /// Field strictly above the value.
    Above(Value),
    /// Field strictly below the value.
    Below(Value),
    /// String field starts with the prefix.
    StartsWith(String),
}

impl ScanRange {
    /// Tests a single field value against the range.
    pub fn matches(&self, value: &Value) -> bool {
        use std::cmp::Ordering;
        match self {
            ScanRange::All => true,
            ScanRange::Only(target) => value == target,
            ScanRange::Above(bound) => cmp_values(value, bound) == Ordering::Greater,
            ScanRange::Below(bound) => cmp_values(value, bound) == Ordering::Less,
            ScanRange::StartsWith(prefix) => {
                value.as_str().is_some_and(|s| s.starts_with(prefix.as_str()))
            }
        }
    }

    /// Tests a document field, honoring multi-entry array semantics:
    /// an array field matches if any element matches.
    pub fn matches_field(&self, value: &Value, multi_entry: bool) -> bool {
        match (multi_entry, value) {
            (true, Value::Array(elements)) => elements.iter().any(|e| self.matches(e)),
            _ => self.matches(value),
        }
    }
}

/// Scan direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Ascending index order.
    #[default]
    Forward,
    /// Descending index order.
    Reverse,
}

/// The narrow contract the sync engine requires from a local store.
///
/// # Invariants
///
/// - `put` with no key on an auto-increment table assigns the key and
///   injects it into the document's primary-key field
/// - `scan` returns documents ordered by the scanned index
/// - scanning an undeclared index fails with
///   [`CoreError::IndexNotFound`] so callers can degrade
/// - writes are single-writer-per-operation: a method call completes
///   before another writer observes its effects
pub trait DocumentStore: Send + Sync {
    /// Registers a table and its schema. Idempotent for an identical
    /// schema.
    fn register_table(&self, table: &str, schema: &TableSchema) -> CoreResult<()>;

    /// Reads a document by primary key.
    fn get(&self, table: &str, key: &Key, txn: Option<&TxnHandle>)
        -> CoreResult<Option<Document>>;

    /// Writes a document, returning the key it was stored under.
    ///
    /// With `key: None`, an auto-increment table assigns the next key;
    /// otherwise the key is extracted from the document's primary-key
    /// field.
    fn put(
        &self,
        table: &str,
        key: Option<&Key>,
        doc: Document,
        txn: Option<&TxnHandle>,
    ) -> CoreResult<Key>;

    /// Deletes a document by primary key. Deleting an absent key is a
    /// no-op.
    fn delete(&self, table: &str, key: &Key, txn: Option<&TxnHandle>) -> CoreResult<()>;

    /// Removes every document in the table.
    fn clear(&self, table: &str, txn: Option<&TxnHandle>) -> CoreResult<()>;

    /// Ordered range scan.
    ///
    /// `index: None` scans the primary key. `offset` entries are
    /// skipped in scan order before up to `limit` documents are
    /// collected.
    fn scan(
        &self,
        table: &str,
        index: Option<&str>,
        range: &ScanRange,
        direction: Direction,
        offset: usize,
        limit: Option<usize>,
        txn: Option<&TxnHandle>,
    ) -> CoreResult<Vec<Document>>;

    /// Number of documents in the table.
    fn count(&self, table: &str, txn: Option<&TxnHandle>) -> CoreResult<usize>;

    /// Returns the registered schema for a table.
    fn schema(&self, table: &str) -> CoreResult<TableSchema>;
}

struct TableData {
    schema: TableSchema,
    rows: BTreeMap<Key, Document>,
    next_auto: i64,
}

/// An in-memory document store.
///
/// Suitable for unit tests, integration tests, and ephemeral
/// databases. Thread-safe; each operation commits immediately
/// regardless of any [`TxnHandle`] passed.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, TableData>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_table<R>(
        &self,
        table: &str,
        f: impl FnOnce(&TableData) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let tables = self.tables.read();
        let data = tables
            .get(table)
            .ok_or_else(|| CoreError::UnknownTable(table.to_string()))?;
        f(data)
    }

    fn with_table_mut<R>(
        &self,
        table: &str,
        f: impl FnOnce(&mut TableData) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let mut tables = self.tables.write();
        let data = tables
            .get_mut(table)
            .ok_or_else(|| CoreError::UnknownTable(table.to_string()))?;
        f(data)
    }

    fn check_unique_indexes(data: &TableData, key: &Key, doc: &Document) -> CoreResult<()> {
        for index in data.schema.indexes.iter().filter(|i| i.unique) {
            let Some(value) = doc.get(&index.name) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let collision = data
                .rows
                .iter()
                .any(|(k, row)| k != key && row.get(&index.name) == Some(value));
            if collision {
                return Err(CoreError::Storage(format!(
                    "unique index '{}' violated by value {value}",
                    index.name
                )));
            }
        }
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    fn register_table(&self, table: &str, schema: &TableSchema) -> CoreResult<()> {
        let mut tables = self.tables.write();
        if let Some(existing) = tables.get(table) {
            if existing.schema != *schema {
                return Err(CoreError::Storage(format!(
                    "table '{table}' already registered with a different schema"
                )));
            }
            return Ok(());
        }
        tables.insert(
            table.to_string(),
            TableData {
                schema: schema.clone(),
                rows: BTreeMap::new(),
                next_auto: 1,
            },
        );
        Ok(())
    }

    fn get(
        &self,
        table: &str,
        key: &Key,
        _txn: Option<&TxnHandle>,
    ) -> CoreResult<Option<Document>> {
        self.with_table(table, |data| Ok(data.rows.get(key).cloned()))
    }

    fn put(
        &self,
        table: &str,
        key: Option<&Key>,
        mut doc: Document,
        _txn: Option<&TxnHandle>,
    ) -> CoreResult<Key> {
        self.with_table_mut(table, |data| {
            let pk = data.schema.primary_key.clone();

            let key = match key {
                Some(k) if k.is_temp() => return Err(CoreError::TempKey),
                Some(k) => k.clone(),
                None => match doc.get(&pk).and_then(Key::from_value) {
                    Some(k) => k,
                    None if data.schema.auto_increment => {
                        let assigned = Key::Int(data.next_auto);
                        data.next_auto += 1;
                        assigned
                    }
                    None => return Err(CoreError::KeyMissing(table.to_string())),
                },
            };

            doc.insert(pk, key.to_value()?);
            if let Key::Int(i) = key {
                // Keep assigned keys ahead of any explicit integer key.
                data.next_auto = data.next_auto.max(i + 1);
            }

            Self::check_unique_indexes(data, &key, &doc)?;
            data.rows.insert(key.clone(), doc);
            Ok(key)
        })
    }

    fn delete(&self, table: &str, key: &Key, _txn: Option<&TxnHandle>) -> CoreResult<()> {
        self.with_table_mut(table, |data| {
            data.rows.remove(key);
            Ok(())
        })
    }

    fn clear(&self, table: &str, _txn: Option<&TxnHandle>) -> CoreResult<()> {
        self.with_table_mut(table, |data| {
            data.rows.clear();
            Ok(())
        })
    }

    fn scan(
        &self,
        table: &str,
        index: Option<&str>,
        range: &ScanRange,
        direction: Direction,
        offset: usize,
        limit: Option<usize>,
        _txn: Option<&TxnHandle>,
    ) -> CoreResult<Vec<Document>> {
        self.with_table(table, |data| {
            let pk = data.schema.primary_key.as_str();
            let field = index.unwrap_or(pk);
            let multi_entry = match data.schema.index(field) {
                Some(spec) => spec.multi_entry,
                None if field == pk => false,
                None => {
                    return Err(CoreError::IndexNotFound {
                        table: table.to_string(),
                        index: field.to_string(),
                    })
                }
            };

            // Primary-key scans use BTreeMap order directly; secondary
            // index scans sort matching rows by the indexed field with
            // primary-key order as the tiebreak.
            let mut matched: Vec<&Document> = data
                .rows
                .values()
                .filter(|doc| {
                    let value = doc.get(field).unwrap_or(&Value::Null);
                    range.matches_field(value, multi_entry)
                })
                .collect();

            if field != pk {
                matched.sort_by(|a, b| {
                    cmp_values(
                        a.get(field).unwrap_or(&Value::Null),
                        b.get(field).unwrap_or(&Value::Null),
                    )
                });
            }

            if direction == Direction::Reverse {
                matched.reverse();
            }

            let taken = matched
                .into_iter()
                .skip(offset)
                .take(limit.unwrap_or(usize::MAX))
                .cloned()
                .collect();
            Ok(taken)
        })
    }

    fn count(&self, table: &str, _txn: Option<&TxnHandle>) -> CoreResult<usize> {
        self.with_table(table, |data| Ok(data.rows.len()))
    }

    fn schema(&self, table: &str) -> CoreResult<TableSchema> {
        self.with_table(table, |data| Ok(data.schema.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with(schema: &str) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .register_table("users", &TableSchema::parse(schema).unwrap())
            .unwrap();
        store
    }

    fn doc(pairs: &[(&str, Value)]) -> Document {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn auto_increment_assigns_sequential_keys() {
        let store = store_with("++id,name");

        let k1 = store
            .put("users", None, doc(&[("name", json!("a"))]), None)
            .unwrap();
        let k2 = store
            .put("users", None, doc(&[("name", json!("b"))]), None)
            .unwrap();

        assert_eq!(k1, Key::Int(1));
        assert_eq!(k2, Key::Int(2));

        // Assigned key is injected into the document.
        let stored = store.get("users", &k1, None).unwrap().unwrap();
        assert_eq!(stored.get("id"), Some(&json!(1)));
    }

    #[test]
    fn explicit_int_key_advances_counter() {
        let store = store_with("++id");
        store
            .put("users", Some(&Key::Int(10)), Document::new(), None)
            .unwrap();
        let next = store.put("users", None, Document::new(), None).unwrap();
        assert_eq!(next, Key::Int(11));
    }

    #[test]
    fn missing_key_without_auto_increment_fails() {
        let store = store_with("id,name");
        let result = store.put("users", None, doc(&[("name", json!("x"))]), None);
        assert!(matches!(result, Err(CoreError::KeyMissing(_))));
    }

    #[test]
    fn temp_keys_are_rejected() {
        let store = store_with("++id");
        let result = store.put("users", Some(&Key::Temp(1)), Document::new(), None);
        assert!(matches!(result, Err(CoreError::TempKey)));
    }

    #[test]
    fn delete_and_clear() {
        let store = store_with("++id");
        let key = store.put("users", None, Document::new(), None).unwrap();
        store.delete("users", &key, None).unwrap();
        assert!(store.get("users", &key, None).unwrap().is_none());
        // Deleting again is a no-op.
        store.delete("users", &key, None).unwrap();

        store.put("users", None, Document::new(), None).unwrap();
        store.clear("users", None).unwrap();
        assert_eq!(store.count("users", None).unwrap(), 0);
    }

    #[test]
    fn scan_secondary_index_ordered() {
        let store = store_with("++id,age");
        for age in [30, 10, 20] {
            store
                .put("users", None, doc(&[("age", json!(age))]), None)
                .unwrap();
        }

        let rows = store
            .scan(
                "users",
                Some("age"),
                &ScanRange::Above(json!(5)),
                Direction::Forward,
                0,
                None,
                None,
            )
            .unwrap();
        let ages: Vec<i64> = rows.iter().map(|d| d["age"].as_i64().unwrap()).collect();
        assert_eq!(ages, vec![10, 20, 30]);

        let rows = store
            .scan(
                "users",
                Some("age"),
                &ScanRange::Above(json!(10)),
                Direction::Reverse,
                0,
                Some(1),
                None,
            )
            .unwrap();
        assert_eq!(rows[0]["age"], json!(30));
    }

    #[test]
    fn scan_offset_and_limit() {
        let store = store_with("++id");
        for _ in 0..5 {
            store.put("users", None, Document::new(), None).unwrap();
        }
        let rows = store
            .scan(
                "users",
                None,
                &ScanRange::All,
                Direction::Forward,
                2,
                Some(2),
                None,
            )
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], json!(3));
    }

    #[test]
    fn scan_unknown_index_degrades() {
        let store = store_with("++id,age");
        let result = store.scan(
            "users",
            Some("name"),
            &ScanRange::All,
            Direction::Forward,
            0,
            None,
            None,
        );
        assert!(matches!(result, Err(e) if e.is_index_not_found()));
    }

    #[test]
    fn starts_with_range() {
        let store = store_with("++id,name");
        for name in ["alice", "amber", "bob"] {
            store
                .put("users", None, doc(&[("name", json!(name))]), None)
                .unwrap();
        }
        let rows = store
            .scan(
                "users",
                Some("name"),
                &ScanRange::StartsWith("a".into()),
                Direction::Forward,
                0,
                None,
                None,
            )
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn multi_entry_index_matches_any_element() {
        let store = store_with("++id,*tags");
        store
            .put("users", None, doc(&[("tags", json!(["x", "y"]))]), None)
            .unwrap();
        store
            .put("users", None, doc(&[("tags", json!(["z"]))]), None)
            .unwrap();

        let rows = store
            .scan(
                "users",
                Some("tags"),
                &ScanRange::Only(json!("y")),
                Direction::Forward,
                0,
                None,
                None,
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn unique_index_enforced() {
        let store = store_with("++id,&email");
        store
            .put("users", None, doc(&[("email", json!("a@x"))]), None)
            .unwrap();
        let result = store.put("users", None, doc(&[("email", json!("a@x"))]), None);
        assert!(matches!(result, Err(CoreError::Storage(_))));

        // Re-putting the same document under its own key is fine.
        store
            .put(
                "users",
                Some(&Key::Int(1)),
                doc(&[("email", json!("a@x"))]),
                None,
            )
            .unwrap();
    }

    #[test]
    fn register_is_idempotent_for_same_schema() {
        let store = store_with("++id,age");
        store
            .register_table("users", &TableSchema::parse("++id,age").unwrap())
            .unwrap();
        assert!(store
            .register_table("users", &TableSchema::parse("++id,name").unwrap())
            .is_err());
    }
}
