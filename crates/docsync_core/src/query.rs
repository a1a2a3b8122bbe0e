//! Query execution over a table.
//!
//! A query is one or more range conditions (union semantics), an
//! optional opaque predicate, ordering, and slicing. Execution picks
//! the cheapest of three paths:
//!
//! 1. **Native cursor.** Exactly one condition, no predicate, ordering
//!    absent or compatible with the scanned field: offset and limit
//!    push straight down into [`crate::DocumentStore::scan`].
//! 2. **Filtered cursor.** Same shape plus a predicate: scan the range
//!    in order, skip `offset` matches manually, stop at `limit`.
//! 3. **Memory fallback.** Everything else: scan each condition's
//!    range, union de-duplicated by primary key, filter, sort, slice.
//!
//! A condition on an undeclared index is not an error. It degrades to
//! a memory scan with a warning, so a renamed index slows queries down
//! instead of breaking callers.
//!
//! A visible optimistic overlay merges in last, after slicing: rows
//! with pending deletes drop out, pending adds and puts that match the
//! query are inserted even when that exceeds `limit`. Optimistic
//! visibility beats strict pagination.

use crate::document::{cmp_values, Document};
use crate::error::CoreResult;
use crate::key::Key;
use crate::overlay::OverlayOpKind;
use crate::store::{Direction, ScanRange};
use crate::table::Table;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

type Predicate = Arc<dyn Fn(&Document) -> bool + Send + Sync>;

#[derive(Debug, Clone)]
struct Condition {
    field: String,
    range: ScanRange,
}

/// Fluent query builder. Created by [`Table::find`] or
/// [`Table::where_`].
#[derive(Clone)]
pub struct Query<'a> {
    table: &'a Table,
    conditions: Vec<Condition>,
    predicate: Option<Predicate>,
    sort_field: Option<String>,
    direction: Direction,
    offset: usize,
    limit: Option<usize>,
}

/// A condition under construction; terminates back into a [`Query`].
pub struct WhereClause<'a> {
    query: Query<'a>,
    field: String,
}

impl Table {
    /// Starts an unconditioned query over this table.
    pub fn find(&self) -> Query<'_> {
        Query {
            table: self,
            conditions: Vec::new(),
            predicate: None,
            sort_field: None,
            direction: Direction::Forward,
            offset: 0,
            limit: None,
        }
    }

    /// Starts a query with a condition on `field`.
    pub fn where_(&self, field: impl Into<String>) -> WhereClause<'_> {
        WhereClause {
            query: self.find(),
            field: field.into(),
        }
    }
}

impl<'a> WhereClause<'a> {
    fn close(mut self, range: ScanRange) -> Query<'a> {
        self.query.conditions.push(Condition {
            field: self.field,
            range,
        });
        self.query
    }

    /// Field equals the value.
    pub fn equals(self, value: impl Into<Value>) -> Query<'a> {
        self.close(ScanRange::Only(value.into()))
    }

    /// Field strictly above the value.
    pub fn above(self, value: impl Into<Value>) -> Query<'a> {
        self.close(ScanRange::Above(value.into()))
    }

    /// Field strictly below the value.
    pub fn below(self, value: impl Into<Value>) -> Query<'a> {
        self.close(ScanRange::Below(value.into()))
    }

    /// String field starts with the prefix.
    pub fn starts_with(self, prefix: impl Into<String>) -> Query<'a> {
        self.close(ScanRange::StartsWith(prefix.into()))
    }
}

impl<'a> Query<'a> {
    /// Adds a union condition: a document matches when any condition
    /// matches.
    pub fn or(self, field: impl Into<String>) -> WhereClause<'a> {
        WhereClause {
            query: self,
            field: field.into(),
        }
    }

    /// Adds an opaque predicate, evaluated in memory on every
    /// candidate.
    pub fn filter(mut self, predicate: impl Fn(&Document) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Sorts results by a field (defaults to scan order).
    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.sort_field = Some(field.into());
        self
    }

    /// Reverses the result order.
    pub fn reverse(mut self) -> Self {
        self.direction = Direction::Reverse;
        self
    }

    /// Skips the first `n` results.
    pub fn offset(mut self, n: usize) -> Self {
        self.offset = n;
        self
    }

    /// Caps the number of results.
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Executes the query.
    pub fn to_vec(&self) -> CoreResult<Vec<Document>> {
        let rows = self.base_rows()?;
        Ok(self.merge_overlay(rows))
    }

    /// Executes and returns the first result, if any.
    pub fn first(&self) -> CoreResult<Option<Document>> {
        let mut narrowed = self.clone();
        narrowed.limit = Some(1);
        Ok(narrowed.to_vec()?.into_iter().next())
    }

    /// Number of matching documents.
    pub fn count(&self) -> CoreResult<usize> {
        let plain = self.conditions.is_empty()
            && self.predicate.is_none()
            && self.offset == 0
            && self.limit.is_none()
            && self.table.overlay_snapshot().is_none();
        if plain {
            return self.table.count(None);
        }
        Ok(self.to_vec()?.len())
    }

    /// Stored rows before overlay merge.
    fn base_rows(&self) -> CoreResult<Vec<Document>> {
        if let [condition] = self.conditions.as_slice() {
            if self.sort_compatible(&condition.field) {
                match self.cursor_rows(condition) {
                    Ok(rows) => return Ok(rows),
                    Err(e) if e.is_index_not_found() => {
                        tracing::warn!(
                            table = self.table.name(),
                            index = %condition.field,
                            "index not found, falling back to memory scan"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        self.memory_rows()
    }

    fn sort_compatible(&self, scanned: &str) -> bool {
        match &self.sort_field {
            None => true,
            Some(field) => field == scanned || *field == self.table.schema().primary_key,
        }
    }

    /// Paths 1 and 2: a single ordered index scan, with pushdown when
    /// no predicate intervenes.
    fn cursor_rows(&self, condition: &Condition) -> CoreResult<Vec<Document>> {
        let index = self.index_for(&condition.field);

        let Some(predicate) = &self.predicate else {
            return self.table.store().scan(
                self.table.name(),
                index,
                &condition.range,
                self.direction,
                self.offset,
                self.limit,
                None,
            );
        };

        // Filtered cursor: offset counts matches, not scanned rows.
        let scanned = self.table.store().scan(
            self.table.name(),
            index,
            &condition.range,
            self.direction,
            0,
            None,
            None,
        )?;
        let limit = self.limit.unwrap_or(usize::MAX);
        let mut rows = Vec::new();
        let mut skipped = 0;
        for doc in scanned {
            if !predicate(&doc) {
                continue;
            }
            if skipped < self.offset {
                skipped += 1;
                continue;
            }
            rows.push(doc);
            if rows.len() == limit {
                break;
            }
        }
        Ok(rows)
    }

    /// Path 3: per-condition ranges, union de-dup, sort, slice.
    fn memory_rows(&self) -> CoreResult<Vec<Document>> {
        let pk = self.table.schema().primary_key.clone();

        let mut rows: Vec<Document> = Vec::new();
        if self.conditions.is_empty() {
            rows = self.full_scan()?;
        } else {
            let mut seen: HashSet<Key> = HashSet::new();
            for condition in &self.conditions {
                for doc in self.condition_rows(condition)? {
                    match doc.get(&pk).and_then(Key::from_value) {
                        Some(key) => {
                            if seen.insert(key) {
                                rows.push(doc);
                            }
                        }
                        None => rows.push(doc),
                    }
                }
            }
        }

        if let Some(predicate) = &self.predicate {
            rows.retain(|doc| predicate(doc));
        }

        let sort_field = self.sort_field.clone().unwrap_or_else(|| pk.clone());
        rows.sort_by(|a, b| {
            let av = a.get(&sort_field).unwrap_or(&Value::Null);
            let bv = b.get(&sort_field).unwrap_or(&Value::Null);
            cmp_values(av, bv)
        });
        if self.direction == Direction::Reverse {
            rows.reverse();
        }

        Ok(rows
            .into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect())
    }

    /// One condition's candidates, degrading to a memory filter over a
    /// full scan when the index is undeclared.
    fn condition_rows(&self, condition: &Condition) -> CoreResult<Vec<Document>> {
        let index = self.index_for(&condition.field);
        match self.table.store().scan(
            self.table.name(),
            index,
            &condition.range,
            Direction::Forward,
            0,
            None,
            None,
        ) {
            Ok(rows) => Ok(rows),
            Err(e) if e.is_index_not_found() => {
                tracing::warn!(
                    table = self.table.name(),
                    index = %condition.field,
                    "index not found, falling back to memory scan"
                );
                let mut rows = self.full_scan()?;
                rows.retain(|doc| condition_matches(self.table, condition, doc));
                Ok(rows)
            }
            Err(e) => Err(e),
        }
    }

    fn index_for<'f>(&self, field: &'f str) -> Option<&'f str> {
        if field == self.table.schema().primary_key {
            None
        } else {
            Some(field)
        }
    }

    fn full_scan(&self) -> CoreResult<Vec<Document>> {
        self.table.store().scan(
            self.table.name(),
            None,
            &ScanRange::All,
            Direction::Forward,
            0,
            None,
            None,
        )
    }

    /// Applies a visible overlay to an already-sliced result set.
    fn merge_overlay(&self, rows: Vec<Document>) -> Vec<Document> {
        let Some(entries) = self
            .table
            .overlay_snapshot()
            .filter(|(_, visible)| *visible)
            .map(|(entries, _)| entries)
        else {
            return rows;
        };

        let pk = &self.table.schema().primary_key;
        let mut out: Vec<(Option<Key>, Document)> = rows
            .into_iter()
            .map(|doc| (doc.get(pk).and_then(Key::from_value), doc))
            .collect();

        for (key, op) in entries {
            match op.kind {
                OverlayOpKind::Delete => {
                    out.retain(|(k, _)| k.as_ref() != Some(&key));
                }
                OverlayOpKind::Add | OverlayOpKind::Put => {
                    let doc = op.value.unwrap_or_default();
                    if !self.matches(&doc) {
                        out.retain(|(k, _)| k.as_ref() != Some(&key));
                        continue;
                    }
                    match out.iter().position(|(k, _)| k.as_ref() == Some(&key)) {
                        Some(pos) => out[pos].1 = doc,
                        None => out.push((Some(key), doc)),
                    }
                }
            }
        }

        let mut rows: Vec<Document> = out.into_iter().map(|(_, doc)| doc).collect();
        if let Some(sort_field) = &self.sort_field {
            rows.sort_by(|a, b| {
                let av = a.get(sort_field).unwrap_or(&Value::Null);
                let bv = b.get(sort_field).unwrap_or(&Value::Null);
                cmp_values(av, bv)
            });
            if self.direction == Direction::Reverse {
                rows.reverse();
            }
        }
        rows
    }

    /// Full match test, used for overlay documents that never passed
    /// through a store scan.
    fn matches(&self, doc: &Document) -> bool {
        let conditions_ok = self.conditions.is_empty()
            || self
                .conditions
                .iter()
                .any(|c| condition_matches(self.table, c, doc));
        conditions_ok && self.predicate.as_ref().is_none_or(|p| p(doc))
    }
}

fn condition_matches(table: &Table, condition: &Condition, doc: &Document) -> bool {
    let multi = table
        .schema()
        .index(&condition.field)
        .is_some_and(|i| i.multi_entry);
    match doc.get(&condition.field) {
        Some(value) => condition.range.matches_field(value, multi),
        None => matches!(condition.range, ScanRange::All),
    }
}

impl std::fmt::Debug for Query<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("table", &self.table.name())
            .field("conditions", &self.conditions)
            .field("has_predicate", &self.predicate.is_some())
            .field("sort_field", &self.sort_field)
            .field("offset", &self.offset)
            .field("limit", &self.limit)
            .finish()
    }
}
