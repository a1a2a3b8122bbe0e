//! Document representation and reserved fields.
//!
//! A document is a JSON object. Two reserved, underscore-prefixed
//! fields carry sync metadata:
//!
//! - `_rev` — revision id, `"{generation}-{contentHash}"`
//! - `_lastModified` — epoch milliseconds of the last local write
//!
//! Underscore-prefixed fields are excluded from the revision content
//! hash so that stamping a revision does not change the next hash.

use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// A document: field name to JSON value.
pub type Document = serde_json::Map<String, Value>;

/// Reserved field holding the revision id.
pub const REV_FIELD: &str = "_rev";

/// Reserved field holding the last-modified timestamp (epoch millis).
pub const LAST_MODIFIED_FIELD: &str = "_lastModified";

/// Returns the document's revision, if set.
pub fn revision_of(doc: &Document) -> Option<&str> {
    doc.get(REV_FIELD).and_then(Value::as_str)
}

/// Returns the document's last-modified timestamp in epoch millis.
pub fn last_modified_of(doc: &Document) -> Option<f64> {
    doc.get(LAST_MODIFIED_FIELD).and_then(Value::as_f64)
}

/// Total order over JSON values for index scans and sorting.
///
/// Types order as null < bool < number < string < array < object;
/// within a type, natural order. Objects compare by their serialized
/// form, which is deterministic but not meaningful — documents should
/// not be ordered by object-valued fields.
pub fn cmp_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (ex, ey) in x.iter().zip(y.iter()) {
                let ord = cmp_values(ex, ey);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
        * 1000.0
}
