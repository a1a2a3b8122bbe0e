//! Primary key representation.

use crate::error::{CoreError, CoreResult};
use serde_json::Value;
use std::fmt;

/// A primary key for a document.
///
/// Keys are either integers (including store-assigned auto-increment
/// keys), strings, or temporary overlay keys.
///
/// # Temporary keys
///
/// `Temp` keys are handed out by the overlay for un-keyed optimistic
/// adds. They are visible to queries while the transaction is open and
/// are stripped during commit replay so the store assigns the real key.
/// A `Temp` key must never reach the store or the wire; converting one
/// to JSON is an error.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    /// Integer key.
    Int(i64),
    /// String key.
    Text(String),
    /// Temporary overlay key (never persisted).
    Temp(u64),
}

impl Key {
    /// Returns true if this is a temporary overlay key.
    pub fn is_temp(&self) -> bool {
        matches!(self, Key::Temp(_))
    }

    /// Converts the key to a JSON value for persistence or transport.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TempKey`] for temporary keys.
    pub fn to_value(&self) -> CoreResult<Value> {
        match self {
            Key::Int(i) => Ok(Value::from(*i)),
            Key::Text(s) => Ok(Value::from(s.clone())),
            Key::Temp(_) => Err(CoreError::TempKey),
        }
    }

    /// Extracts a key from a JSON value.
    ///
    /// Integer-valued numbers become `Int`, strings become `Text`.
    /// Anything else is not a usable key.
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Number(n) => n.as_i64().map(Key::Int),
            Value::String(s) => Some(Key::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{i}"),
            Key::Text(s) => write!(f, "{s}"),
            Key::Temp(t) => write!(f, "#tmp{t}"),
        }
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Int(value)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Text(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Text(value)
    }
}
