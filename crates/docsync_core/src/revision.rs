//! Generation + content-hash revision ids.
//!
//! A revision is the string `"{generation}-{contentHash}"`. The
//! generation is the parent's generation plus one (1 for a document
//! with no parent). The content hash covers every field whose name
//! does not start with an underscore, serialized deterministically
//! (serde_json maps are key-sorted), so revision computation is a pure
//! function: identical content with the same parent yields the same
//! revision on every process.

use crate::document::{Document, LAST_MODIFIED_FIELD, REV_FIELD};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Pluggable content hash for revision ids.
///
/// The hash must be stable across processes; the default is SHA-256
/// over the canonical JSON of the document's content fields.
pub trait ContentHasher: Send + Sync {
    /// Hashes canonical content bytes into a lowercase hex string.
    fn digest_hex(&self, content: &[u8]) -> String;
}

/// Default SHA-256 content hasher.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl ContentHasher for Sha256Hasher {
    fn digest_hex(&self, content: &[u8]) -> String {
        let digest = Sha256::digest(content);
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }
}

/// Extracts the generation number from a revision string.
///
/// Returns 0 for malformed revisions, so a corrupt parent restarts the
/// chain at generation 1.
pub fn generation_of(rev: &str) -> u64 {
    rev.split_once('-')
        .and_then(|(gen, _)| gen.parse().ok())
        .unwrap_or(0)
}

/// Serializes the content fields (non-underscore-prefixed) of a
/// document into canonical bytes.
fn canonical_content(doc: &Document) -> Vec<u8> {
    let content: Document = doc
        .iter()
        .filter(|(name, _)| !name.starts_with('_'))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    // serde_json maps are BTree-backed: serialization is key-sorted
    // and deterministic.
    serde_json::to_vec(&Value::Object(content)).unwrap_or_default()
}

/// Computes the revision for `doc` chained from `parent_rev`.
///
/// Pure and deterministic; does not modify the document.
pub fn compute_revision(
    doc: &Document,
    parent_rev: Option<&str>,
    hasher: &dyn ContentHasher,
) -> String {
    let generation = parent_rev.map(generation_of).unwrap_or(0) + 1;
    let hash = hasher.digest_hex(&canonical_content(doc));
    format!("{generation}-{hash}")
}

/// Stamps a new revision and last-modified timestamp onto `doc`,
/// chained from `parent_rev`. Returns the new revision.
pub fn stamp_revision(
    doc: &mut Document,
    parent_rev: Option<&str>,
    hasher: &dyn ContentHasher,
) -> String {
    let rev = compute_revision(doc, parent_rev, hasher);
    doc.insert(REV_FIELD.into(), Value::from(rev.clone()));
    doc.insert(
        LAST_MODIFIED_FIELD.into(),
        Value::from(crate::document::now_millis()),
    );
    rev
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn doc(pairs: &[(&str, Value)]) -> Document {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn deterministic_for_same_content_and_parent() {
        let d = doc(&[("name", json!("a")), ("age", json!(3))]);
        let r1 = compute_revision(&d, None, &Sha256Hasher);
        let r2 = compute_revision(&d, None, &Sha256Hasher);
        assert_eq!(r1, r2);
        assert!(r1.starts_with("1-"));
    }

    #[test]
    fn generation_chain() {
        let d = doc(&[("name", json!("a"))]);
        let r1 = compute_revision(&d, None, &Sha256Hasher);
        let r2 = compute_revision(&d, Some(&r1), &Sha256Hasher);
        let r3 = compute_revision(&d, Some(&r2), &Sha256Hasher);
        assert_eq!(generation_of(&r1), 1);
        assert_eq!(generation_of(&r2), 2);
        assert_eq!(generation_of(&r3), 3);
    }

    #[test]
    fn underscore_fields_excluded_from_hash() {
        let bare = doc(&[("name", json!("a"))]);
        let stamped = doc(&[
            ("name", json!("a")),
            ("_rev", json!("1-zzz")),
            ("_lastModified", json!(99.0)),
        ]);
        assert_eq!(
            compute_revision(&bare, None, &Sha256Hasher),
            compute_revision(&stamped, None, &Sha256Hasher)
        );
    }

    #[test]
    fn different_content_different_hash() {
        let a = doc(&[("name", json!("a"))]);
        let b = doc(&[("name", json!("b"))]);
        assert_ne!(
            compute_revision(&a, None, &Sha256Hasher),
            compute_revision(&b, None, &Sha256Hasher)
        );
    }

    #[test]
    fn malformed_parent_restarts_chain() {
        assert_eq!(generation_of("not-a-rev"), 0);
        assert_eq!(generation_of(""), 0);
        let d = doc(&[("x", json!(1))]);
        let rev = compute_revision(&d, Some("garbage"), &Sha256Hasher);
        assert_eq!(generation_of(&rev), 1);
    }

    #[test]
    fn stamp_sets_reserved_fields() {
        let mut d = doc(&[("x", json!(1))]);
        let rev = stamp_revision(&mut d, None, &Sha256Hasher);
        assert_eq!(d.get("_rev").unwrap().as_str().unwrap(), rev);
        assert!(d.get("_lastModified").unwrap().as_f64().unwrap() > 0.0);
    }

    proptest! {
        #[test]
        fn revision_is_pure(name in "[a-z]{1,8}", n in 0i64..1000, parent_gen in 1u64..50) {
            let d = doc(&[("name", json!(name)), ("n", json!(n))]);
            let parent = format!("{parent_gen}-abc");
            let r1 = compute_revision(&d, Some(&parent), &Sha256Hasher);
            let r2 = compute_revision(&d, Some(&parent), &Sha256Hasher);
            prop_assert_eq!(&r1, &r2);
            prop_assert_eq!(generation_of(&r1), parent_gen + 1);
        }
    }
}
