//! Conflict resolution strategies.

use crate::config::MergeTieBreak;
use crate::error::SyncResult;
use docsync_core::{
    last_modified_of, revision_of, stamp_revision, ContentHasher, Document, REV_FIELD,
};
use docsync_protocol::Conflict;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Callback type for [`ResolutionStrategy::Custom`].
///
/// Returns the document to apply, or `None` to keep the local one.
pub type CustomResolver = Arc<dyn Fn(&Conflict) -> Option<Document> + Send + Sync>;

/// How a conflict between a local pending write and a remote change is
/// decided.
#[derive(Clone)]
pub enum ResolutionStrategy {
    /// Newer `_lastModified` wins; remote wins ties.
    LastWriteWins,
    /// The local document always wins.
    LocalWins,
    /// The remote change always wins.
    RemoteWins,
    /// 3-way field merge from the queued base snapshot.
    Merge,
    /// Application-supplied resolver.
    Custom(CustomResolver),
}

impl fmt::Debug for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResolutionStrategy::LastWriteWins => "LastWriteWins",
            ResolutionStrategy::LocalWins => "LocalWins",
            ResolutionStrategy::RemoteWins => "RemoteWins",
            ResolutionStrategy::Merge => "Merge",
            ResolutionStrategy::Custom(_) => "Custom",
        };
        f.write_str(name)
    }
}

/// What the manager should do with the local document.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionOutcome {
    /// Leave the local document untouched.
    KeepLocal,
    /// Silently store this document.
    Apply(Document),
    /// Silently delete the local document.
    Delete,
}

/// Decides a conflict.
///
/// `base_doc` is the queued entry's pre-write snapshot, the common
/// ancestor a 3-way merge resolves from.
pub fn resolve(
    strategy: &ResolutionStrategy,
    conflict: &Conflict,
    base_doc: Option<&Document>,
    tie_break: MergeTieBreak,
    hasher: &dyn ContentHasher,
) -> SyncResult<ResolutionOutcome> {
    match strategy {
        ResolutionStrategy::LocalWins => Ok(ResolutionOutcome::KeepLocal),
        ResolutionStrategy::RemoteWins => Ok(accept_remote(conflict, hasher)),
        ResolutionStrategy::LastWriteWins => {
            let local = conflict
                .local_doc
                .as_ref()
                .and_then(last_modified_of)
                .unwrap_or(0.0);
            let remote = conflict
                .remote_doc
                .as_ref()
                .and_then(last_modified_of)
                .unwrap_or(0.0);
            // Remote wins ties: the server is the side everyone else
            // converges on.
            if remote >= local {
                Ok(accept_remote(conflict, hasher))
            } else {
                Ok(ResolutionOutcome::KeepLocal)
            }
        }
        ResolutionStrategy::Merge => Ok(merge(conflict, base_doc, tie_break, hasher)),
        ResolutionStrategy::Custom(resolver) => match resolver(conflict) {
            None => Ok(ResolutionOutcome::KeepLocal),
            Some(mut doc) => {
                if revision_of(&doc).is_none() {
                    stamp_revision(&mut doc, conflict.remote_rev.as_deref(), hasher);
                }
                Ok(ResolutionOutcome::Apply(doc))
            }
        },
    }
}

/// The remote side as an outcome, with a usable revision.
fn accept_remote(conflict: &Conflict, hasher: &dyn ContentHasher) -> ResolutionOutcome {
    let Some(remote) = &conflict.remote_doc else {
        return ResolutionOutcome::Delete;
    };
    let mut doc = remote.clone();
    match &conflict.remote_rev {
        Some(rev) => {
            doc.insert(REV_FIELD.into(), rev.as_str().into());
        }
        None => {
            if revision_of(&doc).is_none() {
                stamp_revision(&mut doc, conflict.local_rev.as_deref(), hasher);
            }
        }
    }
    ResolutionOutcome::Apply(doc)
}

fn merge(
    conflict: &Conflict,
    base_doc: Option<&Document>,
    tie_break: MergeTieBreak,
    hasher: &dyn ContentHasher,
) -> ResolutionOutcome {
    // A remote delete under merge keeps the surviving local edit.
    let Some(remote) = &conflict.remote_doc else {
        return ResolutionOutcome::KeepLocal;
    };
    // A local delete has nothing to merge; the remote edit survives.
    let Some(local) = &conflict.local_doc else {
        return accept_remote(conflict, hasher);
    };

    let mut merged = match base_doc {
        Some(base) => three_way(base, local, remote, tie_break),
        None => {
            // No ancestor: shallow 2-way, remote wins collisions.
            let mut merged = content_fields(local);
            for (field, value) in content_fields(remote) {
                merged.insert(field, value);
            }
            merged
        }
    };

    // The merged document is a successor of the remote revision, so a
    // later push presents it as derived from what the server has.
    stamp_revision(&mut merged, conflict.remote_rev.as_deref(), hasher);
    ResolutionOutcome::Apply(merged)
}

/// Per-field 3-way merge over non-underscore fields.
fn three_way(
    base: &Document,
    local: &Document,
    remote: &Document,
    tie_break: MergeTieBreak,
) -> Document {
    let fields: BTreeSet<&String> = base
        .keys()
        .chain(local.keys())
        .chain(remote.keys())
        .filter(|f| !f.starts_with('_'))
        .collect();

    let mut merged = Document::new();
    for field in fields {
        let b = base.get(field);
        let l = local.get(field);
        let r = remote.get(field);

        let chosen = if l == r {
            l
        } else if l == b {
            r
        } else if r == b {
            l
        } else {
            match tie_break {
                MergeTieBreak::RemoteWins => r,
                MergeTieBreak::LocalWins => l,
            }
        };

        if let Some(value) = chosen {
            merged.insert(field.clone(), value.clone());
        }
    }
    merged
}

fn content_fields(doc: &Document) -> Document {
    doc.iter()
        .filter(|(field, _)| !field.starts_with('_'))
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect()
}
