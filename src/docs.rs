//! Document catalogue.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A catalogued document. `id` is an opaque non-empty string; `title` and
/// `url` are opaque (possibly empty) strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Document identity.
    pub id: String,
    /// Display title.
    #[serde(default)]
    pub title: String,
    /// Target URL.
    #[serde(default)]
    pub url: String,
}

impl Document {
    /// Convenience constructor.
    pub fn new(id: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            url: url.into(),
        }
    }
}

/// Owned id → document mapping.
///
/// Backed by a `BTreeMap` so listing is ordered by id ascending without a
/// sort pass.
#[derive(Debug, Default, Clone)]
pub struct DocumentSet {
    m: BTreeMap<String, Document>,
}

impl DocumentSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a document. Returns `true` when the id was newly
    /// introduced.
    pub fn upsert(&mut self, doc: Document) -> bool {
        self.m.insert(doc.id.clone(), doc).is_none()
    }

    /// Remove a document. Returns `true` when it existed.
    pub fn remove(&mut self, id: &str) -> bool {
        self.m.remove(id).is_some()
    }

    /// Look up a document.
    pub fn get(&self, id: &str) -> Option<&Document> {
        self.m.get(id)
    }

    /// Membership test.
    pub fn contains(&self, id: &str) -> bool {
        self.m.contains_key(id)
    }

    /// Documents ordered by id ascending.
    pub fn list(&self) -> Vec<Document> {
        self.m.values().cloned().collect()
    }

    /// Ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.m.keys().map(|k| k.as_str())
    }

    /// Number of documents.
    pub fn len(&self) -> usize {
        self.m.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.m.is_empty()
    }
}
