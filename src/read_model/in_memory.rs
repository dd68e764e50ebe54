//! InMemoryDocumentStore - BTreeMap-backed document store for testing and development.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use serde_json::Value;

use super::{DocumentError, DocumentStore, Versioned};

struct StoredDoc {
    doc: Value,
    version: u64,
}

type Collection = BTreeMap<String, StoredDoc>;

/// In-memory document store.
///
/// Clone-friendly via Arc; clones share the same collections.
#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    collections: Arc<RwLock<HashMap<String, Collection>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with the given collections already added.
    pub fn with_collections(names: &[&str]) -> Self {
        let store = Self::new();
        if let Ok(mut collections) = store.collections.write() {
            for name in names {
                collections.insert(name.to_string(), Collection::new());
            }
        }
        store
    }

    /// Number of documents in a collection (0 when missing).
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .map(|c| c.get(collection).map(BTreeMap::len).unwrap_or(0))
            .unwrap_or(0)
    }

    fn write<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut Collection) -> Result<T, DocumentError>,
    ) -> Result<T, DocumentError> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| DocumentError::Storage("lock poisoned".into()))?;
        let docs = collections
            .get_mut(collection)
            .ok_or_else(|| DocumentError::CollectionNotFound(collection.to_string()))?;
        f(docs)
    }

    fn read<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&Collection) -> T,
    ) -> Result<T, DocumentError> {
        let collections = self
            .collections
            .read()
            .map_err(|_| DocumentError::Storage("lock poisoned".into()))?;
        let docs = collections
            .get(collection)
            .ok_or_else(|| DocumentError::CollectionNotFound(collection.to_string()))?;
        Ok(f(docs))
    }
}

fn put(docs: &mut Collection, id: &str, doc: Value, version: u64) -> Versioned<Value> {
    docs.insert(
        id.to_string(),
        StoredDoc {
            doc: doc.clone(),
            version,
        },
    );
    Versioned { data: doc, version }
}

impl DocumentStore for InMemoryDocumentStore {
    fn add_collection(&self, name: &str) -> Result<bool, DocumentError> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| DocumentError::Storage("lock poisoned".into()))?;
        if collections.contains_key(name) {
            return Ok(false);
        }
        collections.insert(name.to_string(), Collection::new());
        Ok(true)
    }

    fn drop_collection(&self, name: &str) -> Result<bool, DocumentError> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| DocumentError::Storage("lock poisoned".into()))?;
        Ok(collections.remove(name).is_some())
    }

    fn has_collection(&self, name: &str) -> Result<bool, DocumentError> {
        let collections = self
            .collections
            .read()
            .map_err(|_| DocumentError::Storage("lock poisoned".into()))?;
        Ok(collections.contains_key(name))
    }

    fn add_doc(
        &self,
        collection: &str,
        id: &str,
        doc: Value,
    ) -> Result<Versioned<Value>, DocumentError> {
        self.write(collection, |docs| {
            if docs.contains_key(id) {
                return Err(DocumentError::DocumentExists {
                    collection: collection.to_string(),
                    id: id.to_string(),
                });
            }
            Ok(put(docs, id, doc, 1))
        })
    }

    fn update_doc(
        &self,
        collection: &str,
        id: &str,
        doc: Value,
        expected_version: Option<u64>,
    ) -> Result<Versioned<Value>, DocumentError> {
        self.write(collection, |docs| {
            let actual = docs
                .get(id)
                .map(|s| s.version)
                .ok_or_else(|| DocumentError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                })?;
            if let Some(expected) = expected_version {
                if expected != actual {
                    return Err(DocumentError::ConcurrencyConflict {
                        collection: collection.to_string(),
                        id: id.to_string(),
                        expected,
                        actual,
                    });
                }
            }
            Ok(put(docs, id, doc, actual + 1))
        })
    }

    fn upsert_doc(
        &self,
        collection: &str,
        id: &str,
        doc: Value,
    ) -> Result<Versioned<Value>, DocumentError> {
        self.write(collection, |docs| {
            let version = docs.get(id).map(|s| s.version + 1).unwrap_or(1);
            Ok(put(docs, id, doc, version))
        })
    }

    fn delete_doc(&self, collection: &str, id: &str) -> Result<bool, DocumentError> {
        self.write(collection, |docs| Ok(docs.remove(id).is_some()))
    }

    fn get_doc(&self, collection: &str, id: &str) -> Result<Option<Versioned<Value>>, DocumentError> {
        self.read(collection, |docs| {
            docs.get(id).map(|s| Versioned {
                data: s.doc.clone(),
                version: s.version,
            })
        })
    }

    fn filter_docs(
        &self,
        collection: &str,
        predicate: &dyn Fn(&Value) -> bool,
    ) -> Result<Vec<Versioned<Value>>, DocumentError> {
        self.read(collection, |docs| {
            docs.values()
                .filter(|s| predicate(&s.doc))
                .map(|s| Versioned {
                    data: s.doc.clone(),
                    version: s.version,
                })
                .collect()
        })
    }
}
