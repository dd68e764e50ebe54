//! ReadModelRepository - Typed accessor over a `DocumentStore`.

use std::marker::PhantomData;

use super::{DocumentError, DocumentStore, ReadModel, Versioned};

/// Typed repository for the documents of one `ReadModel`.
///
/// Writes create the collection on first use.
pub struct ReadModelRepository<'a, S: ?Sized, M> {
    store: &'a S,
    _marker: PhantomData<M>,
}

fn decode<M: ReadModel>(doc: Versioned<serde_json::Value>) -> Result<Versioned<M>, DocumentError> {
    let data = serde_json::from_value(doc.data).map_err(|e| DocumentError::Serde(e.to_string()))?;
    Ok(Versioned {
        data,
        version: doc.version,
    })
}

fn encode<M: ReadModel>(model: &M) -> Result<serde_json::Value, DocumentError> {
    serde_json::to_value(model).map_err(|e| DocumentError::Serde(e.to_string()))
}

impl<'a, S: DocumentStore + ?Sized, M: ReadModel> ReadModelRepository<'a, S, M> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            _marker: PhantomData,
        }
    }

    /// Get a read model by ID. A missing collection reads as empty.
    pub fn get(&self, id: &str) -> Result<Option<Versioned<M>>, DocumentError> {
        match self.store.get_doc(M::COLLECTION, id) {
            Ok(Some(doc)) => Ok(Some(decode(doc)?)),
            Ok(None) | Err(DocumentError::CollectionNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Insert or replace.
    pub fn upsert(&self, model: &M) -> Result<Versioned<M>, DocumentError> {
        self.store.add_collection(M::COLLECTION)?;
        let doc = self.store.upsert_doc(M::COLLECTION, model.id(), encode(model)?)?;
        Ok(Versioned {
            data: model.clone(),
            version: doc.version,
        })
    }

    /// Insert a new read model. Fails if it already exists.
    pub fn insert(&self, model: &M) -> Result<Versioned<M>, DocumentError> {
        self.store.add_collection(M::COLLECTION)?;
        let doc = self.store.add_doc(M::COLLECTION, model.id(), encode(model)?)?;
        Ok(Versioned {
            data: model.clone(),
            version: doc.version,
        })
    }

    /// Replace an existing read model with optimistic concurrency.
    pub fn update(&self, model: &M, expected_version: u64) -> Result<Versioned<M>, DocumentError> {
        let doc = self.store.update_doc(
            M::COLLECTION,
            model.id(),
            encode(model)?,
            Some(expected_version),
        )?;
        Ok(Versioned {
            data: model.clone(),
            version: doc.version,
        })
    }

    pub fn delete(&self, id: &str) -> Result<bool, DocumentError> {
        match self.store.delete_doc(M::COLLECTION, id) {
            Err(DocumentError::CollectionNotFound(_)) => Ok(false),
            other => other,
        }
    }

    /// Read models matching a predicate. Documents that do not decode are skipped.
    pub fn find(&self, predicate: &dyn Fn(&M) -> bool) -> Result<Vec<Versioned<M>>, DocumentError> {
        let docs = match self.store.filter_docs(M::COLLECTION, &|_| true) {
            Ok(docs) => docs,
            Err(DocumentError::CollectionNotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(docs
            .into_iter()
            .filter_map(|doc| decode::<M>(doc).ok())
            .filter(|m| predicate(&m.data))
            .collect())
    }

    pub fn find_one(
        &self,
        predicate: &dyn Fn(&M) -> bool,
    ) -> Result<Option<Versioned<M>>, DocumentError> {
        Ok(self.find(predicate)?.into_iter().next())
    }

    pub fn all(&self) -> Result<Vec<Versioned<M>>, DocumentError> {
        self.find(&|_| true)
    }
}

/// Extension trait for typed read model access on any `DocumentStore`.
pub trait ReadModelsExt: DocumentStore {
    fn read_models<M: ReadModel>(&self) -> ReadModelRepository<'_, Self, M> {
        ReadModelRepository::new(self)
    }
}

impl<S: DocumentStore + ?Sized> ReadModelsExt for S {}
