//! Read models - document collections updated by projections and read by resolvers.
//!
//! `DocumentStore` is the untyped, object-safe seam the projection engine writes
//! through. `ReadModel` plus `read_models::<M>()` add a typed view on top of any
//! document store.
//!
//! ## Example
//!
//! ```ignore
//! use sourced_process::{InMemoryDocumentStore, ReadModel, ReadModelsExt};
//!
//! #[derive(Serialize, Deserialize, Clone)]
//! #[serde(rename_all = "camelCase")]
//! struct UserView {
//!     user_id: String,
//!     username: String,
//! }
//!
//! impl ReadModel for UserView {
//!     const COLLECTION: &'static str = "users";
//!     fn id(&self) -> &str { &self.user_id }
//! }
//!
//! let store = InMemoryDocumentStore::new();
//! store.read_models::<UserView>().upsert(&view)?;
//! let loaded = store.read_models::<UserView>().get("u1")?;
//! ```

mod in_memory;
mod repository;

pub use in_memory::InMemoryDocumentStore;
pub use repository::{ReadModelRepository, ReadModelsExt};

use std::fmt;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::ErrorKind;

/// Types stored as documents of one collection.
pub trait ReadModel: Serialize + DeserializeOwned + Clone + Send + Sync {
    const COLLECTION: &'static str;

    fn id(&self) -> &str;
}

/// Document data plus the store-assigned revision.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub data: T,
    pub version: u64,
}

/// Error type for document store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    CollectionNotFound(String),
    /// `add_doc` on an id that is already taken.
    DocumentExists { collection: String, id: String },
    NotFound { collection: String, id: String },
    /// Optimistic concurrency conflict on `update_doc`.
    ConcurrencyConflict {
        collection: String,
        id: String,
        expected: u64,
        actual: u64,
    },
    Serde(String),
    Storage(String),
}

impl DocumentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DocumentError::CollectionNotFound(_) | DocumentError::NotFound { .. } => {
                ErrorKind::NotFound
            }
            DocumentError::DocumentExists { .. } => ErrorKind::AlreadyExists,
            DocumentError::ConcurrencyConflict { .. } => ErrorKind::Conflict,
            DocumentError::Serde(_) => ErrorKind::InvalidArgument,
            DocumentError::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentError::CollectionNotFound(name) => write!(f, "collection {} not found", name),
            DocumentError::DocumentExists { collection, id } => {
                write!(f, "document {}:{} already exists", collection, id)
            }
            DocumentError::NotFound { collection, id } => {
                write!(f, "document not found: {}:{}", collection, id)
            }
            DocumentError::ConcurrencyConflict {
                collection,
                id,
                expected,
                actual,
            } => write!(
                f,
                "concurrency conflict on {}:{} (expected version {}, actual {})",
                collection, id, expected, actual
            ),
            DocumentError::Serde(msg) => write!(f, "document serialization error: {}", msg),
            DocumentError::Storage(msg) => write!(f, "document storage error: {}", msg),
        }
    }
}

impl std::error::Error for DocumentError {}

/// Untyped document storage.
///
/// Documents are JSON values addressed by `(collection, id)`. Every write bumps
/// the document's version, starting at 1.
pub trait DocumentStore: Send + Sync {
    /// Create a collection. Returns false if it already existed.
    fn add_collection(&self, name: &str) -> Result<bool, DocumentError>;

    /// Remove a collection and all its documents. Returns true if it existed.
    fn drop_collection(&self, name: &str) -> Result<bool, DocumentError>;

    fn has_collection(&self, name: &str) -> Result<bool, DocumentError>;

    /// Insert a document. Fails if the id is taken.
    fn add_doc(&self, collection: &str, id: &str, doc: Value)
        -> Result<Versioned<Value>, DocumentError>;

    /// Replace an existing document, optionally checking its current version.
    fn update_doc(
        &self,
        collection: &str,
        id: &str,
        doc: Value,
        expected_version: Option<u64>,
    ) -> Result<Versioned<Value>, DocumentError>;

    /// Insert or replace a document.
    fn upsert_doc(&self, collection: &str, id: &str, doc: Value)
        -> Result<Versioned<Value>, DocumentError>;

    /// Returns true if the document existed.
    fn delete_doc(&self, collection: &str, id: &str) -> Result<bool, DocumentError>;

    fn get_doc(&self, collection: &str, id: &str) -> Result<Option<Versioned<Value>>, DocumentError>;

    /// Documents matching `predicate`, ordered by id.
    fn filter_docs(
        &self,
        collection: &str,
        predicate: &dyn Fn(&Value) -> bool,
    ) -> Result<Vec<Versioned<Value>>, DocumentError>;
}
