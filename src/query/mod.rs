//! Query dispatch - routes queries to resolvers by name.
//!
//! The query side shares nothing mutable with the write path; resolvers read
//! documents written by projections or fold process state on demand.
//!
//! ## Example
//!
//! ```ignore
//! use sourced_process::{Message, QueryDispatcher, QueryError, ReadModelsExt};
//! use serde_json::json;
//!
//! let queries = QueryDispatcher::builder()
//!     .resolver_fn("GetUser", move |query| {
//!         let id = query.get_str("userId").unwrap_or_default();
//!         documents
//!             .get_doc("users", id)?
//!             .map(|doc| doc.data)
//!             .ok_or_else(|| QueryError::not_found(format!("user {}", id)))
//!     })
//!     .response_schema(json!({ "type": "object" }))
//!     .build()?;
//!
//! let user = queries.dispatch(&Message::query("GetUser", json!({ "userId": "u1" }))?)?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{DispatchError, ErrorKind};
use crate::message::{Message, MessageError, MessageType, Payload};
use crate::read_model::DocumentError;
use crate::schema::{NoopValidator, SchemaValidator, ValidationError};

/// Error type for query dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryError {
    /// No resolver is registered under this name.
    UnknownQuery(String),
    /// The resolver found nothing.
    NotFound(String),
    InvalidArgument(String),
    Validation(ValidationError),
    DuplicateResolver(String),
    Document(DocumentError),
    /// Any other resolver failure, with the kind it maps to.
    Failed { kind: ErrorKind, message: String },
}

impl QueryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::UnknownQuery(_) | QueryError::NotFound(_) => ErrorKind::NotFound,
            QueryError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            QueryError::Validation(_) => ErrorKind::ValidationFailed,
            QueryError::DuplicateResolver(_) => ErrorKind::ConfigurationError,
            QueryError::Document(e) => e.kind(),
            QueryError::Failed { kind, .. } => *kind,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        QueryError::NotFound(what.into())
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::UnknownQuery(name) => write!(f, "unknown query: {}", name),
            QueryError::NotFound(what) => write!(f, "not found: {}", what),
            QueryError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            QueryError::Validation(e) => write!(f, "{}", e),
            QueryError::DuplicateResolver(name) => {
                write!(f, "query {} has more than one resolver", name)
            }
            QueryError::Document(e) => write!(f, "{}", e),
            QueryError::Failed { message, .. } => write!(f, "query failed: {}", message),
        }
    }
}

impl std::error::Error for QueryError {}

impl From<ValidationError> for QueryError {
    fn from(err: ValidationError) -> Self {
        QueryError::Validation(err)
    }
}

impl From<DocumentError> for QueryError {
    fn from(err: DocumentError) -> Self {
        QueryError::Document(err)
    }
}

impl From<MessageError> for QueryError {
    fn from(err: MessageError) -> Self {
        match err {
            MessageError::UnknownMessage(name) => QueryError::UnknownQuery(name),
            other => QueryError::InvalidArgument(other.to_string()),
        }
    }
}

impl From<DispatchError> for QueryError {
    fn from(err: DispatchError) -> Self {
        match err {
            e @ DispatchError::ProcessNotFound { .. } => QueryError::NotFound(e.to_string()),
            DispatchError::InvalidArgument(msg) => QueryError::InvalidArgument(msg),
            other => QueryError::Failed {
                kind: other.kind(),
                message: other.to_string(),
            },
        }
    }
}

/// Produces the response for one query name.
pub trait Resolver: Send + Sync {
    fn resolve(&self, query: &Message) -> Result<Value, QueryError>;
}

/// `Resolver` backed by a closure.
pub struct FnResolver<F>(F);

impl<F> Resolver for FnResolver<F>
where
    F: Fn(&Message) -> Result<Value, QueryError> + Send + Sync,
{
    fn resolve(&self, query: &Message) -> Result<Value, QueryError> {
        (self.0)(query)
    }
}

struct Route {
    resolver: Arc<dyn Resolver>,
    payload_schema: Option<Value>,
    response_schema: Option<Value>,
}

/// An inbound query request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub metadata: Payload,
}

/// The response returned after dispatching a `QueryRequest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    /// HTTP-style status code.
    pub status: u16,
    pub body: Value,
}

impl From<QueryError> for QueryResponse {
    fn from(err: QueryError) -> Self {
        QueryResponse {
            status: err.status_code(),
            body: json!({ "error": err.to_string(), "kind": err.kind().as_str() }),
        }
    }
}

/// Immutable query name -> resolver table.
pub struct QueryDispatcher {
    routes: HashMap<String, Route>,
    validator: Arc<dyn SchemaValidator>,
}

impl QueryDispatcher {
    pub fn builder() -> QueryDispatcherBuilder {
        QueryDispatcherBuilder::default()
    }

    pub fn queries(&self) -> Vec<&str> {
        self.routes.keys().map(String::as_str).collect()
    }

    /// Resolve a query, validating its payload before and its response after.
    pub fn dispatch(&self, query: &Message) -> Result<Value, QueryError> {
        let span = tracing::debug_span!("query", query = %query.name());
        let _enter = span.enter();

        if query.message_type() != MessageType::Query {
            return Err(QueryError::InvalidArgument(format!(
                "{} is a {}, not a query",
                query.name(),
                query.message_type()
            )));
        }
        let route = self
            .routes
            .get(query.name())
            .ok_or_else(|| QueryError::UnknownQuery(query.name().to_string()))?;

        if let Some(schema) = &route.payload_schema {
            self.validator
                .assert_payload_schema(query.name(), schema, query.payload())?;
        }

        let response = route.resolver.resolve(query).map_err(|e| {
            tracing::debug!(kind = %e.kind(), error = %e, "query failed");
            e
        })?;

        if let Some(schema) = &route.response_schema {
            self.validator.assert_response_type_schema(query.name(), schema)?;
            self.validator.assert_response(query.name(), schema, &response)?;
        }
        Ok(response)
    }

    pub fn dispatch_request(&self, request: &QueryRequest) -> QueryResponse {
        let query = match Message::new(&request.query, MessageType::Query, request.payload.clone()) {
            Ok(query) => request
                .metadata
                .iter()
                .fold(query, |q, (k, v)| q.with_metadata(k.clone(), v.clone())),
            Err(e) => return QueryError::from(e).into(),
        };
        match self.dispatch(&query) {
            Ok(body) => QueryResponse { status: 200, body },
            Err(e) => e.into(),
        }
    }
}

/// Builder for `QueryDispatcher`.
///
/// `payload_schema` and `response_schema` configure the most recently added
/// resolver.
#[derive(Default)]
pub struct QueryDispatcherBuilder {
    routes: Vec<(String, Route)>,
    validator: Option<Arc<dyn SchemaValidator>>,
}

impl QueryDispatcherBuilder {
    pub fn validator<V: SchemaValidator + 'static>(mut self, validator: V) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn resolver<R: Resolver + 'static>(mut self, name: &str, resolver: R) -> Self {
        self.routes.push((
            name.to_string(),
            Route {
                resolver: Arc::new(resolver),
                payload_schema: None,
                response_schema: None,
            },
        ));
        self
    }

    pub fn resolver_fn<F>(self, name: &str, resolver: F) -> Self
    where
        F: Fn(&Message) -> Result<Value, QueryError> + Send + Sync + 'static,
    {
        self.resolver(name, FnResolver(resolver))
    }

    pub fn payload_schema(mut self, schema: Value) -> Self {
        if let Some((_, route)) = self.routes.last_mut() {
            route.payload_schema = Some(schema);
        }
        self
    }

    pub fn response_schema(mut self, schema: Value) -> Self {
        if let Some((_, route)) = self.routes.last_mut() {
            route.response_schema = Some(schema);
        }
        self
    }

    /// Check response schemas up front and reject duplicate names.
    pub fn build(self) -> Result<QueryDispatcher, QueryError> {
        let validator = self.validator.unwrap_or_else(|| Arc::new(NoopValidator));
        let mut routes = HashMap::new();
        for (name, route) in self.routes {
            if let Some(schema) = &route.response_schema {
                validator.assert_response_type_schema(&name, schema)?;
            }
            if routes.contains_key(&name) {
                return Err(QueryError::DuplicateResolver(name));
            }
            routes.insert(name, route);
        }
        Ok(QueryDispatcher { routes, validator })
    }
}
