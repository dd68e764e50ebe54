//! The read side: resolvers over projected documents and folded state.

use std::sync::Arc;

use serde_json::{json, Value};
use sourced_process::{
    BasicSchemaValidator, ErrorKind, Message, QueryDispatcher, QueryError, QueryRequest,
    ReadModelsExt,
};

use crate::support::user::{change_username, register_user};
use crate::support::views::UserView;
use crate::support::Harness;

fn user_id(query: &Message) -> Result<String, QueryError> {
    query
        .get_str("userId")
        .map(str::to_string)
        .ok_or_else(|| QueryError::InvalidArgument("userId is required".into()))
}

fn dispatcher(h: &Harness) -> QueryDispatcher {
    let runtime = Arc::clone(&h.runtime);
    let documents = h.engine.documents();
    let listing = h.engine.documents();

    QueryDispatcher::builder()
        .validator(BasicSchemaValidator::new())
        .resolver_fn("GetUser", move |query| {
            let id = user_id(query)?;
            let view = documents
                .read_models::<UserView>()
                .get(&id)?
                .ok_or_else(|| QueryError::not_found(format!("user {}", id)))?;
            Ok(serde_json::to_value(view.data).unwrap_or(Value::Null))
        })
        .payload_schema(json!({
            "type": "object",
            "required": ["userId"],
            "properties": { "userId": { "type": "string", "minLength": 1 } }
        }))
        .response_schema(json!({
            "type": "object",
            "required": ["userId", "username", "email"]
        }))
        .resolver_fn("ListUsernames", move |_| {
            let mut names: Vec<String> = listing
                .read_models::<UserView>()
                .all()?
                .into_iter()
                .map(|v| v.data.username)
                .collect();
            names.sort();
            Ok(json!(names))
        })
        .response_schema(json!({ "type": "array", "items": { "type": "string" } }))
        .resolver_fn("GetUserState", move |query| {
            let id = user_id(query)?;
            let loaded = runtime
                .load_state("User", &id)?
                .ok_or_else(|| QueryError::not_found(format!("user {}", id)))?;
            Ok(json!({
                "version": loaded.version,
                "state": loaded.state.map(|s| s.into_value()),
            }))
        })
        .build()
        .unwrap()
}

fn query(name: &str, payload: Value) -> Message {
    Message::query(name, payload).unwrap()
}

#[test]
fn resolves_projected_documents() {
    let h = Harness::new();
    h.runtime.dispatch(register_user("u1", "alice", "a@x.com")).unwrap();
    h.runtime.dispatch(change_username("u1", "bob")).unwrap();
    h.runtime.dispatch(register_user("u2", "carol", "c@x.com")).unwrap();
    let queries = dispatcher(&h);

    let user = queries.dispatch(&query("GetUser", json!({ "userId": "u1" }))).unwrap();
    assert_eq!(
        user,
        json!({ "userId": "u1", "username": "bob", "email": "a@x.com" })
    );

    let names = queries.dispatch(&query("ListUsernames", json!({}))).unwrap();
    assert_eq!(names, json!(["bob", "carol"]));
}

#[test]
fn resolves_folded_state() {
    let h = Harness::new();
    h.runtime.dispatch(register_user("u1", "alice", "a@x.com")).unwrap();
    h.runtime.dispatch(change_username("u1", "bob")).unwrap();
    let queries = dispatcher(&h);

    let state = queries
        .dispatch(&query("GetUserState", json!({ "userId": "u1" })))
        .unwrap();
    assert_eq!(state["version"], json!(2));
    assert_eq!(state["state"]["username"], json!("bob"));
}

#[test]
fn failures_map_to_status_codes() {
    let h = Harness::new();
    let queries = dispatcher(&h);

    let missing = queries
        .dispatch(&query("GetUser", json!({ "userId": "ghost" })))
        .unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);

    let no_state = queries
        .dispatch(&query("GetUserState", json!({ "userId": "ghost" })))
        .unwrap_err();
    assert_eq!(no_state.status_code(), 404);

    let invalid = queries
        .dispatch(&query("GetUser", json!({ "userId": "" })))
        .unwrap_err();
    assert!(matches!(invalid, QueryError::Validation(_)));

    let unknown = queries
        .dispatch(&query("GetOrder", json!({})))
        .unwrap_err();
    assert!(matches!(unknown, QueryError::UnknownQuery(_)));

    let command = Message::command("GetUser", json!({ "userId": "u1" })).unwrap();
    assert_eq!(
        queries.dispatch(&command).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
}

#[test]
fn request_surface() {
    let h = Harness::new();
    h.runtime.dispatch(register_user("u1", "alice", "a@x.com")).unwrap();
    let queries = dispatcher(&h);

    let request: QueryRequest =
        serde_json::from_value(json!({ "query": "GetUser", "payload": { "userId": "u1" } }))
            .unwrap();
    let response = queries.dispatch_request(&request);
    assert_eq!(response.status, 200);
    assert_eq!(response.body["username"], json!("alice"));

    let request: QueryRequest =
        serde_json::from_value(json!({ "query": "GetUser", "payload": { "userId": "u9" } }))
            .unwrap();
    let response = queries.dispatch_request(&request);
    assert_eq!(response.status, 404);
    assert_eq!(response.body["kind"], json!("not_found"));
}

#[test]
fn response_must_match_schema() {
    let queries = QueryDispatcher::builder()
        .validator(BasicSchemaValidator::new())
        .resolver_fn("Broken", |_| Ok(json!({ "userId": "u1" })))
        .response_schema(json!({ "type": "object", "required": ["username"] }))
        .build()
        .unwrap();

    let err = queries.dispatch(&query("Broken", json!({}))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailed);
}
