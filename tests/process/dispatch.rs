//! Command dispatch against the `User` process.

use serde_json::json;
use sourced_process::{
    DispatchError, DispatchStage, DocumentStore, ErrorKind, EventStore, InMemoryEventStore,
    InMemorySnapshotStore, Message, ProcessRuntime, RuntimeConfig, SnapshotRecord, SnapshotStore,
};

use crate::support::user::{self, change_username, register_user, User};
use crate::support::{Harness, STREAM};

#[test]
fn register_records_first_event() {
    let h = Harness::new();
    let command = register_user("u1", "alice", "a@x.com");
    let command_id = command.uuid();

    let result = h.runtime.dispatch(command).unwrap();

    assert_eq!(result.version, 1);
    assert_eq!(result.pid, "u1");
    assert_eq!(result.process_type, "User");
    assert_eq!(result.event_names(), vec!["UserRegistered"]);
    assert_eq!(
        result.stages,
        vec![
            DispatchStage::Received,
            DispatchStage::IdentifierExtracted,
            DispatchStage::New,
            DispatchStage::Handled,
            DispatchStage::EventsPersisted,
            DispatchStage::Applied,
            DispatchStage::Completed,
        ]
    );

    let event = &result.events[0];
    assert_eq!(event.version, 1);
    assert_eq!(event.position, 1);
    assert_eq!(event.event.causation_id(), Some(command_id));
    assert_eq!(event.event.meta("_pid"), Some(&json!("u1")));
    assert_eq!(event.event.meta("_process_type"), Some(&json!("User")));
    assert_eq!(event.event.meta("_version"), Some(&json!(1)));

    let state: User = result.state.unwrap().decode().unwrap();
    assert_eq!(state.username, "alice");

    let doc = h.documents.get_doc("users", "u1").unwrap().unwrap();
    assert_eq!(
        doc.data,
        json!({ "userId": "u1", "username": "alice", "email": "a@x.com" })
    );
}

#[test]
fn change_username_on_existing_process() {
    let h = Harness::new();
    h.runtime.dispatch(register_user("u1", "alice", "a@x.com")).unwrap();

    let result = h.runtime.dispatch(change_username("u1", "bob")).unwrap();

    assert_eq!(result.version, 2);
    assert!(result.stages.contains(&DispatchStage::StateLoaded));
    assert!(!result.stages.contains(&DispatchStage::New));
    assert_eq!(
        result.events[0].event.payload_value(),
        json!({ "userId": "u1", "oldName": "alice", "newName": "bob" })
    );

    let doc = h.documents.get_doc("users", "u1").unwrap().unwrap();
    assert_eq!(doc.data["username"], json!("bob"));
}

#[test]
fn existing_command_on_unknown_pid() {
    let h = Harness::new();
    h.runtime.dispatch(register_user("u1", "alice", "a@x.com")).unwrap();

    let err = h.runtime.dispatch(change_username("u2", "bob")).unwrap_err();

    assert!(matches!(err, DispatchError::ProcessNotFound { ref pid, .. } if pid == "u2"));
    assert_eq!(err.status_code(), 404);
    assert!(h
        .store
        .load_process_events(STREAM, "User", "u2", 1)
        .unwrap()
        .is_empty());
}

#[test]
fn new_command_on_existing_pid() {
    let h = Harness::new();
    h.runtime.dispatch(register_user("u1", "alice", "a@x.com")).unwrap();

    let err = h
        .runtime
        .dispatch(register_user("u1", "alice2", "b@x.com"))
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert_eq!(h.store.last_version(STREAM, "User", "u1").unwrap(), 1);
}

#[test]
fn unknown_command() {
    let h = Harness::new();
    let err = h
        .runtime
        .dispatch(Message::command("DeleteUser", json!({ "userId": "u1" })).unwrap())
        .unwrap_err();
    assert!(matches!(err, DispatchError::UnknownCommand(ref name) if name == "DeleteUser"));
    assert_eq!(err.status_code(), 404);
}

#[test]
fn non_commands_are_rejected() {
    let h = Harness::new();
    let err = h
        .runtime
        .dispatch(Message::event("UserRegistered", json!({ "userId": "u1" })).unwrap())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn missing_or_malformed_identifier() {
    let h = Harness::new();

    let missing = Message::command(
        "RegisterUser",
        json!({ "username": "alice", "email": "a@x.com" }),
    )
    .unwrap();
    let err = h.runtime.dispatch(missing).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(err.status_code(), 400);

    let empty = register_user("", "alice", "a@x.com");
    assert_eq!(
        h.runtime.dispatch(empty).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );

    assert!(h.store.load_stream(STREAM, 0, None).unwrap().is_empty());
}

#[test]
fn schema_rejection_writes_nothing() {
    let h = Harness::new();
    let err = h
        .runtime
        .dispatch(register_user("u1", "al", "a@x.com"))
        .unwrap_err();

    assert!(matches!(err, DispatchError::Validation(ref e) if e.path == "/username"));
    assert_eq!(err.status_code(), 400);
    assert_eq!(h.store.last_version(STREAM, "User", "u1").unwrap(), 0);
    assert!(h.documents.get_doc("users", "u1").unwrap().is_none());
}

#[test]
fn handler_rejection_writes_nothing() {
    let h = Harness::new();
    h.runtime.dispatch(register_user("u1", "alice", "a@x.com")).unwrap();

    let command = Message::command("ChangeUsername", json!({ "userId": "u1" })).unwrap();
    let err = h.runtime.dispatch(command).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(h.store.last_version(STREAM, "User", "u1").unwrap(), 1);
}

#[test]
fn empty_handle_output_keeps_version() {
    let h = Harness::new();
    h.runtime.dispatch(register_user("u1", "alice", "a@x.com")).unwrap();

    let result = h.runtime.dispatch(change_username("u1", "alice")).unwrap();

    assert!(result.events.is_empty());
    assert_eq!(result.version, 1);
    assert_eq!(result.stages.last(), Some(&DispatchStage::Completed));
    assert_eq!(h.store.last_version(STREAM, "User", "u1").unwrap(), 1);
}

#[test]
fn loaded_state_matches_fold_of_history() {
    let h = Harness::new();
    h.runtime.dispatch(register_user("u1", "alice", "a@x.com")).unwrap();
    for name in ["bob", "carol", "dave"] {
        h.runtime.dispatch(change_username("u1", name)).unwrap();
    }

    let loaded = h.runtime.load_state("User", "u1").unwrap().unwrap();
    assert_eq!(loaded.version, 4);

    let history = h.store.load_process_events(STREAM, "User", "u1", 1).unwrap();
    let versions: Vec<u64> = history.iter().map(|e| e.version).collect();
    assert_eq!(versions, vec![1, 2, 3, 4]);

    let table = h.runtime.registry().apply_table("User").unwrap();
    let folded = table.fold(None, history.iter().map(|e| &e.event)).unwrap();
    assert_eq!(folded, loaded.state);

    let user: User = loaded.state.unwrap().decode().unwrap();
    assert_eq!(user.username, "dave");
    assert_eq!(user.email, "a@x.com");
}

#[test]
fn load_state_edge_cases() {
    let h = Harness::new();
    assert!(h.runtime.load_state("User", "nobody").unwrap().is_none());
    assert_eq!(
        h.runtime.load_state("Order", "o1").unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
}

#[test]
fn events_are_traceable_by_causation_and_correlation() {
    let h = Harness::new();
    let correlation = uuid::Uuid::new_v4();
    let command = register_user("u1", "alice", "a@x.com").with_correlation(correlation);
    let command_id = command.uuid();

    let result = h.runtime.dispatch(command).unwrap();

    let caused = h.store.load_events_by_causation_id(STREAM, command_id).unwrap();
    assert_eq!(caused, result.events);
    let correlated = h
        .store
        .load_events_by_correlation_id(STREAM, correlation)
        .unwrap();
    assert_eq!(correlated.len(), 1);
    assert_eq!(correlated[0].name(), "UserRegistered");
}

#[test]
fn configured_stream_name_is_used() {
    let store = InMemoryEventStore::new();
    let runtime = ProcessRuntime::builder(user::registry(), store.clone())
        .config(RuntimeConfig::default().with_stream_name("users_stream"))
        .build()
        .unwrap();

    runtime.dispatch(register_user("u1", "alice", "a@x.com")).unwrap();

    assert_eq!(store.last_version("users_stream", "User", "u1").unwrap(), 1);
    assert!(!store.has_stream(STREAM).unwrap());
}

#[test]
fn invalid_config_fails_build() {
    let err = ProcessRuntime::builder(user::registry(), InMemoryEventStore::new())
        .config(RuntimeConfig::default().with_stream_name(""))
        .build()
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::ConfigurationError);
}

#[test]
fn snapshots_are_taken_and_used() {
    let snapshots = InMemorySnapshotStore::new();
    let runtime = ProcessRuntime::builder(user::registry(), InMemoryEventStore::new())
        .config(RuntimeConfig::default().with_snapshot_every(2))
        .snapshots(snapshots.clone())
        .build()
        .unwrap();

    runtime.dispatch(register_user("u1", "alice", "a@x.com")).unwrap();
    assert!(snapshots.get_snapshot("User", "u1").unwrap().is_none());

    runtime.dispatch(change_username("u1", "bob")).unwrap();
    runtime.dispatch(change_username("u1", "carol")).unwrap();

    let snapshot = snapshots.get_snapshot("User", "u1").unwrap().unwrap();
    assert_eq!(snapshot.version, 2);
    assert_eq!(snapshot.state["username"], json!("bob"));

    let loaded = runtime.load_state("User", "u1").unwrap().unwrap();
    assert_eq!(loaded.version, 3);
    assert_eq!(loaded.state.unwrap().get_str("username"), Some("carol"));
}

#[test]
fn load_starts_from_snapshot() {
    let snapshots = InMemorySnapshotStore::new();
    let runtime = ProcessRuntime::builder(user::registry(), InMemoryEventStore::new())
        .snapshots(snapshots.clone())
        .build()
        .unwrap();
    runtime.dispatch(register_user("u1", "alice", "a@x.com")).unwrap();

    // A snapshot at the head version stands in for the history before it.
    snapshots
        .save_snapshot(SnapshotRecord {
            process_type: "User".into(),
            pid: "u1".into(),
            version: 1,
            state: json!({ "userId": "u1", "username": "from-snapshot", "email": "a@x.com" }),
        })
        .unwrap();

    let loaded = runtime.load_state("User", "u1").unwrap().unwrap();
    assert_eq!(loaded.version, 1);
    assert_eq!(loaded.state.unwrap().get_str("username"), Some("from-snapshot"));

    let result = runtime.dispatch(change_username("u1", "bob")).unwrap();
    assert_eq!(
        result.events[0].event.get_str("oldName"),
        Some("from-snapshot")
    );
}
