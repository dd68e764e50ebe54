//! Read models driven by committed events.

use serde_json::json;
use sourced_process::{
    DocumentStore, ErrorKind, EventStore, Projection, ProjectionError, ProjectionStatus,
    RuntimeConfig,
};

use crate::support::user::{change_username, register_user};
use crate::support::{Harness, STREAM};

fn audit_projection() -> Projection {
    Projection::new("audit")
        .collection("audit")
        .process_type("User")
        .on("UserRegistered", |docs, event| {
            docs.upsert_doc("audit", &event.pid, json!({ "registered": true }))?;
            Ok(())
        })
}

#[test]
fn redelivery_leaves_documents_unchanged() {
    let h = Harness::new();
    h.runtime.dispatch(register_user("u1", "alice", "a@x.com")).unwrap();
    h.runtime.dispatch(change_username("u1", "bob")).unwrap();

    let events = h.store.load_process_events(STREAM, "User", "u1", 1).unwrap();
    let users_before = h.documents.get_doc("users", "u1").unwrap().unwrap().data;
    let state_before = h.documents.get_doc("user_states", "u1").unwrap().unwrap().data;

    assert!(h.engine.project_event("users", &events[1]).unwrap());
    for event in &events {
        h.engine.project_event("user_states_state", event).unwrap();
    }

    assert_eq!(
        h.documents.get_doc("users", "u1").unwrap().unwrap().data,
        users_before
    );
    assert_eq!(
        h.documents.get_doc("user_states", "u1").unwrap().unwrap().data,
        state_before
    );
}

#[test]
fn process_state_is_mirrored() {
    let h = Harness::new();
    h.runtime.dispatch(register_user("u1", "alice", "a@x.com")).unwrap();
    h.runtime.dispatch(change_username("u1", "bob")).unwrap();

    let doc = h.documents.get_doc("user_states", "u1").unwrap().unwrap();
    assert_eq!(
        doc.data,
        json!({
            "pid": "u1",
            "processType": "User",
            "version": 2,
            "state": { "userId": "u1", "username": "bob", "email": "a@x.com" },
        })
    );
}

#[test]
fn unknown_event_halts_projector_but_keeps_commit() {
    let h = Harness::new();
    h.engine.register(audit_projection()).unwrap();

    let first = h.runtime.dispatch(register_user("u1", "alice", "a@x.com")).unwrap();
    assert!(first.projection_failures.is_empty());

    let second = h.runtime.dispatch(change_username("u1", "bob")).unwrap();
    assert_eq!(second.version, 2);
    assert_eq!(second.projection_failures.len(), 1);

    let failure = &second.projection_failures[0];
    assert!(matches!(failure, ProjectionError::UnknownEvent { .. }));
    assert_eq!(failure.kind(), ErrorKind::ProjectorFailed);
    assert_eq!(failure.projection(), Some("audit"));
    assert_eq!(failure.event().map(|e| e.name()), Some("UsernameChanged"));

    assert!(matches!(
        h.engine.status("audit"),
        Some(ProjectionStatus::Halted(_))
    ));
    assert_eq!(h.engine.status("users"), Some(ProjectionStatus::Running));
    assert_eq!(h.store.last_version(STREAM, "User", "u1").unwrap(), 2);
    assert_eq!(
        h.documents.get_doc("users", "u1").unwrap().unwrap().data["username"],
        json!("bob")
    );

    // Halted projectors are skipped on later commits.
    let third = h.runtime.dispatch(register_user("u2", "carol", "c@x.com")).unwrap();
    assert!(third.projection_failures.is_empty());
    assert!(h.documents.get_doc("audit", "u2").unwrap().is_none());
}

#[test]
fn handler_failure_carries_event() {
    let h = Harness::new();
    h.engine
        .register(
            Projection::new("strict")
                .process_type("User")
                .on("UserRegistered", |_, _| Err(ProjectionError::handler("boom"))),
        )
        .unwrap();

    let result = h.runtime.dispatch(register_user("u1", "alice", "a@x.com")).unwrap();

    let failure = &result.projection_failures[0];
    assert!(
        matches!(failure, ProjectionError::ProjectorFailed { reason, .. } if reason.contains("boom"))
    );
    assert_eq!(failure.event().map(|e| e.version), Some(1));
    assert_eq!(
        h.engine.project_event("strict", &result.events[0]).unwrap_err().kind(),
        ErrorKind::ProjectorFailed
    );
}

#[test]
fn reset_rebuilds_from_history() {
    let h = Harness::new();
    h.runtime.dispatch(register_user("u1", "alice", "a@x.com")).unwrap();
    h.runtime.dispatch(change_username("u1", "bob")).unwrap();
    h.runtime.dispatch(register_user("u2", "carol", "c@x.com")).unwrap();
    let before = h.documents.get_doc("users", "u1").unwrap().unwrap().data;

    h.engine.reset("users").unwrap();
    assert_eq!(h.engine.cursor("users"), Some(0));
    assert!(h.documents.get_doc("users", "u1").unwrap().is_none());

    let report = h.engine.catch_up(&h.store, STREAM);
    assert!(report.failures.is_empty());
    assert_eq!(report.delivered, 3);
    assert_eq!(h.engine.cursor("users"), Some(3));
    assert_eq!(h.documents.get_doc("users", "u1").unwrap().unwrap().data, before);
    assert!(h.documents.get_doc("users", "u2").unwrap().is_some());
}

#[test]
fn reset_resumes_halted_projector() {
    let h = Harness::new();
    h.engine.register(audit_projection()).unwrap();
    h.runtime.dispatch(register_user("u1", "alice", "a@x.com")).unwrap();
    h.runtime.dispatch(change_username("u1", "bob")).unwrap();
    assert!(matches!(h.engine.status("audit"), Some(ProjectionStatus::Halted(_))));

    h.engine.reset("audit").unwrap();
    assert_eq!(h.engine.status("audit"), Some(ProjectionStatus::Running));

    // Same history, same failure.
    let report = h.engine.catch_up(&h.store, STREAM);
    assert_eq!(report.failures.len(), 1);
    assert!(h.documents.get_doc("audit", "u1").unwrap().is_some());
}

#[test]
fn projections_can_run_out_of_band() {
    let h = Harness::with_config(RuntimeConfig::default().with_projections(false));
    let result = h.runtime.dispatch(register_user("u1", "alice", "a@x.com")).unwrap();
    assert!(result.projection_failures.is_empty());
    assert!(h.documents.get_doc("users", "u1").unwrap().is_none());

    h.engine.catch_up(&h.store, STREAM);
    assert_eq!(
        h.documents.get_doc("users", "u1").unwrap().unwrap().data["username"],
        json!("alice")
    );
}

#[test]
fn duplicate_projection_names() {
    let h = Harness::new();
    let err = h.engine.register(Projection::new("users")).unwrap_err();
    assert!(matches!(err, ProjectionError::DuplicateProjection(ref name) if name == "users"));
    assert_eq!(
        h.engine.reset("missing").unwrap_err().kind(),
        ErrorKind::NotFound
    );
}
