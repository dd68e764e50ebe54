//! Pre-processors, context providers and handle output checks.

use serde_json::{json, Value};
use sourced_process::{
    apply_typed, CommandDispatchResult, ConfigurationError, DispatchError, ErrorKind, EventStore,
    Lifecycle, Message, MessageFactory, PreProcessed, ProcessRegistry, RuntimeConfig,
};

use crate::support::user::{self, change_username, register_user};
use crate::support::{Harness, STREAM};

fn harness(registry: ProcessRegistry) -> Harness {
    Harness::with_registry(registry, RuntimeConfig::default())
}

fn rename_to_change(
    command: Message,
    factory: &dyn MessageFactory,
) -> Result<PreProcessed, DispatchError> {
    let next = factory.create_message(
        "ChangeUsername",
        command.payload_value(),
        command.metadata().clone(),
    )?;
    Ok(PreProcessed::Command(next))
}

#[test]
fn pre_processor_rewrites_payload() {
    let registry = user::registry_builder()
        .pre_process_fn(|command, _| {
            let lowered = command.get_str("username").map(str::to_lowercase);
            Ok(PreProcessed::Command(match lowered {
                Some(name) => command.with_payload_entry("username", name),
                None => command,
            }))
        })
        .build()
        .unwrap();
    let h = harness(registry);
    h.runtime.dispatch(register_user("u1", "alice", "a@x.com")).unwrap();

    let result = h.runtime.dispatch(change_username("u1", "BOB")).unwrap();

    assert_eq!(result.events[0].event.get_str("newName"), Some("bob"));
}

#[test]
fn rewritten_payload_is_validated() {
    let registry = ProcessRegistry::builder()
        .register("RegisterUser", "User", "userId", Lifecycle::New, user::handle_register)
        .payload_schema(user::register_schema())
        .pre_process_fn(|command, _| {
            Ok(PreProcessed::Command(command.with_payload_entry("username", "x")))
        })
        .record_that("UserRegistered", apply_typed(user::user_registered))
        .build()
        .unwrap();
    let h = harness(registry);

    let err = h
        .runtime
        .dispatch(register_user("u1", "alice", "a@x.com"))
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    assert!(h.store.load_stream(STREAM, 0, None).unwrap().is_empty());
}

#[test]
fn pre_processor_redirects_once() {
    let registry = user::registry_builder()
        .register(
            "RenameUser",
            "User",
            "userId",
            Lifecycle::Existing,
            user::handle_change_username,
        )
        .records("UsernameChanged")
        .pre_process_fn(rename_to_change)
        .build()
        .unwrap();
    let h = harness(registry);
    h.runtime.dispatch(register_user("u1", "alice", "a@x.com")).unwrap();

    let command = Message::command("RenameUser", json!({ "userId": "u1", "username": "bob" }))
        .unwrap();
    let result = h.runtime.dispatch(command).unwrap();

    assert_eq!(result.command.name(), "ChangeUsername");
    assert_eq!(result.version, 2);
    assert_eq!(result.event_names(), vec!["UsernameChanged"]);
}

#[test]
fn second_redirect_is_a_configuration_error() {
    let registry = user::registry_builder()
        .register(
            "RenameUser",
            "User",
            "userId",
            Lifecycle::Existing,
            user::handle_change_username,
        )
        .records("UsernameChanged")
        .pre_process_fn(rename_to_change)
        .register(
            "LegacyRename",
            "User",
            "userId",
            Lifecycle::Existing,
            user::handle_change_username,
        )
        .records("UsernameChanged")
        .pre_process_fn(|command, factory| {
            let next = factory.create_message(
                "RenameUser",
                command.payload_value(),
                command.metadata().clone(),
            )?;
            Ok(PreProcessed::Command(next))
        })
        .build()
        .unwrap();
    let h = harness(registry);
    h.runtime.dispatch(register_user("u1", "alice", "a@x.com")).unwrap();

    let command = Message::command("LegacyRename", json!({ "userId": "u1", "username": "bob" }))
        .unwrap();
    let err = h.runtime.dispatch(command).unwrap_err();

    assert!(matches!(
        err,
        DispatchError::Configuration(ConfigurationError::RedirectLimit { .. })
    ));
    assert_eq!(h.store.last_version(STREAM, "User", "u1").unwrap(), 1);
}

#[test]
fn pre_processor_short_circuits() {
    let registry = user::registry_builder()
        .register(
            "PingUser",
            "User",
            "userId",
            Lifecycle::Existing,
            user::handle_change_username,
        )
        .records("UsernameChanged")
        .pre_process_fn(|command, _| {
            Ok(PreProcessed::Done(CommandDispatchResult::short_circuit(
                command, "User",
            )))
        })
        .build()
        .unwrap();
    let h = harness(registry);

    let command = Message::command("PingUser", json!({ "userId": "nobody" })).unwrap();
    let result = h.runtime.dispatch(command).unwrap();

    assert!(result.is_short_circuit());
    assert!(result.events.is_empty());
    assert!(h.store.load_stream(STREAM, 0, None).unwrap().is_empty());
}

fn moderated_registry() -> ProcessRegistry {
    user::registry_builder()
        .register(
            "ModerateUsername",
            "User",
            "userId",
            Lifecycle::Existing,
            |inv| {
                let banned = inv.context[0]["banned"].as_array().cloned().unwrap_or_default();
                let wanted = inv
                    .command
                    .get("username")
                    .cloned()
                    .unwrap_or(Value::Null);
                if banned.contains(&wanted) {
                    return Err(DispatchError::rejected("username not allowed"));
                }
                user::handle_change_username(inv)
            },
        )
        .records("UsernameChanged")
        .context_fn(|_| Ok(json!({ "banned": ["root", "admin"] })))
        .build()
        .unwrap()
}

#[test]
fn context_reaches_handle() {
    let h = harness(moderated_registry());
    h.runtime.dispatch(register_user("u1", "alice", "a@x.com")).unwrap();

    let command = |name: &str| {
        Message::command("ModerateUsername", json!({ "userId": "u1", "username": name })).unwrap()
    };

    let err = h.runtime.dispatch(command("admin")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Rejected);
    assert_eq!(err.status_code(), 422);
    assert_eq!(h.store.last_version(STREAM, "User", "u1").unwrap(), 1);

    let result = h.runtime.dispatch(command("bob")).unwrap();
    assert_eq!(result.version, 2);
}

#[test]
fn failing_context_provider_aborts() {
    let registry = user::registry_builder()
        .context_fn(|_| Err(DispatchError::rejected("directory offline")))
        .build()
        .unwrap();
    let h = harness(registry);
    h.runtime.dispatch(register_user("u1", "alice", "a@x.com")).unwrap();

    let err = h.runtime.dispatch(change_username("u1", "bob")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Rejected);
    assert_eq!(h.store.last_version(STREAM, "User", "u1").unwrap(), 1);
}

#[test]
fn several_events_append_atomically() {
    let registry = user::registry_builder()
        .register("ImportUser", "User", "userId", Lifecycle::New, |inv| {
            let user_id = inv.pid;
            Ok(vec![
                inv.event(
                    "UserRegistered",
                    json!({ "userId": user_id, "username": "legacy", "email": "l@x.com" }),
                )?,
                inv.event(
                    "UsernameChanged",
                    json!({ "userId": user_id, "oldName": "legacy", "newName": "imported" }),
                )?,
            ])
        })
        .records("UserRegistered")
        .records("UsernameChanged")
        .build()
        .unwrap();
    let h = harness(registry);

    let command = Message::command("ImportUser", json!({ "userId": "u9" })).unwrap();
    let result = h.runtime.dispatch(command).unwrap();

    let versions: Vec<u64> = result.events.iter().map(|e| e.version).collect();
    assert_eq!(versions, vec![1, 2]);
    assert_eq!(result.version, 2);
    assert_eq!(
        result.state.as_ref().and_then(|s| s.get_str("username")),
        Some("imported")
    );
    assert_eq!(result.events[1].event.meta("_version"), Some(&json!(2)));
}

#[test]
fn unlisted_event_is_a_configuration_error() {
    let registry = user::registry_builder()
        .register("Touch", "User", "userId", Lifecycle::Existing, |inv| {
            Ok(vec![inv.event("UserRegistered", json!({}))?])
        })
        .records("UsernameChanged")
        .build()
        .unwrap();
    let h = harness(registry);
    h.runtime.dispatch(register_user("u1", "alice", "a@x.com")).unwrap();

    let err = h
        .runtime
        .dispatch(Message::command("Touch", json!({ "userId": "u1" })).unwrap())
        .unwrap_err();

    assert!(matches!(
        err,
        DispatchError::Configuration(ConfigurationError::UnlistedEvent { ref event, .. })
            if event == "UserRegistered"
    ));
    assert_eq!(err.status_code(), 500);
    assert_eq!(h.store.last_version(STREAM, "User", "u1").unwrap(), 1);
}

#[test]
fn handle_must_yield_events() {
    let registry = user::registry_builder()
        .register("Echo", "User", "userId", Lifecycle::Existing, |_| {
            Ok(vec![Message::command("UsernameChanged", json!({}))?])
        })
        .records("UsernameChanged")
        .build()
        .unwrap();
    let h = harness(registry);
    h.runtime.dispatch(register_user("u1", "alice", "a@x.com")).unwrap();

    let err = h
        .runtime
        .dispatch(Message::command("Echo", json!({ "userId": "u1" })).unwrap())
        .unwrap_err();

    assert!(matches!(
        err,
        DispatchError::Configuration(ConfigurationError::NotAnEvent { .. })
    ));
}

#[test]
fn apply_failure_leaves_store_untouched() {
    let registry = ProcessRegistry::builder()
        .register("Open", "Ledger", "ledgerId", Lifecycle::New, |inv| {
            Ok(vec![inv.event("Opened", json!({}))?])
        })
        .record_that("Opened", |_, _| Err(DispatchError::rejected("ledger cannot open")))
        .build()
        .unwrap();
    let h = harness(registry);

    let err = h
        .runtime
        .dispatch(Message::command("Open", json!({ "ledgerId": "l1" })).unwrap())
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Rejected);
    assert_eq!(h.store.last_version(STREAM, "Ledger", "l1").unwrap(), 0);
}
