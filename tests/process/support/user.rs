//! The `User` process used across the integration suites.

use serde::{Deserialize, Serialize};
use serde_json::json;
use sourced_process::{
    apply_typed, DispatchError, Invocation, Lifecycle, Message, ProcessRegistry, RegistryBuilder,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: String,
    pub username: String,
    pub email: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterUser {
    user_id: String,
    username: String,
    email: String,
}

pub fn register_user(user_id: &str, username: &str, email: &str) -> Message {
    Message::command(
        "RegisterUser",
        json!({ "userId": user_id, "username": username, "email": email }),
    )
    .unwrap()
}

pub fn change_username(user_id: &str, username: &str) -> Message {
    Message::command("ChangeUsername", json!({ "userId": user_id, "username": username }))
        .unwrap()
}

pub fn handle_register(inv: &Invocation<'_>) -> Result<Vec<Message>, DispatchError> {
    let command: RegisterUser = inv.payload_as()?;
    Ok(vec![inv.event_from("UserRegistered", &command)?])
}

pub fn handle_change_username(inv: &Invocation<'_>) -> Result<Vec<Message>, DispatchError> {
    let user: User = inv
        .state_as()?
        .ok_or_else(|| DispatchError::rejected("user has no state"))?;
    let username = inv
        .command
        .get_str("username")
        .ok_or_else(|| DispatchError::invalid("username is required"))?;

    if username == user.username {
        return Ok(vec![]);
    }
    Ok(vec![inv.event(
        "UsernameChanged",
        json!({ "userId": user.user_id, "oldName": user.username, "newName": username }),
    )?])
}

pub fn user_registered(_: Option<User>, event: &Message) -> Result<User, DispatchError> {
    Ok(event.payload_as()?)
}

pub fn username_changed(state: Option<User>, event: &Message) -> Result<User, DispatchError> {
    let mut user = state.ok_or_else(|| DispatchError::rejected("rename before registration"))?;
    if let Some(name) = event.get_str("newName") {
        user.username = name.to_string();
    }
    Ok(user)
}

pub fn register_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "required": ["username", "email"],
        "properties": {
            "userId": { "type": ["string", "integer"] },
            "username": { "type": "string", "minLength": 3 },
            "email": { "type": "string", "minLength": 3 }
        }
    })
}

/// RegisterUser (new) and ChangeUsername (existing), ready for more commands.
pub fn registry_builder() -> RegistryBuilder {
    ProcessRegistry::builder()
        .register("RegisterUser", "User", "userId", Lifecycle::New, handle_register)
        .payload_schema(register_schema())
        .record_that("UserRegistered", apply_typed(user_registered))
        .register(
            "ChangeUsername",
            "User",
            "userId",
            Lifecycle::Existing,
            handle_change_username,
        )
        .record_that("UsernameChanged", apply_typed(username_changed))
}

pub fn registry() -> ProcessRegistry {
    registry_builder().build().unwrap()
}
