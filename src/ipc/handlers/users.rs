use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::Role;
use crate::store::DocumentStore;

fn store_ref<'a>(state: &'a AppState, req: &Request) -> Result<&'a DocumentStore, serde_json::Value> {
    state
        .store
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let role = match req.params.get("role").and_then(|v| v.as_str()) {
        None => None,
        Some(raw) => match Role::parse(raw) {
            Some(role) => Some(role),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("unknown role: {raw}"),
                    None,
                )
            }
        },
    };

    let snapshot = store.snapshot();
    let users: Vec<serde_json::Value> = snapshot
        .users
        .iter()
        .filter(|u| role.map(|r| u.roles.contains(&r)).unwrap_or(true))
        .map(|u| serde_json::to_value(u).unwrap_or_default())
        .collect();

    ok(&req.id, json!({ "users": users }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.list" => Some(handle_users_list(state, req)),
        _ => None,
    }
}
