use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store::DocumentStore;

fn store_ref<'a>(state: &'a AppState, req: &Request) -> Result<&'a DocumentStore, serde_json::Value> {
    state
        .store
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Lookup tables the class forms are built from: subjects and class types.
fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let snapshot = store.snapshot();
    let subjects: Vec<serde_json::Value> = snapshot
        .subjects
        .iter()
        .map(|s| serde_json::to_value(s).unwrap_or_default())
        .collect();

    ok(
        &req.id,
        json!({ "generation": snapshot.generation, "subjects": subjects }),
    )
}

fn handle_class_types_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let snapshot = store.snapshot();
    let class_types: Vec<serde_json::Value> = snapshot
        .class_types
        .iter()
        .map(|t| serde_json::to_value(t).unwrap_or_default())
        .collect();

    ok(
        &req.id,
        json!({ "generation": snapshot.generation, "classTypes": class_types }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "classTypes.list" => Some(handle_class_types_list(state, req)),
        _ => None,
    }
}
