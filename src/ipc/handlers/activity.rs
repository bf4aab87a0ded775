use crate::ipc::error::ok;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_activity_recent(state: &mut AppState, req: &Request) -> serde_json::Value {
    let entries = state
        .store
        .as_ref()
        .map(|s| s.recent_activity())
        .unwrap_or_default();
    ok(&req.id, json!({ "entries": entries }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "activity.recent" => Some(handle_activity_recent(state, req)),
        _ => None,
    }
}
