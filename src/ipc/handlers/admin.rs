use std::collections::BTreeMap;

use crate::admin::{EventPatch, NewAor, NewEvent, TaskStatus, TASK_TEMPLATES};
use crate::ipc::error::{err, no_workspace, not_found, ok, store_err};
use crate::ipc::helpers::{parse_param, parse_param_or_default, parse_params, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_events_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let templates: Vec<serde_json::Value> = TASK_TEMPLATES
        .iter()
        .map(|t| json!({ "key": t.key, "label": t.label, "fields": t.fields }))
        .collect();
    let events = state
        .store
        .as_ref()
        .map(|s| s.events())
        .unwrap_or_default();
    ok(&req.id, json!({ "events": events, "templates": templates }))
}

fn handle_events_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return no_workspace(&req.id);
    };
    let input: NewEvent = match parse_params(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match store.create_event(&input) {
        Ok(event) => ok(&req.id, json!({ "eventId": event.id, "event": event })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_events_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return no_workspace(&req.id);
    };
    let event_id = match required_str(req, "eventId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let patch: EventPatch = match parse_param_or_default(req, "patch") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match store.update_event(event_id, &patch) {
        Ok(true) => ok(&req.id, json!({ "event": store.event(event_id) })),
        Ok(false) => not_found(&req.id, "event"),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_events_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return no_workspace(&req.id);
    };
    let event_id = match required_str(req, "eventId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    if !store.delete_event(event_id) {
        return not_found(&req.id, "event");
    }
    ok(&req.id, json!({ "ok": true }))
}

/// Shared tail for the task mutations: the refreshed event, or `not_found`.
fn task_result(state: &AppState, req: &Request, event_id: &str, changed: bool) -> serde_json::Value {
    if !changed {
        return not_found(&req.id, "event task");
    }
    let event = state.store.as_ref().and_then(|s| s.event(event_id));
    ok(&req.id, json!({ "event": event }))
}

fn handle_tasks_set_enabled(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return no_workspace(&req.id);
    };
    let event_id = match required_str(req, "eventId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let task_key = match required_str(req, "taskKey") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(enabled) = req.params.get("enabled").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "missing enabled", None);
    };

    let changed = store.set_task_enabled(event_id, task_key, enabled);
    task_result(state, req, event_id, changed)
}

fn handle_tasks_set_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return no_workspace(&req.id);
    };
    let event_id = match required_str(req, "eventId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let task_key = match required_str(req, "taskKey") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let status: TaskStatus = match parse_param(req, "status") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let changed = store.set_task_status(event_id, task_key, status);
    task_result(state, req, event_id, changed)
}

fn handle_tasks_save_data(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return no_workspace(&req.id);
    };
    let event_id = match required_str(req, "eventId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let task_key = match required_str(req, "taskKey") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let data: BTreeMap<String, String> = match parse_param(req, "data") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let changed = store.save_task_data(event_id, task_key, &data);
    task_result(state, req, event_id, changed)
}

fn handle_aors_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let aors = state
        .store
        .as_ref()
        .map(|s| s.aors())
        .unwrap_or_default();
    ok(&req.id, json!({ "aors": aors }))
}

fn handle_aors_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return no_workspace(&req.id);
    };
    let input: NewAor = match parse_params(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let aor = store.add_aor(&input);
    ok(&req.id, json!({ "aorId": aor.id, "aor": aor }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "admin.events.list" => Some(handle_events_list(state, req)),
        "admin.events.create" => Some(handle_events_create(state, req)),
        "admin.events.update" => Some(handle_events_update(state, req)),
        "admin.events.delete" => Some(handle_events_delete(state, req)),
        "admin.tasks.setEnabled" => Some(handle_tasks_set_enabled(state, req)),
        "admin.tasks.setStatus" => Some(handle_tasks_set_status(state, req)),
        "admin.tasks.saveData" => Some(handle_tasks_save_data(state, req)),
        "admin.aors.list" => Some(handle_aors_list(state, req)),
        "admin.aors.create" => Some(handle_aors_create(state, req)),
        _ => None,
    }
}
