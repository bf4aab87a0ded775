use crate::assistant::is_valid_api_key;
use crate::ipc::error::{err, no_workspace, ok, store_err};
use crate::ipc::helpers::{optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::model::ModelId;
use serde_json::json;

fn handle_settings_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_ref() else {
        return no_workspace(&req.id);
    };

    if let Some(key) = optional_str(req, "key") {
        return match store.get(key) {
            Some(value) => ok(&req.id, json!({ "key": key, "value": value })),
            None => err(&req.id, "not_found", format!("unknown setting: {key}"), None),
        };
    }

    let settings = store.settings();
    let models: Vec<&str> = ModelId::ALL.iter().map(|m| m.as_str()).collect();
    ok(
        &req.id,
        json!({
            "apiKey": settings.api_key,
            "apiKeyValid": is_valid_api_key(&settings.api_key),
            "model": settings.model.as_str(),
            "darkMode": settings.dark_mode,
            "models": models,
        }),
    )
}

fn handle_settings_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return no_workspace(&req.id);
    };
    let key = match required_str(req, "key") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(value) = req.params.get("value").cloned() else {
        return err(&req.id, "bad_params", "missing value", None);
    };

    match store.set(key, value) {
        Ok(()) => ok(&req.id, json!({ "key": key, "value": store.get(key) })),
        Err(e) => store_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.set" => Some(handle_settings_set(state, req)),
        _ => None,
    }
}
