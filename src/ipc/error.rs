use serde_json::json;

use crate::assistant::ChatError;
use crate::error::StoreError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn no_workspace(id: &str) -> serde_json::Value {
    err(id, "no_workspace", "select a workspace first", None)
}

pub fn not_found(id: &str, what: &str) -> serde_json::Value {
    err(id, "not_found", format!("{what} not found"), None)
}

pub fn store_err(id: &str, e: &StoreError) -> serde_json::Value {
    err(id, e.code(), e.to_string(), None)
}

pub fn chat_err(id: &str, e: &ChatError) -> serde_json::Value {
    err(id, e.code(), e.to_string(), None)
}
