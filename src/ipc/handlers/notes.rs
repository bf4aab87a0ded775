use crate::assistant::summarize_notes;
use crate::ipc::error::{chat_err, no_workspace, not_found, ok, store_err};
use crate::ipc::helpers::{parse_param_or_default, required_str};
use crate::ipc::types::{AppState, Request};
use crate::model::NotePatch;
use serde_json::json;

fn handle_notes_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return no_workspace(&req.id);
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let text = req
        .params
        .get("text")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    match store.add_note(class_id, text) {
        Ok(Some(note)) => ok(&req.id, json!({ "noteId": note.id, "note": note })),
        Ok(None) => not_found(&req.id, "class"),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_notes_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return no_workspace(&req.id);
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let note_id = match required_str(req, "noteId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let patch: NotePatch = match parse_param_or_default(req, "patch") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    if !store.update_note(class_id, note_id, &patch) {
        return not_found(&req.id, "note");
    }
    let note = store
        .class(class_id)
        .and_then(|c| c.notes.into_iter().find(|n| n.id == note_id));
    ok(&req.id, json!({ "note": note }))
}

fn handle_notes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return no_workspace(&req.id);
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let note_id = match required_str(req, "noteId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    if !store.delete_note(class_id, note_id) {
        return not_found(&req.id, "note");
    }
    ok(&req.id, json!({ "ok": true }))
}

/// Summarises one note through the chat service and stores the summary on it.
fn handle_notes_summarize(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return no_workspace(&req.id);
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let note_id = match required_str(req, "noteId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(note) = store
        .class(class_id)
        .and_then(|c| c.notes.into_iter().find(|n| n.id == note_id))
    else {
        return not_found(&req.id, "note");
    };

    let summary = match summarize_notes(state.chat.as_ref(), &store.settings(), &[note]) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, class_id, note_id, "note summary failed");
            return chat_err(&req.id, &e);
        }
    };

    let patch = NotePatch {
        text: None,
        summary: Some(summary.clone()),
    };
    // The note may have gone while the request was in flight.
    if !store.update_note(class_id, note_id, &patch) {
        return not_found(&req.id, "note");
    }
    ok(&req.id, json!({ "noteId": note_id, "summary": summary }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "notes.add" => Some(handle_notes_add(state, req)),
        "notes.update" => Some(handle_notes_update(state, req)),
        "notes.delete" => Some(handle_notes_delete(state, req)),
        "notes.summarize" => Some(handle_notes_summarize(state, req)),
        _ => None,
    }
}
