use crate::ipc::error::{no_workspace, not_found, ok};
use crate::ipc::helpers::{parse_param_or_default, parse_params, required_str};
use crate::ipc::types::{AppState, Request};
use crate::model::{ClassPatch, NewClass};
use serde_json::json;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    // Counts only; `classes.get` carries the full record.
    let classes: Vec<serde_json::Value> = store
        .classes()
        .iter()
        .map(|c| {
            json!({
                "id": c.id,
                "name": c.name,
                "level": c.level,
                "subject": c.subject,
                "studentCount": c.students.len(),
                "noteCount": c.notes.len(),
                "lessonCount": store.lessons_for_class(&c.id).len(),
                "updatedAt": c.updated_at,
            })
        })
        .collect();
    ok(&req.id, json!({ "classes": classes }))
}

fn handle_classes_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_ref() else {
        return no_workspace(&req.id);
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match store.class(class_id) {
        Some(class) => ok(&req.id, json!({ "class": class })),
        None => not_found(&req.id, "class"),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return no_workspace(&req.id);
    };
    let input: NewClass = match parse_params(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let class = store.add_class(&input);
    ok(&req.id, json!({ "classId": class.id, "class": class }))
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return no_workspace(&req.id);
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let patch: ClassPatch = match parse_param_or_default(req, "patch") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    if !store.update_class(class_id, &patch) {
        return not_found(&req.id, "class");
    }
    ok(&req.id, json!({ "class": store.class(class_id) }))
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return no_workspace(&req.id);
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    if !store.delete_class(class_id) {
        return not_found(&req.id, "class");
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_classes_trend(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_ref() else {
        return no_workspace(&req.id);
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match store.class_trend(class_id) {
        Some(trend) => ok(&req.id, json!({ "trend": trend })),
        None => not_found(&req.id, "class"),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.get" => Some(handle_classes_get(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.update" => Some(handle_classes_update(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        "classes.trend" => Some(handle_classes_trend(state, req)),
        _ => None,
    }
}
