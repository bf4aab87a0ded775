use crate::ipc::error::{no_workspace, not_found, ok};
use crate::ipc::helpers::{optional_str, parse_param, required_str};
use crate::ipc::types::{AppState, Request};
use crate::model::LessonRecord;
use serde_json::json;

fn handle_lessons_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_ref() else {
        return ok(&req.id, json!({ "lessons": [] }));
    };
    let lessons = match optional_str(req, "classId") {
        Some(class_id) => store.lessons_for_class(class_id),
        None => store.lessons(),
    };
    ok(&req.id, json!({ "lessons": lessons }))
}

fn handle_lessons_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return no_workspace(&req.id);
    };
    let lesson: LessonRecord = match parse_param(req, "lesson") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let saved = store.save_lesson(lesson);
    ok(&req.id, json!({ "lessonId": saved.id, "lesson": saved }))
}

fn handle_lessons_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return no_workspace(&req.id);
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    if !store.delete_lesson(lesson_id) {
        return not_found(&req.id, "lesson");
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "lessons.list" => Some(handle_lessons_list(state, req)),
        "lessons.save" => Some(handle_lessons_save(state, req)),
        "lessons.delete" => Some(handle_lessons_delete(state, req)),
        _ => None,
    }
}
