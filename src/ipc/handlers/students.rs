use crate::ipc::error::{no_workspace, not_found, ok, store_err};
use crate::ipc::helpers::{parse_param_or_default, parse_params, required_str};
use crate::ipc::types::{AppState, Request};
use crate::model::{NewStudent, ScoreDeltas, StudentPatch};
use serde_json::json;

fn handle_students_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return no_workspace(&req.id);
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let input: NewStudent = match parse_params(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match store.add_student(class_id, &input) {
        Some(student) => ok(&req.id, json!({ "studentId": student.id, "student": student })),
        None => not_found(&req.id, "class"),
    }
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return no_workspace(&req.id);
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let patch: StudentPatch = match parse_param_or_default(req, "patch") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    if !store.update_student(class_id, student_id, &patch) {
        return not_found(&req.id, "student");
    }
    let student = store
        .class(class_id)
        .and_then(|c| c.students.into_iter().find(|s| s.id == student_id));
    ok(&req.id, json!({ "student": student }))
}

fn handle_students_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return no_workspace(&req.id);
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    if !store.remove_student(class_id, student_id) {
        return not_found(&req.id, "student");
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_students_batch_adjust(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return no_workspace(&req.id);
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let deltas: ScoreDeltas = match parse_params(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match store.batch_adjust(class_id, &deltas) {
        Ok(0) if store.class(class_id).is_none() => not_found(&req.id, "class"),
        Ok(applied) => ok(&req.id, json!({ "applied": applied })),
        Err(e) => store_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.add" => Some(handle_students_add(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.remove" => Some(handle_students_remove(state, req)),
        "students.batchAdjust" => Some(handle_students_batch_adjust(state, req)),
        _ => None,
    }
}
