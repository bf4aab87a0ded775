use crate::backup;
use crate::ipc::error::{err, no_workspace, ok};
use crate::ipc::helpers::{optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_data_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_ref() else {
        return no_workspace(&req.id);
    };

    let text = match store.export_data() {
        Ok(v) => v,
        Err(e) => return err(&req.id, "export_failed", format!("{e:#}"), None),
    };

    let Some(out_path) = optional_str(req, "outPath") else {
        return ok(&req.id, json!({ "json": text }));
    };
    if let Err(e) = std::fs::write(out_path, &text) {
        return err(
            &req.id,
            "export_failed",
            e.to_string(),
            Some(json!({ "path": out_path })),
        );
    }
    ok(&req.id, json!({ "path": out_path, "bytes": text.len() }))
}

/// Takes the document inline as `json`, or from a file at `inPath`.
fn handle_data_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return no_workspace(&req.id);
    };

    let text = match (optional_str(req, "json"), optional_str(req, "inPath")) {
        (Some(text), _) => text.to_string(),
        (None, Some(in_path)) => match std::fs::read_to_string(in_path) {
            Ok(v) => v,
            Err(e) => {
                return err(
                    &req.id,
                    "import_failed",
                    e.to_string(),
                    Some(json!({ "path": in_path })),
                )
            }
        },
        (None, None) => return err(&req.id, "bad_params", "missing json or inPath", None),
    };

    if !store.import_data(&text) {
        return err(&req.id, "import_failed", "file is not a usable export", None);
    }
    ok(
        &req.id,
        json!({
            "classes": store.classes().len(),
            "lessons": store.lessons().len(),
        }),
    )
}

fn handle_data_clear(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return no_workspace(&req.id);
    };
    store.clear_all_data();
    ok(&req.id, json!({ "ok": true }))
}

fn handle_backup_export_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_ref() else {
        return no_workspace(&req.id);
    };
    let out_path = match required_str(req, "outPath") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let export = store
        .export_data()
        .and_then(|text| backup::export_bundle(&text, &PathBuf::from(out_path)));
    let summary = match export {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "export_failed",
                format!("{e:#}"),
                Some(json!({ "path": out_path })),
            )
        }
    };

    ok(
        &req.id,
        json!({
            "path": out_path,
            "bundleFormat": summary.bundle_format,
            "entryCount": summary.entry_count,
            "sha256": summary.sha256,
        }),
    )
}

fn handle_backup_import_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return no_workspace(&req.id);
    };
    let in_path = match required_str(req, "inPath") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let src = PathBuf::from(in_path);
    if !src.is_file() {
        return err(
            &req.id,
            "bad_params",
            "input bundle does not exist",
            Some(json!({ "path": in_path })),
        );
    }

    let bundle = match backup::read_bundle(&src) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), path = in_path, "bundle rejected");
            return err(
                &req.id,
                "import_failed",
                format!("{e:#}"),
                Some(json!({ "path": in_path })),
            );
        }
    };
    if !store.import_data(&bundle.payload) {
        return err(
            &req.id,
            "import_failed",
            "bundle payload is not a usable export",
            Some(json!({ "path": in_path })),
        );
    }

    ok(
        &req.id,
        json!({
            "path": in_path,
            "bundleFormatDetected": bundle.bundle_format_detected,
            "classes": store.classes().len(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "data.export" => Some(handle_data_export(state, req)),
        "data.import" => Some(handle_data_import(state, req)),
        "data.clear" => Some(handle_data_clear(state, req)),
        "backup.exportBundle" => Some(handle_backup_export_bundle(state, req)),
        "backup.importBundle" => Some(handle_backup_import_bundle(state, req)),
        _ => None,
    }
}
