use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

const IMPORT_SECTION_KEY: &str = "setup.import";
const DEFAULT_SESSION_TTL_MINUTES: i64 = 60;

fn import_defaults(conn: &rusqlite::Connection) -> serde_json::Value {
    let stored = db::settings_get_json(conn, IMPORT_SECTION_KEY)
        .ok()
        .flatten()
        .unwrap_or_else(|| json!({}));
    json!({
        "sessionTtlMinutes": stored
            .get("sessionTtlMinutes")
            .and_then(|v| v.as_i64())
            .unwrap_or(DEFAULT_SESSION_TTL_MINUTES),
    })
}

fn handle_import_defaults_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    ok(&req.id, json!({ "importDefaults": import_defaults(conn) }))
}

fn handle_import_defaults_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let mut section = import_defaults(conn);
    if let Some(v) = patch.get("sessionTtlMinutes") {
        let Some(ttl) = v.as_i64() else {
            return err(
                &req.id,
                "bad_params",
                "patch.sessionTtlMinutes must be an integer",
                None,
            );
        };
        section["sessionTtlMinutes"] = json!(ttl);
    }

    if let Err(e) = db::settings_set_json(conn, IMPORT_SECTION_KEY, &section) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "importDefaults": section }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.importDefaults.get" => Some(handle_import_defaults_get(state, req)),
        "setup.importDefaults.update" => Some(handle_import_defaults_update(state, req)),
        _ => None,
    }
}
