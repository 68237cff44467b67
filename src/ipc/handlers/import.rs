use chrono::Utc;
use rusqlite::Connection;
use serde_json::{json, Value};

use crate::classify;
use crate::commit::{self, CommitSummary, RowResult};
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{
    get_required_i64, get_required_str, get_setup_i64, row_fields_from_value,
};
use crate::ipc::types::{AppState, Request};
use crate::staging::{self, SessionRecord, StagedRow, StatusCounts};

const IMPORT_SECTION_KEY: &str = "setup.import";
const DEFAULT_SESSION_TTL_MINUTES: i64 = 60;

fn row_json(row: &StagedRow) -> Value {
    json!({
        "rowIndex": row.row_index,
        "studentCode": row.fields.student_code,
        "email": row.fields.email,
        "firstName": row.fields.first_name,
        "lastName": row.fields.last_name,
        "status": row.status.as_str(),
        "note": row.note,
    })
}

fn counts_json(counts: &StatusCounts) -> Value {
    json!({
        "new": counts.new,
        "existsNotEnrolled": counts.exists_not_enrolled,
        "alreadyEnrolled": counts.already_enrolled,
        "duplicateIdentity": counts.duplicate_identity,
        "missing": counts.missing,
    })
}

fn summary_json(summary: &CommitSummary) -> Value {
    json!({
        "total": summary.total,
        "enrolled": summary.enrolled,
        "alreadyEnrolled": summary.already_enrolled,
        "failed": summary.failed,
        "skipped": summary.skipped,
    })
}

fn result_json(result: &RowResult) -> Value {
    json!({
        "rowIndex": result.row_index,
        "studentCode": result.student_code,
        "result": result.outcome.as_str(),
        "note": result.note,
    })
}

fn require_offering(conn: &Connection, offering_id: &str) -> Result<(), HandlerErr> {
    use rusqlite::OptionalExtension;
    let hit: Option<i64> = conn
        .query_row("SELECT 1 FROM offerings WHERE id = ?", [offering_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    if hit.is_none() {
        return Err(HandlerErr::new("not_found", "offering not found"));
    }
    Ok(())
}

/// Load a session for a mutating operation. Expiry is an absolute deadline
/// checked on every access; consumed sessions are simply gone.
fn load_active_session(
    conn: &Connection,
    session_id: &str,
    now: chrono::DateTime<Utc>,
) -> Result<SessionRecord, HandlerErr> {
    let session = staging::load_session(conn, session_id)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .ok_or_else(|| HandlerErr::new("not_found", "import session not found"))?;
    if session.is_expired(now) {
        return Err(HandlerErr::with_details(
            "session_expired",
            "import session has expired; start a new preview",
            json!({ "expiresAt": session.expires_at.to_rfc3339() }),
        ));
    }
    Ok(session)
}

fn handle_preview_roster(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let offering_id = match get_required_str(&req.params, "offeringId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let staff_id = match get_required_str(&req.params, "staffId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(raw_rows) = req.params.get("rows").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing rows", None);
    };

    let mut rows = Vec::with_capacity(raw_rows.len());
    for value in raw_rows {
        match row_fields_from_value(value) {
            Ok(fields) => rows.push(fields),
            Err(e) => return e.response(&req.id),
        }
    }

    if let Err(e) = require_offering(conn, &offering_id) {
        return e.response(&req.id);
    }

    let now = Utc::now();
    match staging::purge_expired(conn, now) {
        Ok(purged) if purged > 0 => {
            tracing::debug!(purged, "purged expired import sessions");
        }
        Ok(_) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let ttl_minutes = get_setup_i64(
        conn,
        IMPORT_SECTION_KEY,
        "sessionTtlMinutes",
        DEFAULT_SESSION_TTL_MINUTES,
    );
    let (session, staged) =
        match staging::create_session(conn, &offering_id, &staff_id, &rows, ttl_minutes, now) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
        };

    let counts = StatusCounts::tally(&staged);
    tracing::info!(
        session_id = %session.id,
        offering_id = %offering_id,
        rows = staged.len(),
        "import preview created"
    );

    ok(
        &req.id,
        json!({
            "sessionId": session.id,
            "offeringId": session.offering_id,
            "createdBy": session.created_by,
            "expiresAt": session.expires_at.to_rfc3339(),
            "rowsTotal": staged.len(),
            "counts": counts_json(&counts),
            "rows": staged.iter().map(row_json).collect::<Vec<_>>(),
        }),
    )
}

fn handle_get_preview(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let session_id = match get_required_str(&req.params, "sessionId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let session = match staging::load_session(conn, &session_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "import session not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match staging::session_rows(conn, &session_id, false) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let counts = StatusCounts::tally(&rows);

    // Reads surface expiry instead of failing so the operator can see what
    // the session held; every mutating operation rejects expired sessions.
    ok(
        &req.id,
        json!({
            "sessionId": session.id,
            "offeringId": session.offering_id,
            "createdBy": session.created_by,
            "createdAt": session.created_at.to_rfc3339(),
            "expiresAt": session.expires_at.to_rfc3339(),
            "expired": session.is_expired(Utc::now()),
            "rowsTotal": rows.len(),
            "counts": counts_json(&counts),
            "rows": rows.iter().map(row_json).collect::<Vec<_>>(),
        }),
    )
}

fn handle_edit_preview_row(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let offering_id = match get_required_str(&req.params, "offeringId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let session_id = match get_required_str(&req.params, "sessionId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let row_index = match get_required_i64(&req.params, "rowIndex") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let now = Utc::now();
    let session = match load_active_session(conn, &session_id, now) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    if session.offering_id != offering_id {
        return err(
            &req.id,
            "offering_mismatch",
            "import session belongs to a different offering",
            None,
        );
    }

    let row = match staging::load_row(conn, &session_id, row_index) {
        Ok(Some(r)) if !r.deleted => r,
        Ok(_) => return err(&req.id, "not_found", "import row not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Merge supplied fields over current values; unset fields keep theirs.
    // Editing a field to blank is allowed and classifies as missing.
    let mut merged = row.fields.clone();
    for (key, slot) in [
        ("studentCode", &mut merged.student_code as &mut String),
        ("email", &mut merged.email),
        ("firstName", &mut merged.first_name),
        ("lastName", &mut merged.last_name),
    ] {
        if let Some(v) = patch.get(key) {
            let Some(s) = v.as_str() else {
                return err(
                    &req.id,
                    "bad_params",
                    format!("patch.{} must be a string", key),
                    None,
                );
            };
            *slot = s.trim().to_string();
        }
    }

    let classified = match classify::classify_row(conn, &session.offering_id, &merged) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(e) = staging::update_row(conn, &session_id, row_index, &merged, &classified) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    let updated = StagedRow {
        row_index,
        fields: merged,
        status: classified.status,
        note: classified.note,
        deleted: false,
    };
    ok(&req.id, json!({ "row": row_json(&updated) }))
}

fn handle_delete_preview_row(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let session_id = match get_required_str(&req.params, "sessionId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let row_index = match get_required_i64(&req.params, "rowIndex") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let now = Utc::now();
    if let Err(e) = load_active_session(conn, &session_id, now) {
        return e.response(&req.id);
    }

    match staging::load_row(conn, &session_id, row_index) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "import row not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if let Err(e) = staging::soft_delete_row(conn, &session_id, row_index) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_confirm(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let offering_id = match get_required_str(&req.params, "offeringId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let session_id = match get_required_str(&req.params, "sessionId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let now = Utc::now();
    let session = match load_active_session(conn, &session_id, now) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    if session.offering_id != offering_id {
        return err(
            &req.id,
            "offering_mismatch",
            "import session belongs to a different offering",
            None,
        );
    }

    // Partial failure is an expected outcome: the call succeeds with a
    // mixed-result payload and the session is consumed either way.
    let (results, summary) = match commit::confirm_session(conn, &session, now) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };

    tracing::info!(
        session_id = %session.id,
        offering_id = %offering_id,
        total = summary.total,
        enrolled = summary.enrolled,
        already_enrolled = summary.already_enrolled,
        failed = summary.failed,
        skipped = summary.skipped,
        "import confirmed"
    );

    ok(
        &req.id,
        json!({
            "sessionId": session.id,
            "offeringId": offering_id,
            "summary": summary_json(&summary),
            "results": results.iter().map(result_json).collect::<Vec<_>>(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "import.previewRoster" => Some(handle_preview_roster(state, req)),
        "import.getPreview" => Some(handle_get_preview(state, req)),
        "import.editPreviewRow" => Some(handle_edit_preview_row(state, req)),
        "import.deletePreviewRow" => Some(handle_delete_preview_row(state, req)),
        "import.confirm" => Some(handle_confirm(state, req)),
        _ => None,
    }
}
