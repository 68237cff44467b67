use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{csv_quote, get_required_str, write_text_file};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

#[derive(Debug, Clone)]
struct RosterEntry {
    student_code: String,
    email: String,
    last_name: String,
    first_name: String,
    enrolled_at: String,
}

fn roster(conn: &rusqlite::Connection, offering_id: &str) -> rusqlite::Result<Vec<RosterEntry>> {
    // Identity data is joined in for display; the enrollment fact itself only
    // carries the student code.
    let mut stmt = conn.prepare(
        "SELECT e.student_code,
                COALESCE(s.email, ''),
                COALESCE(s.last_name, ''),
                COALESCE(s.first_name, ''),
                e.enrolled_at
         FROM enrollments e
         LEFT JOIN students s ON s.student_code = e.student_code
         WHERE e.offering_id = ?
         ORDER BY COALESCE(s.last_name, ''), COALESCE(s.first_name, ''), e.student_code",
    )?;
    let rows = stmt
        .query_map([offering_id], |r| {
            Ok(RosterEntry {
                student_code: r.get(0)?,
                email: r.get(1)?,
                last_name: r.get(2)?,
                first_name: r.get(3)?,
                enrolled_at: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn handle_enrollments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let offering_id = match get_required_str(&req.params, "offeringId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match roster(conn, &offering_id) {
        Ok(entries) => {
            let enrollments = entries
                .iter()
                .map(|e| {
                    json!({
                        "studentCode": e.student_code,
                        "email": e.email,
                        "lastName": e.last_name,
                        "firstName": e.first_name,
                        "enrolledAt": e.enrolled_at
                    })
                })
                .collect::<Vec<_>>();
            ok(
                &req.id,
                json!({ "offeringId": offering_id, "enrollments": enrollments }),
            )
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Administrative drop. The import subsystem itself never removes
/// enrollment facts.
fn handle_enrollments_withdraw(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let offering_id = match get_required_str(&req.params, "offeringId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let student_code = match get_required_str(&req.params, "studentCode") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM enrollments WHERE offering_id = ? AND student_code = ?",
            [&offering_id, &student_code],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "enrollment not found", None);
    }

    if let Err(e) = conn.execute(
        "DELETE FROM enrollments WHERE offering_id = ? AND student_code = ?",
        [&offering_id, &student_code],
    ) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_enrollments_export_roster(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let offering_id = match get_required_str(&req.params, "offeringId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let out_path = match get_required_str(&req.params, "outPath") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let entries = match roster(conn, &offering_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut out = String::from("student_code,email,last_name,first_name,enrolled_at\n");
    for e in &entries {
        out.push_str(&format!(
            "{},{},{},{},{}\n",
            csv_quote(&e.student_code),
            csv_quote(&e.email),
            csv_quote(&e.last_name),
            csv_quote(&e.first_name),
            csv_quote(&e.enrolled_at),
        ));
    }

    if let Err(e) = write_text_file(&out_path, &out) {
        return e.response(&req.id);
    }

    ok(
        &req.id,
        json!({
            "offeringId": offering_id,
            "path": out_path,
            "rowsExported": entries.len()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "enrollments.list" => Some(handle_enrollments_list(state, req)),
        "enrollments.withdraw" => Some(handle_enrollments_withdraw(state, req)),
        "enrollments.exportRoster" => Some(handle_enrollments_export_roster(state, req)),
        _ => None,
    }
}
