use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_opt_str, get_required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn student_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "studentCode": row.get::<_, String>(1)?,
        "email": row.get::<_, String>(2)?,
        "lastName": row.get::<_, String>(3)?,
        "firstName": row.get::<_, String>(4)?
    }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };

    let rows = match get_opt_str(&req.params, "query") {
        Some(query) => {
            let like = format!("%{}%", query);
            conn.prepare(
                "SELECT id, student_code, email, last_name, first_name
                 FROM students
                 WHERE student_code LIKE ?1 OR email LIKE ?1 OR last_name LIKE ?1 OR first_name LIKE ?1
                 ORDER BY last_name, first_name",
            )
            .and_then(|mut stmt| {
                stmt.query_map([&like], student_json)
                    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            })
        }
        None => conn
            .prepare(
                "SELECT id, student_code, email, last_name, first_name
                 FROM students
                 ORDER BY last_name, first_name",
            )
            .and_then(|mut stmt| {
                stmt.query_map([], student_json)
                    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            }),
    };

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_code = match get_required_str(&req.params, "studentCode") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let email = match get_required_str(&req.params, "email") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let last_name = match get_required_str(&req.params, "lastName") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let first_name = match get_required_str(&req.params, "firstName") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, student_code, email, last_name, first_name)
         VALUES(?, ?, ?, ?, ?)",
        (&student_id, &student_code, &email, &last_name, &first_name),
    ) {
        // UNIQUE(student_code)/UNIQUE(email) violations land here.
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match get_required_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let mut set_parts: Vec<&'static str> = Vec::new();
    let mut bind_values: Vec<String> = Vec::new();
    for (key, clause) in [
        ("studentCode", "student_code = ?"),
        ("email", "email = ?"),
        ("lastName", "last_name = ?"),
        ("firstName", "first_name = ?"),
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
            let s = s.trim().to_string();
            if s.is_empty() {
                return err(
                    &req.id,
                    "bad_params",
                    format!("{} must not be empty", key),
                    None,
                );
            }
            set_parts.push(clause);
            bind_values.push(s);
        }
    }
    if set_parts.is_empty() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }

    let sql = format!(
        "UPDATE students SET {} WHERE id = ?",
        set_parts.join(", ")
    );
    bind_values.push(student_id.clone());
    if let Err(e) = conn.execute(&sql, rusqlite::params_from_iter(bind_values.iter())) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    let updated = conn
        .query_row(
            "SELECT id, student_code, email, last_name, first_name FROM students WHERE id = ?",
            [&student_id],
            student_json,
        )
        .optional();
    match updated {
        Ok(Some(student)) => ok(&req.id, json!({ "student": student })),
        Ok(None) => err(&req.id, "not_found", "student not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        _ => None,
    }
}
