use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_opt_str, get_required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_offerings_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "offerings": [] }));
    };
    let course_id = match get_required_str(&req.params, "courseId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let mut stmt = match conn.prepare(
        "SELECT
           o.id,
           o.term,
           o.section,
           o.staff_id,
           (SELECT COUNT(*) FROM enrollments e WHERE e.offering_id = o.id) AS enrolled_count
         FROM offerings o
         WHERE o.course_id = ?
         ORDER BY o.term, o.section",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&course_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "term": row.get::<_, String>(1)?,
                "section": row.get::<_, String>(2)?,
                "staffId": row.get::<_, Option<String>>(3)?,
                "enrolledCount": row.get::<_, i64>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(offerings) => ok(&req.id, json!({ "offerings": offerings })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_offerings_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let course_id = match get_required_str(&req.params, "courseId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let term = match get_required_str(&req.params, "term") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let section = match get_required_str(&req.params, "section") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let staff_id = get_opt_str(&req.params, "staffId");

    let course_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [&course_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if course_exists.is_none() {
        return err(&req.id, "not_found", "course not found", None);
    }

    if let Some(staff_id) = &staff_id {
        let staff_exists: Option<i64> = match conn
            .query_row("SELECT 1 FROM staff WHERE id = ?", [staff_id], |r| r.get(0))
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if staff_exists.is_none() {
            return err(&req.id, "not_found", "staff not found", None);
        }
    }

    let offering_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO offerings(id, course_id, term, section, staff_id) VALUES(?, ?, ?, ?, ?)",
        (&offering_id, &course_id, &term, &section, &staff_id),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "offerings" })),
        );
    }

    ok(&req.id, json!({ "offeringId": offering_id }))
}

fn handle_offerings_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let offering_id = match get_required_str(&req.params, "offeringId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM offerings WHERE id = ?", [&offering_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "offering not found", None);
    }

    if let Some(term) = get_opt_str(&req.params, "term") {
        if let Err(e) = conn.execute(
            "UPDATE offerings SET term = ? WHERE id = ?",
            (&term, &offering_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(section) = get_opt_str(&req.params, "section") {
        if let Err(e) = conn.execute(
            "UPDATE offerings SET section = ? WHERE id = ?",
            (&section, &offering_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    // staffId: null detaches, a string reassigns.
    if let Some(v) = req.params.get("staffId") {
        if v.is_null() {
            if let Err(e) = conn.execute(
                "UPDATE offerings SET staff_id = NULL WHERE id = ?",
                [&offering_id],
            ) {
                return err(&req.id, "db_update_failed", e.to_string(), None);
            }
        } else if let Some(staff_id) = v.as_str() {
            let staff_exists: Option<i64> = match conn
                .query_row("SELECT 1 FROM staff WHERE id = ?", [staff_id], |r| r.get(0))
                .optional()
            {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            if staff_exists.is_none() {
                return err(&req.id, "not_found", "staff not found", None);
            }
            if let Err(e) = conn.execute(
                "UPDATE offerings SET staff_id = ? WHERE id = ?",
                (staff_id, &offering_id),
            ) {
                return err(&req.id, "db_update_failed", e.to_string(), None);
            }
        } else {
            return err(&req.id, "bad_params", "staffId must be a string or null", None);
        }
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_offerings_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let offering_id = match get_required_str(&req.params, "offeringId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM offerings WHERE id = ?", [&offering_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "offering not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "DELETE FROM import_rows
         WHERE session_id IN (SELECT id FROM import_sessions WHERE offering_id = ?)",
        [&offering_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "import_rows" })),
        );
    }
    if let Err(e) = tx.execute(
        "DELETE FROM import_sessions WHERE offering_id = ?",
        [&offering_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "import_sessions" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM enrollments WHERE offering_id = ?", [&offering_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "enrollments" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM offerings WHERE id = ?", [&offering_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "offerings" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "offerings.list" => Some(handle_offerings_list(state, req)),
        "offerings.create" => Some(handle_offerings_create(state, req)),
        "offerings.update" => Some(handle_offerings_update(state, req)),
        "offerings.delete" => Some(handle_offerings_delete(state, req)),
        _ => None,
    }
}
