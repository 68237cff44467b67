use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILENAME: &str = "rosterd.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILENAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS staff(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS offerings(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            term TEXT NOT NULL,
            section TEXT NOT NULL,
            staff_id TEXT,
            UNIQUE(course_id, term, section),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(staff_id) REFERENCES staff(id)
        )",
        [],
    )?;
    // Offerings created before staff assignment landed lack the column.
    ensure_offerings_staff_id(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_offerings_course ON offerings(course_id)",
        [],
    )?;

    // Identity directory: one row per known student, independent of any
    // offering. Both student_code and email are load-bearing uniqueness
    // constraints for the import commit path; do not drop them.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            student_code TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL
        )",
        [],
    )?;

    // Authentication-facing student records owned by the fronting tier.
    // The import commit path only upserts code/profile fields here.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS accounts(
            id TEXT PRIMARY KEY,
            student_code TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            password_hash TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            offering_id TEXT NOT NULL,
            student_code TEXT NOT NULL,
            enrolled_at TEXT NOT NULL,
            UNIQUE(offering_id, student_code),
            FOREIGN KEY(offering_id) REFERENCES offerings(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_offering ON enrollments(offering_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_code)",
        [],
    )?;

    // Staging area for spreadsheet imports. Sessions are ephemeral with an
    // absolute expiry; rows are soft-deleted and only physically removed
    // together with their session.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_sessions(
            id TEXT PRIMARY KEY,
            offering_id TEXT NOT NULL,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            FOREIGN KEY(offering_id) REFERENCES offerings(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_import_sessions_expires ON import_sessions(expires_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_rows(
            session_id TEXT NOT NULL,
            row_index INTEGER NOT NULL,
            student_code TEXT NOT NULL,
            email TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            status TEXT NOT NULL,
            note TEXT,
            deleted INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY(session_id, row_index),
            FOREIGN KEY(session_id) REFERENCES import_sessions(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

fn ensure_offerings_staff_id(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "offerings", "staff_id")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE offerings ADD COLUMN staff_id TEXT", [])?;
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
