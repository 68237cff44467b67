use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::classify::{self, Classified, RowFields, RowStatus};

/// One import attempt: a time-boxed working set of candidate rows awaiting
/// operator review. Sessions are created by preview, consumed by confirm,
/// and refuse mutation once past their absolute expiry.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: String,
    pub offering_id: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone)]
pub struct StagedRow {
    pub row_index: i64,
    pub fields: RowFields,
    pub status: RowStatus,
    pub note: Option<String>,
    pub deleted: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub new: usize,
    pub exists_not_enrolled: usize,
    pub already_enrolled: usize,
    pub duplicate_identity: usize,
    pub missing: usize,
}

impl StatusCounts {
    pub fn tally<'a, I: IntoIterator<Item = &'a StagedRow>>(rows: I) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for row in rows {
            match row.status {
                RowStatus::New => counts.new += 1,
                RowStatus::ExistsNotEnrolled => counts.exists_not_enrolled += 1,
                RowStatus::AlreadyEnrolled => counts.already_enrolled += 1,
                RowStatus::DuplicateIdentity => counts.duplicate_identity += 1,
                RowStatus::Missing => counts.missing += 1,
            }
        }
        counts
    }
}

/// Classify and stage a batch of raw rows. Each row is validated
/// independently against durable state only; two rows of the same batch are
/// not cross-checked against each other (intra-batch duplicates resolve at
/// confirm time via the enrollment idempotency check).
pub fn create_session(
    conn: &Connection,
    offering_id: &str,
    created_by: &str,
    raw_rows: &[RowFields],
    ttl_minutes: i64,
    now: DateTime<Utc>,
) -> anyhow::Result<(SessionRecord, Vec<StagedRow>)> {
    let session = SessionRecord {
        id: Uuid::new_v4().to_string(),
        offering_id: offering_id.to_string(),
        created_by: created_by.to_string(),
        created_at: now,
        expires_at: now + Duration::minutes(ttl_minutes),
    };

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO import_sessions(id, offering_id, created_by, created_at, expires_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            &session.id,
            &session.offering_id,
            &session.created_by,
            session.created_at.to_rfc3339(),
            session.expires_at.to_rfc3339(),
        ),
    )?;

    let mut staged = Vec::with_capacity(raw_rows.len());
    for (idx, fields) in raw_rows.iter().enumerate() {
        let classified = classify::classify_row(&tx, offering_id, fields)?;
        insert_row(&tx, &session.id, idx as i64, fields, &classified)?;
        staged.push(StagedRow {
            row_index: idx as i64,
            fields: fields.clone(),
            status: classified.status,
            note: classified.note,
            deleted: false,
        });
    }
    tx.commit()?;

    Ok((session, staged))
}

fn insert_row(
    conn: &Connection,
    session_id: &str,
    row_index: i64,
    fields: &RowFields,
    classified: &Classified,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO import_rows(
            session_id, row_index, student_code, email, first_name, last_name,
            status, note, deleted
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, 0)",
        (
            session_id,
            row_index,
            &fields.student_code,
            &fields.email,
            &fields.first_name,
            &fields.last_name,
            classified.status.as_str(),
            &classified.note,
        ),
    )?;
    Ok(())
}

pub fn load_session(conn: &Connection, session_id: &str) -> anyhow::Result<Option<SessionRecord>> {
    let raw = conn
        .query_row(
            "SELECT id, offering_id, created_by, created_at, expires_at
             FROM import_sessions WHERE id = ?",
            [session_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;

    let Some((id, offering_id, created_by, created_at, expires_at)) = raw else {
        return Ok(None);
    };
    Ok(Some(SessionRecord {
        id,
        offering_id,
        created_by,
        created_at: parse_timestamp(&created_at)?,
        expires_at: parse_timestamp(&expires_at)?,
    }))
}

fn parse_timestamp(text: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(text)?.with_timezone(&Utc))
}

/// Rows in ascending index order. Soft-deleted rows are excluded unless
/// explicitly requested.
pub fn session_rows(
    conn: &Connection,
    session_id: &str,
    include_deleted: bool,
) -> anyhow::Result<Vec<StagedRow>> {
    let sql = if include_deleted {
        "SELECT row_index, student_code, email, first_name, last_name, status, note, deleted
         FROM import_rows WHERE session_id = ? ORDER BY row_index"
    } else {
        "SELECT row_index, student_code, email, first_name, last_name, status, note, deleted
         FROM import_rows WHERE session_id = ? AND deleted = 0 ORDER BY row_index"
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([session_id], row_from_sql)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_row(
    conn: &Connection,
    session_id: &str,
    row_index: i64,
) -> anyhow::Result<Option<StagedRow>> {
    let row = conn
        .query_row(
            "SELECT row_index, student_code, email, first_name, last_name, status, note, deleted
             FROM import_rows WHERE session_id = ? AND row_index = ?",
            (session_id, row_index),
            row_from_sql,
        )
        .optional()?;
    Ok(row)
}

fn row_from_sql(r: &rusqlite::Row<'_>) -> rusqlite::Result<StagedRow> {
    let status_text: String = r.get(5)?;
    Ok(StagedRow {
        row_index: r.get(0)?,
        fields: RowFields {
            student_code: r.get(1)?,
            email: r.get(2)?,
            first_name: r.get(3)?,
            last_name: r.get(4)?,
        },
        // Unknown stored statuses should never happen; surface as missing
        // rather than panicking on hand-edited databases.
        status: RowStatus::from_str(&status_text).unwrap_or(RowStatus::Missing),
        note: r.get(6)?,
        deleted: r.get::<_, i64>(7)? != 0,
    })
}

pub fn update_row(
    conn: &Connection,
    session_id: &str,
    row_index: i64,
    fields: &RowFields,
    classified: &Classified,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE import_rows
         SET student_code = ?, email = ?, first_name = ?, last_name = ?, status = ?, note = ?
         WHERE session_id = ? AND row_index = ?",
        (
            &fields.student_code,
            &fields.email,
            &fields.first_name,
            &fields.last_name,
            classified.status.as_str(),
            &classified.note,
            session_id,
            row_index,
        ),
    )?;
    Ok(())
}

/// Logical delete only; the index stays stable and the row is removed for
/// real when the whole session goes. Deleting twice is a no-op.
pub fn soft_delete_row(conn: &Connection, session_id: &str, row_index: i64) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE import_rows SET deleted = 1 WHERE session_id = ? AND row_index = ?",
        (session_id, row_index),
    )?;
    Ok(())
}

pub fn delete_session(conn: &Connection, session_id: &str) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM import_rows WHERE session_id = ?", [session_id])?;
    tx.execute("DELETE FROM import_sessions WHERE id = ?", [session_id])?;
    tx.commit()?;
    Ok(())
}

/// Lazy cleanup for sessions that were never confirmed. Expiry is enforced
/// on every access, so this only reclaims storage.
pub fn purge_expired(conn: &Connection, now: DateTime<Utc>) -> anyhow::Result<usize> {
    let mut stmt = conn.prepare("SELECT id, expires_at FROM import_sessions")?;
    let sessions = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut purged = 0usize;
    for (id, expires_at) in sessions {
        if parse_timestamp(&expires_at)? <= now {
            delete_session(conn, &id)?;
            purged += 1;
        }
    }
    Ok(purged)
}
