use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::classify::{self, RowFields, RowStatus};
use crate::staging::{self, SessionRecord, StagedRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    Enrolled,
    AlreadyEnrolled,
    Skipped,
    Failed,
}

impl RowOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowOutcome::Enrolled => "enrolled",
            RowOutcome::AlreadyEnrolled => "already_enrolled",
            RowOutcome::Skipped => "skipped",
            RowOutcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RowResult {
    pub row_index: i64,
    pub student_code: String,
    pub outcome: RowOutcome,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub total: usize,
    pub enrolled: usize,
    pub already_enrolled: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Turn a session's surviving rows into durable identity/account/enrollment
/// state, one row-scoped transaction at a time, then delete the session.
///
/// A failing row rolls back its own transaction and never aborts siblings;
/// the session is consumed regardless of how many rows failed, so retrying
/// requires a fresh preview.
pub fn confirm_session(
    conn: &Connection,
    session: &SessionRecord,
    now: DateTime<Utc>,
) -> anyhow::Result<(Vec<RowResult>, CommitSummary)> {
    let rows = staging::session_rows(conn, &session.id, false)?;

    let mut results = Vec::with_capacity(rows.len());
    let mut summary = CommitSummary {
        total: rows.len(),
        ..CommitSummary::default()
    };

    for row in &rows {
        let result = process_row(conn, &session.offering_id, row, now);
        match result.outcome {
            RowOutcome::Enrolled => summary.enrolled += 1,
            RowOutcome::AlreadyEnrolled => summary.already_enrolled += 1,
            RowOutcome::Skipped => summary.skipped += 1,
            RowOutcome::Failed => {
                summary.failed += 1;
                tracing::warn!(
                    session_id = %session.id,
                    row_index = row.row_index,
                    note = result.note.as_deref().unwrap_or(""),
                    "import row failed"
                );
            }
        }
        results.push(result);
    }

    staging::delete_session(conn, &session.id)?;

    Ok((results, summary))
}

fn process_row(
    conn: &Connection,
    offering_id: &str,
    row: &StagedRow,
    now: DateTime<Utc>,
) -> RowResult {
    // Terminal classifications are honored as stored; everything else is
    // attempted optimistically and re-checked against durable state inside
    // the transaction.
    match row.status {
        RowStatus::Missing => {
            return RowResult {
                row_index: row.row_index,
                student_code: row.fields.student_code.clone(),
                outcome: RowOutcome::Skipped,
                note: Some("missing required fields".to_string()),
            }
        }
        RowStatus::AlreadyEnrolled => {
            return RowResult {
                row_index: row.row_index,
                student_code: row.fields.student_code.clone(),
                outcome: RowOutcome::AlreadyEnrolled,
                note: None,
            }
        }
        _ => {}
    }

    match commit_row(conn, offering_id, &row.fields, now) {
        Ok(outcome) => RowResult {
            row_index: row.row_index,
            student_code: row.fields.student_code.clone(),
            outcome,
            note: None,
        },
        Err(e) => RowResult {
            row_index: row.row_index,
            student_code: row.fields.student_code.clone(),
            outcome: RowOutcome::Failed,
            note: Some(e.to_string()),
        },
    }
}

fn commit_row(
    conn: &Connection,
    offering_id: &str,
    fields: &RowFields,
    now: DateTime<Utc>,
) -> anyhow::Result<RowOutcome> {
    let tx = conn.unchecked_transaction()?;

    let outcome = (|| -> anyhow::Result<RowOutcome> {
        upsert_identity(&tx, fields)?;
        upsert_account(&tx, fields)?;

        // Idempotency guard: the stored classification may be stale, and an
        // earlier row of this same batch may have enrolled the student
        // already. The UNIQUE(offering_id, student_code) constraint remains
        // the actual correctness backstop under concurrent commits.
        if classify::enrollment_exists(&tx, offering_id, &fields.student_code)? {
            return Ok(RowOutcome::AlreadyEnrolled);
        }
        tx.execute(
            "INSERT INTO enrollments(id, offering_id, student_code, enrolled_at)
             VALUES(?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                offering_id,
                &fields.student_code,
                now.to_rfc3339(),
            ),
        )?;
        Ok(RowOutcome::Enrolled)
    })();

    match outcome {
        Ok(v) => {
            tx.commit()?;
            Ok(v)
        }
        Err(e) => {
            let _ = tx.rollback();
            Err(e)
        }
    }
}

/// Identity upsert keyed by email. The confirm path always overwrites
/// code/name on a match, unlike operator-driven directory edits.
fn upsert_identity(conn: &Connection, fields: &RowFields) -> anyhow::Result<()> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM students WHERE email = ? COLLATE NOCASE",
            [&fields.email],
            |r| r.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE students SET student_code = ?, last_name = ?, first_name = ? WHERE id = ?",
                (&fields.student_code, &fields.last_name, &fields.first_name, &id),
            )?;
        }
        None => {
            conn.execute(
                "INSERT INTO students(id, student_code, email, last_name, first_name)
                 VALUES(?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    &fields.student_code,
                    &fields.email,
                    &fields.last_name,
                    &fields.first_name,
                ),
            )?;
        }
    }
    Ok(())
}

/// Account upsert keyed by student code. New accounts get an unusable
/// placeholder credential; the fronting tier owns real password setup.
fn upsert_account(conn: &Connection, fields: &RowFields) -> anyhow::Result<()> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM accounts WHERE student_code = ?",
            [&fields.student_code],
            |r| r.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE accounts SET email = ?, last_name = ?, first_name = ? WHERE id = ?",
                (&fields.email, &fields.last_name, &fields.first_name, &id),
            )?;
        }
        None => {
            conn.execute(
                "INSERT INTO accounts(id, student_code, email, last_name, first_name, password_hash)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    &fields.student_code,
                    &fields.email,
                    &fields.last_name,
                    &fields.first_name,
                    placeholder_password_hash(),
                ),
            )?;
        }
    }
    Ok(())
}

fn placeholder_password_hash() -> String {
    let mut hasher = Sha256::new();
    hasher.update(Uuid::new_v4().as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2 + 1);
    out.push('!');
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
