use rusqlite::{Connection, OptionalExtension};

/// Candidate import row after whitespace trimming. Absent spreadsheet
/// columns arrive as empty strings.
#[derive(Debug, Clone, PartialEq)]
pub struct RowFields {
    pub student_code: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    New,
    ExistsNotEnrolled,
    AlreadyEnrolled,
    DuplicateIdentity,
    Missing,
}

impl RowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowStatus::New => "new",
            RowStatus::ExistsNotEnrolled => "exists_not_enrolled",
            RowStatus::AlreadyEnrolled => "already_enrolled",
            RowStatus::DuplicateIdentity => "duplicate_identity",
            RowStatus::Missing => "missing",
        }
    }

    pub fn from_str(s: &str) -> Option<RowStatus> {
        match s {
            "new" => Some(RowStatus::New),
            "exists_not_enrolled" => Some(RowStatus::ExistsNotEnrolled),
            "already_enrolled" => Some(RowStatus::AlreadyEnrolled),
            "duplicate_identity" => Some(RowStatus::DuplicateIdentity),
            "missing" => Some(RowStatus::Missing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub status: RowStatus,
    pub note: Option<String>,
}

impl Classified {
    fn status(status: RowStatus) -> Classified {
        Classified { status, note: None }
    }

    fn with_note(status: RowStatus, note: String) -> Classified {
        Classified {
            status,
            note: Some(note),
        }
    }
}

#[derive(Debug, Clone)]
struct IdentityRecord {
    id: String,
    student_code: String,
    email: String,
    last_name: String,
    first_name: String,
}

/// Classify one candidate row against current durable state. Read-only and
/// deterministic: the result depends only on the four fields, the offering
/// and the store contents at call time. Rule order matters; the first
/// matching rule wins.
pub fn classify_row(
    conn: &Connection,
    offering_id: &str,
    fields: &RowFields,
) -> anyhow::Result<Classified> {
    if fields.student_code.is_empty()
        || fields.email.is_empty()
        || fields.first_name.is_empty()
        || fields.last_name.is_empty()
    {
        return Ok(Classified::with_note(
            RowStatus::Missing,
            "required fields missing".to_string(),
        ));
    }

    // Duplicate submission beats any identity conflict for the same row.
    if enrollment_exists(conn, offering_id, &fields.student_code)? {
        return Ok(Classified::status(RowStatus::AlreadyEnrolled));
    }

    let by_code = identity_by_code(conn, &fields.student_code)?;
    let by_email = identity_by_email(conn, &fields.email)?;

    match (by_code, by_email) {
        (Some(a), Some(b)) if a.id != b.id => {
            return Ok(Classified::with_note(
                RowStatus::DuplicateIdentity,
                format!(
                    "student code belongs to {}, {} <{}>; email belongs to {}, {} (code {})",
                    a.last_name, a.first_name, a.email, b.last_name, b.first_name, b.student_code
                ),
            ));
        }
        (Some(a), Some(_)) => {
            // Same record via both keys. Name drift is advisory only.
            if !same_name(&a, fields) {
                return Ok(Classified::with_note(
                    RowStatus::ExistsNotEnrolled,
                    format!("registered as {}, {}", a.last_name, a.first_name),
                ));
            }
            return Ok(Classified::status(RowStatus::ExistsNotEnrolled));
        }
        (Some(a), None) if !eq_email(&a.email, &fields.email) => {
            return Ok(Classified::with_note(
                RowStatus::DuplicateIdentity,
                format!("student code {} is registered with email {}", a.student_code, a.email),
            ));
        }
        (None, Some(b)) if b.student_code != fields.student_code => {
            return Ok(Classified::with_note(
                RowStatus::DuplicateIdentity,
                format!("email {} is registered with code {}", b.email, b.student_code),
            ));
        }
        _ => {}
    }

    // No identity record either way; a pre-existing login account can still
    // claim the code.
    if let Some(account_email) = account_email_by_code(conn, &fields.student_code)? {
        if eq_email(&account_email, &fields.email) {
            return Ok(Classified::status(RowStatus::ExistsNotEnrolled));
        }
        return Ok(Classified::with_note(
            RowStatus::DuplicateIdentity,
            format!(
                "student code {} already has an account with email {}",
                fields.student_code, account_email
            ),
        ));
    }

    Ok(Classified::status(RowStatus::New))
}

fn same_name(stored: &IdentityRecord, fields: &RowFields) -> bool {
    stored.last_name == fields.last_name && stored.first_name == fields.first_name
}

fn eq_email(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

pub fn enrollment_exists(
    conn: &Connection,
    offering_id: &str,
    student_code: &str,
) -> anyhow::Result<bool> {
    let hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM enrollments WHERE offering_id = ? AND student_code = ?",
            [offering_id, student_code],
            |r| r.get(0),
        )
        .optional()?;
    Ok(hit.is_some())
}

fn identity_by_code(conn: &Connection, student_code: &str) -> anyhow::Result<Option<IdentityRecord>> {
    query_identity(
        conn,
        "SELECT id, student_code, email, last_name, first_name
         FROM students WHERE student_code = ?",
        student_code,
    )
}

fn identity_by_email(conn: &Connection, email: &str) -> anyhow::Result<Option<IdentityRecord>> {
    query_identity(
        conn,
        "SELECT id, student_code, email, last_name, first_name
         FROM students WHERE email = ? COLLATE NOCASE",
        email,
    )
}

fn query_identity(
    conn: &Connection,
    sql: &str,
    key: &str,
) -> anyhow::Result<Option<IdentityRecord>> {
    let rec = conn
        .query_row(sql, [key], |r| {
            Ok(IdentityRecord {
                id: r.get(0)?,
                student_code: r.get(1)?,
                email: r.get(2)?,
                last_name: r.get(3)?,
                first_name: r.get(4)?,
            })
        })
        .optional()?;
    Ok(rec)
}

fn account_email_by_code(conn: &Connection, student_code: &str) -> anyhow::Result<Option<String>> {
    let email: Option<String> = conn
        .query_row(
            "SELECT email FROM accounts WHERE student_code = ?",
            [student_code],
            |r| r.get(0),
        )
        .optional()?;
    Ok(email)
}
