use rusqlite::Connection;
use serde_json::Value;

use crate::classify::RowFields;
use crate::db;
use crate::ipc::error::HandlerErr;

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_opt_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn get_required_i64(params: &Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

/// Import rows arrive pre-parsed from the upload tier; fields are trimmed
/// here and absent columns are tolerated as empty strings, which the
/// validator then classifies as missing.
pub fn row_fields_from_value(value: &Value) -> Result<RowFields, HandlerErr> {
    if !value.is_object() {
        return Err(HandlerErr::new("bad_params", "rows entries must be objects"));
    }
    let field = |key: &str| -> Result<String, HandlerErr> {
        match value.get(key) {
            None | Some(Value::Null) => Ok(String::new()),
            Some(Value::String(s)) => Ok(s.trim().to_string()),
            Some(_) => Err(HandlerErr::new(
                "bad_params",
                format!("rows[].{} must be a string", key),
            )),
        }
    };
    Ok(RowFields {
        student_code: field("studentCode")?,
        email: field("email")?,
        first_name: field("firstName")?,
        last_name: field("lastName")?,
    })
}

pub fn get_setup_i64(conn: &Connection, section_key: &str, field: &str, default: i64) -> i64 {
    db::settings_get_json(conn, section_key)
        .ok()
        .flatten()
        .and_then(|section| section.get(field).and_then(|v| v.as_i64()))
        .unwrap_or(default)
}

pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub fn write_text_file(path: &str, contents: &str) -> Result<(), HandlerErr> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                HandlerErr::new("write_failed", format!("failed to create directory: {}", e))
            })?;
        }
    }
    std::fs::write(path, contents)
        .map_err(|e| HandlerErr::new("write_failed", format!("failed to write {}: {}", path, e)))
}
