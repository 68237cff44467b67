
use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{error_code, request, request_ok, spawn_sidecar, temp_dir};

fn setup_offering(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> String {
    let workspace = temp_dir("rosterd-import-expiry");
    let _ = request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let course = request_ok(
        stdin,
        reader,
        "s2",
        "courses.create",
        json!({ "code": "CS101", "title": "Intro to Computing" }),
    );
    let offering = request_ok(
        stdin,
        reader,
        "s3",
        "offerings.create",
        json!({ "courseId": course["courseId"], "term": "2026F", "section": "A" }),
    );
    offering["offeringId"].as_str().expect("offeringId").to_string()
}

#[test]
fn ttl_defaults_to_an_hour_and_is_configurable() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = setup_offering(&mut stdin, &mut reader);

    let defaults = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "setup.importDefaults.get",
        json!({}),
    );
    assert_eq!(
        defaults["importDefaults"]["sessionTtlMinutes"].as_i64(),
        Some(60)
    );

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.importDefaults.update",
        json!({ "patch": { "sessionTtlMinutes": 15 } }),
    );
    assert_eq!(
        updated["importDefaults"]["sessionTtlMinutes"].as_i64(),
        Some(15)
    );
}

#[test]
fn expired_sessions_reject_mutation_but_reads_surface_expiry() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let offering_id = setup_offering(&mut stdin, &mut reader);

    // TTL 0 makes every new session expire at creation time.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "setup.importDefaults.update",
        json!({ "patch": { "sessionTtlMinutes": 0 } }),
    );

    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "import.previewRoster",
        json!({
            "offeringId": offering_id,
            "staffId": "staff-1",
            "rows": [
                { "studentCode": "S1", "email": "a@x.com", "firstName": "A", "lastName": "One" }
            ]
        }),
    );
    let session_id = preview["sessionId"].as_str().expect("sessionId").to_string();

    let read = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "import.getPreview",
        json!({ "sessionId": session_id }),
    );
    assert_eq!(read["expired"], json!(true));
    assert_eq!(read["rows"].as_array().expect("rows").len(), 1);

    let edit = request(
        &mut stdin,
        &mut reader,
        "4",
        "import.editPreviewRow",
        json!({
            "offeringId": offering_id,
            "sessionId": session_id,
            "rowIndex": 0,
            "patch": { "email": "b@x.com" }
        }),
    );
    assert_eq!(error_code(&edit), Some("session_expired"));

    let delete = request(
        &mut stdin,
        &mut reader,
        "5",
        "import.deletePreviewRow",
        json!({ "sessionId": session_id, "rowIndex": 0 }),
    );
    assert_eq!(error_code(&delete), Some("session_expired"));

    let confirm = request(
        &mut stdin,
        &mut reader,
        "6",
        "import.confirm",
        json!({ "offeringId": offering_id, "sessionId": session_id }),
    );
    assert_eq!(error_code(&confirm), Some("session_expired"));

    // Nothing was committed for the expired session.
    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "enrollments.list",
        json!({ "offeringId": offering_id }),
    );
    assert!(roster["enrollments"].as_array().expect("enrollments").is_empty());
}

#[test]
fn expired_sessions_are_purged_by_the_next_preview() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let offering_id = setup_offering(&mut stdin, &mut reader);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "setup.importDefaults.update",
        json!({ "patch": { "sessionTtlMinutes": 0 } }),
    );
    let dead = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "import.previewRoster",
        json!({
            "offeringId": offering_id,
            "staffId": "staff-1",
            "rows": [
                { "studentCode": "S1", "email": "a@x.com", "firstName": "A", "lastName": "One" }
            ]
        }),
    );
    let dead_id = dead["sessionId"].as_str().expect("sessionId").to_string();

    // Restore a sane TTL and create another preview, which sweeps the
    // expired one away entirely.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.importDefaults.update",
        json!({ "patch": { "sessionTtlMinutes": 60 } }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "import.previewRoster",
        json!({
            "offeringId": offering_id,
            "staffId": "staff-1",
            "rows": [
                { "studentCode": "S2", "email": "b@x.com", "firstName": "B", "lastName": "Two" }
            ]
        }),
    );

    let read = request(
        &mut stdin,
        &mut reader,
        "5",
        "import.getPreview",
        json!({ "sessionId": dead_id }),
    );
    assert_eq!(error_code(&read), Some("not_found"));
}
