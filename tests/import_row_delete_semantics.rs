
use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{error_code, request, request_ok, spawn_sidecar, temp_dir};

fn setup_offering(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> String {
    let workspace = temp_dir("rosterd-import-delete");
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
fn deleted_rows_vanish_from_reads_and_confirm_but_indexes_stay_stable() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let offering_id = setup_offering(&mut stdin, &mut reader);

    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "import.previewRoster",
        json!({
            "offeringId": offering_id,
            "staffId": "staff-1",
            "rows": [
                { "studentCode": "S1", "email": "a@x.com", "firstName": "A", "lastName": "One" },
                { "studentCode": "S2", "email": "b@x.com", "firstName": "B", "lastName": "Two" },
                { "studentCode": "S3", "email": "c@x.com", "firstName": "C", "lastName": "Three" }
            ]
        }),
    );
    let session_id = preview["sessionId"].as_str().expect("sessionId").to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "import.deletePreviewRow",
        json!({ "sessionId": session_id, "rowIndex": 1 }),
    );
    // Deleting again is a no-op, not an error.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "import.deletePreviewRow",
        json!({ "sessionId": session_id, "rowIndex": 1 }),
    );

    let read_back = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "import.getPreview",
        json!({ "sessionId": session_id }),
    );
    let rows = read_back["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 2);
    // No reindexing: surviving rows keep their original positions.
    assert_eq!(rows[0]["rowIndex"].as_i64(), Some(0));
    assert_eq!(rows[1]["rowIndex"].as_i64(), Some(2));

    let confirmed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "import.confirm",
        json!({ "offeringId": offering_id, "sessionId": session_id }),
    );
    assert_eq!(confirmed["summary"]["total"].as_i64(), Some(2));
    assert_eq!(confirmed["summary"]["enrolled"].as_i64(), Some(2));
    let results = confirmed["results"].as_array().expect("results");
    assert!(results.iter().all(|r| r["rowIndex"].as_i64() != Some(1)));

    // The deleted row's student was never enrolled.
    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "enrollments.list",
        json!({ "offeringId": offering_id }),
    );
    let codes = roster["enrollments"]
        .as_array()
        .expect("enrollments")
        .iter()
        .map(|e| e["studentCode"].as_str().unwrap_or("").to_string())
        .collect::<Vec<_>>();
    assert_eq!(codes, vec!["S1".to_string(), "S3".to_string()]);
}

#[test]
fn deleting_an_unknown_row_is_not_found() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let offering_id = setup_offering(&mut stdin, &mut reader);

    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "1",
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

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "import.deletePreviewRow",
        json!({ "sessionId": session_id, "rowIndex": 7 }),
    );
    assert_eq!(error_code(&resp), Some("not_found"));
}
