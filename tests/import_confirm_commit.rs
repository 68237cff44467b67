
use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{error_code, request, request_ok, spawn_sidecar, temp_dir};

fn setup_offering(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> String {
    let workspace = temp_dir("rosterd-import-confirm");
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
fn confirm_enrolls_new_student_and_consumes_the_session() {
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
    assert_eq!(preview["rows"][0]["status"].as_str(), Some("new"));

    let confirmed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "import.confirm",
        json!({ "offeringId": offering_id, "sessionId": session_id }),
    );
    assert_eq!(confirmed["summary"]["total"].as_i64(), Some(1));
    assert_eq!(confirmed["summary"]["enrolled"].as_i64(), Some(1));
    assert_eq!(confirmed["results"][0]["result"].as_str(), Some("enrolled"));

    // Identity record and enrollment fact now exist.
    let students = request_ok(&mut stdin, &mut reader, "3", "students.list", json!({}));
    let found = students["students"]
        .as_array()
        .expect("students")
        .iter()
        .any(|s| s["studentCode"].as_str() == Some("S1") && s["email"].as_str() == Some("a@x.com"));
    assert!(found, "identity record created by confirm");

    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "enrollments.list",
        json!({ "offeringId": offering_id }),
    );
    assert_eq!(roster["enrollments"].as_array().expect("enrollments").len(), 1);

    // Confirm is single-use: the session id no longer resolves.
    let again = request(
        &mut stdin,
        &mut reader,
        "5",
        "import.confirm",
        json!({ "offeringId": offering_id, "sessionId": session_id }),
    );
    assert_eq!(error_code(&again), Some("not_found"));

    let read = request(
        &mut stdin,
        &mut reader,
        "6",
        "import.getPreview",
        json!({ "sessionId": session_id }),
    );
    assert_eq!(error_code(&read), Some("not_found"));
}

#[test]
fn two_sessions_for_the_same_student_do_not_duplicate_the_fact() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let offering_id = setup_offering(&mut stdin, &mut reader);

    let rows = json!([
        { "studentCode": "S1", "email": "a@x.com", "firstName": "A", "lastName": "One" }
    ]);

    // Both previews are created before either commit, so both classify NEW.
    let first = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "import.previewRoster",
        json!({ "offeringId": offering_id, "staffId": "staff-1", "rows": rows }),
    );
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "import.previewRoster",
        json!({ "offeringId": offering_id, "staffId": "staff-2", "rows": rows }),
    );
    assert_eq!(second["rows"][0]["status"].as_str(), Some("new"));

    let confirmed_first = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "import.confirm",
        json!({ "offeringId": offering_id, "sessionId": first["sessionId"] }),
    );
    assert_eq!(confirmed_first["results"][0]["result"].as_str(), Some("enrolled"));

    // The second session's stale NEW classification is re-derived at commit
    // time; the durable-store check reports already_enrolled instead of
    // tripping the uniqueness constraint.
    let confirmed_second = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "import.confirm",
        json!({ "offeringId": offering_id, "sessionId": second["sessionId"] }),
    );
    assert_eq!(
        confirmed_second["results"][0]["result"].as_str(),
        Some("already_enrolled")
    );
    assert_eq!(confirmed_second["summary"]["failed"].as_i64(), Some(0));

    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "enrollments.list",
        json!({ "offeringId": offering_id }),
    );
    assert_eq!(roster["enrollments"].as_array().expect("enrollments").len(), 1);
}

#[test]
fn mixed_batch_isolates_skips_failures_and_successes() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let offering_id = setup_offering(&mut stdin, &mut reader);

    // S1 exists with a different email, so a fresh-email row claiming S1
    // violates the student_code uniqueness constraint at commit time.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.create",
        json!({ "studentCode": "S1", "email": "taken@x.com", "lastName": "One", "firstName": "A" }),
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
                { "studentCode": "", "email": "x@x.com", "firstName": "X", "lastName": "Ex" },
                { "studentCode": "S1", "email": "other@x.com", "firstName": "A", "lastName": "One" },
                { "studentCode": "S2", "email": "b@x.com", "firstName": "B", "lastName": "Two" }
            ]
        }),
    );
    let session_id = preview["sessionId"].as_str().expect("sessionId").to_string();

    let confirmed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "import.confirm",
        json!({ "offeringId": offering_id, "sessionId": session_id }),
    );

    let results = confirmed["results"].as_array().expect("results");
    assert_eq!(results[0]["result"].as_str(), Some("skipped"));
    assert_eq!(results[0]["note"].as_str(), Some("missing required fields"));
    assert_eq!(results[1]["result"].as_str(), Some("failed"));
    assert!(results[1]["note"].as_str().is_some(), "failure carries the error");
    assert_eq!(results[2]["result"].as_str(), Some("enrolled"));

    assert_eq!(confirmed["summary"]["total"].as_i64(), Some(3));
    assert_eq!(confirmed["summary"]["skipped"].as_i64(), Some(1));
    assert_eq!(confirmed["summary"]["failed"].as_i64(), Some(1));
    assert_eq!(confirmed["summary"]["enrolled"].as_i64(), Some(1));

    // Only the healthy sibling landed.
    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "enrollments.list",
        json!({ "offeringId": offering_id }),
    );
    let codes = roster["enrollments"]
        .as_array()
        .expect("enrollments")
        .iter()
        .map(|e| e["studentCode"].as_str().unwrap_or("").to_string())
        .collect::<Vec<_>>();
    assert_eq!(codes, vec!["S2".to_string()]);
}

#[test]
fn intra_batch_duplicates_resolve_at_commit_not_preview() {
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
                { "studentCode": "S1", "email": "a@x.com", "firstName": "A", "lastName": "One" }
            ]
        }),
    );
    // Preview validates rows against durable state only, so both look NEW.
    assert_eq!(preview["counts"]["new"].as_i64(), Some(2));

    let confirmed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "import.confirm",
        json!({ "offeringId": offering_id, "sessionId": preview["sessionId"] }),
    );
    assert_eq!(confirmed["results"][0]["result"].as_str(), Some("enrolled"));
    assert_eq!(
        confirmed["results"][1]["result"].as_str(),
        Some("already_enrolled")
    );
}
