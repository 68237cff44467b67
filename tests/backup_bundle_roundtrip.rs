
use serde_json::json;
use std::fs::File;
use std::io::{Read, Write};
use test_support::{error_code, request, request_ok, spawn_sidecar, temp_dir};

#[test]
fn export_then_import_restores_enrollment_state() {
    let workspace_a = temp_dir("rosterd-backup-src");
    let workspace_b = temp_dir("rosterd-backup-dst");
    let out_dir = temp_dir("rosterd-backup-out");
    let bundle_path = out_dir.join("workspace.zip");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace_a.to_string_lossy() }),
    );
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "code": "CS101", "title": "Intro to Computing" }),
    );
    let offering = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "offerings.create",
        json!({ "courseId": course["courseId"], "term": "2026F", "section": "A" }),
    );
    let offering_id = offering["offeringId"].as_str().expect("offeringId").to_string();

    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "import.previewRoster",
        json!({
            "offeringId": offering_id,
            "staffId": "staff-1",
            "rows": [
                { "studentCode": "S1", "email": "a@x.com", "firstName": "A", "lastName": "One" }
            ]
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "import.confirm",
        json!({ "offeringId": offering_id, "sessionId": preview["sessionId"] }),
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "backup.exportWorkspace",
        json!({ "outPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(exported["bundleFormat"].as_str(), Some("rosterd-workspace-v1"));
    let sha = exported["dbSha256"].as_str().expect("dbSha256").to_string();
    assert_eq!(sha.len(), 64);

    // Restore into a fresh workspace.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "workspace.select",
        json!({ "path": workspace_b.to_string_lossy() }),
    );
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "backup.importWorkspace",
        json!({ "inPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(imported["dbSha256"].as_str(), Some(sha.as_str()));

    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "enrollments.list",
        json!({ "offeringId": offering_id }),
    );
    let entries = roster["enrollments"].as_array().expect("enrollments");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["studentCode"].as_str(), Some("S1"));
}

#[test]
fn tampered_bundles_are_rejected_by_checksum() {
    let workspace = temp_dir("rosterd-backup-tamper");
    let out_dir = temp_dir("rosterd-backup-tamper-out");
    let bundle_path = out_dir.join("workspace.zip");
    let tampered_path = out_dir.join("tampered.zip");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "code": "CS101", "title": "Intro to Computing" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "backup.exportWorkspace",
        json!({ "outPath": bundle_path.to_string_lossy() }),
    );

    // Rebuild the bundle with the original manifest but a corrupted database
    // entry; the manifest checksum no longer matches.
    {
        let mut archive =
            zip::ZipArchive::new(File::open(&bundle_path).expect("open bundle")).expect("zip");
        let mut manifest_text = String::new();
        archive
            .by_name("manifest.json")
            .expect("manifest entry")
            .read_to_string(&mut manifest_text)
            .expect("read manifest");
        let mut db_bytes = Vec::new();
        archive
            .by_name("db/rosterd.sqlite3")
            .expect("db entry")
            .read_to_end(&mut db_bytes)
            .expect("read db entry");
        db_bytes.push(0);

        let mut writer = zip::ZipWriter::new(File::create(&tampered_path).expect("create"));
        let opts = zip::write::FileOptions::default();
        writer.start_file("manifest.json", opts).expect("start manifest");
        writer.write_all(manifest_text.as_bytes()).expect("write manifest");
        writer.start_file("db/rosterd.sqlite3", opts).expect("start db");
        writer.write_all(&db_bytes).expect("write db");
        writer.finish().expect("finish zip");
    }

    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "backup.importWorkspace",
        json!({ "inPath": tampered_path.to_string_lossy() }),
    );
    assert_eq!(error_code(&resp), Some("import_failed"));
    assert!(
        resp.pointer("/error/message")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .contains("checksum"),
        "error mentions the checksum: {}",
        resp
    );

    // The daemon reopened the original database and still serves it.
    let courses = request_ok(&mut stdin, &mut reader, "5", "courses.list", json!({}));
    assert_eq!(courses["courses"].as_array().expect("courses").len(), 1);
}
