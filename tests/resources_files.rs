mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, sign_in, sign_up, spawn_sidecar, temp_dir};

#[test]
fn editing_a_resource_without_a_new_file_keeps_the_old_reference() {
    let workspace = temp_dir("classroomd-resources");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student = sign_up(&mut stdin, &mut reader, "2", "ana@school.test", "student");
    let _ = sign_up(&mut stdin, &mut reader, "3", "teach@school.test", "teacher");
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classes.create",
        json!({ "fields": { "name": "Art", "subject": "Arts" }, "students": [student] }),
    );
    let class_id = created["class"]["id"].as_str().expect("class id").to_string();

    let picture = workspace.join("palette.png");
    std::fs::write(&picture, [0x89u8, b'P', b'N', b'G', 1, 2, 3]).expect("write png");
    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "resources.save",
        json!({
            "classId": class_id,
            "fields": { "title": "Palette" },
            "file": { "localPath": picture.to_string_lossy(), "name": "palette.png", "mimeType": "image/png" }
        }),
    );
    let resource = &saved["resource"];
    let resource_id = resource["id"].as_str().expect("resource id").to_string();
    assert_eq!(resource["data"]["type"], json!("Image"));
    let file_ref = resource["data"]["file"].clone();
    assert_eq!(file_ref["size"], json!(7));
    let blob_path = file_ref["path"].as_str().expect("blob path");
    assert!(blob_path.starts_with(&format!("resources/{}/", class_id)));
    assert!(workspace.join("blobs").join(blob_path).is_file());

    let edited = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "resources.save",
        json!({
            "classId": class_id,
            "resourceId": resource_id,
            "fields": { "title": "Palette (updated)", "content": "primary colours" }
        }),
    );
    assert_eq!(edited["resource"]["data"]["title"], json!("Palette (updated)"));
    assert_eq!(edited["resource"]["data"]["file"], file_ref);
    assert_eq!(edited["resource"]["data"]["type"], json!("Image"));

    let note = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "resources.save",
        json!({ "classId": class_id, "fields": { "title": "Reading", "content": "ch. 2" } }),
    );
    assert_eq!(note["resource"]["data"]["type"], json!("Note"));

    // Files over the configured limit are rejected before anything is stored.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "setup.update",
        json!({ "section": "uploads", "patch": { "maxBytes": 1024 } }),
    );
    let big = workspace.join("big.pdf");
    std::fs::write(&big, vec![b'x'; 4096]).expect("write big file");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "resources.save",
        json!({
            "classId": class_id,
            "fields": { "title": "Too big" },
            "file": { "localPath": big.to_string_lossy(), "mimeType": "application/pdf" }
        }),
    );
    assert_eq!(code, "validation_failed");

    let _ = sign_in(&mut stdin, &mut reader, "10", "ana@school.test");
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "resources.list",
        json!({ "classId": class_id }),
    );
    assert_eq!(listed["resources"].as_array().map(|a| a.len()), Some(2));
    let code = request_err(
        &mut stdin,
        &mut reader,
        "12",
        "resources.save",
        json!({ "classId": class_id, "fields": { "title": "Sneaky" } }),
    );
    assert_eq!(code, "unauthorized");
    let note_id = note["resource"]["id"].as_str().expect("note id").to_string();
    let code = request_err(
        &mut stdin,
        &mut reader,
        "13",
        "resources.delete",
        json!({ "classId": class_id, "resourceId": note_id }),
    );
    assert_eq!(code, "unauthorized");

    let _ = sign_in(&mut stdin, &mut reader, "14", "teach@school.test");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "resources.delete",
        json!({ "classId": class_id, "resourceId": note_id }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "resources.list",
        json!({ "classId": class_id }),
    );
    assert_eq!(listed["resources"].as_array().map(|a| a.len()), Some(1));
    let code = request_err(
        &mut stdin,
        &mut reader,
        "17",
        "resources.delete",
        json!({ "classId": class_id, "resourceId": note_id }),
    );
    assert_eq!(code, "not_found");
}
