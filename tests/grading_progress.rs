mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, sign_in, sign_up, spawn_sidecar, temp_dir};

#[test]
fn grades_are_range_checked_and_land_in_the_progress_record() {
    let workspace = temp_dir("classroomd-grading");
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
        json!({
            "fields": { "name": "Algebra", "subject": "Math" },
            "students": [student]
        }),
    );
    let class_id = created["class"]["id"].as_str().expect("class id").to_string();

    // Empty title never reaches the store.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "assignments.save",
        json!({
            "classId": class_id,
            "fields": { "title": "", "totalPoints": 100, "dueDate": "2024-06-01" }
        }),
    );
    assert_eq!(code, "validation_failed");
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "assignments.list",
        json!({ "classId": class_id }),
    );
    assert_eq!(listed["assignments"], json!([]));

    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "assignments.save",
        json!({
            "classId": class_id,
            "fields": { "title": "Quiz 1", "totalPoints": "100", "dueDate": "2024-06-01" }
        }),
    );
    let assignment_id = saved["assignment"]["id"].as_str().expect("assignment id").to_string();
    assert_eq!(saved["assignment"]["data"]["totalPoints"], json!(100));
    assert_eq!(saved["assignment"]["data"]["status"], json!("active"));

    for (i, bad) in [json!(-1), json!(101), json!("ten")].into_iter().enumerate() {
        let code = request_err(
            &mut stdin,
            &mut reader,
            &format!("bad-{}", i),
            "assignments.grade",
            json!({
                "classId": class_id,
                "assignmentId": assignment_id,
                "studentId": student,
                "grade": bad
            }),
        );
        assert_eq!(code, "validation_failed");
    }
    let progress = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "progress.get",
        json!({ "classId": class_id, "studentId": student }),
    );
    assert!(progress["progress"].is_null());

    // Teachers cannot submit work.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "assignments.submit",
        json!({ "classId": class_id, "assignmentId": assignment_id }),
    );
    assert_eq!(code, "unauthorized");

    let _ = sign_in(&mut stdin, &mut reader, "10", "ana@school.test");
    let essay = workspace.join("essay.pdf");
    std::fs::write(&essay, b"%PDF-1.4 my essay").expect("write essay");
    let submitted = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "assignments.submit",
        json!({
            "classId": class_id,
            "assignmentId": assignment_id,
            "file": { "localPath": essay.to_string_lossy(), "name": "essay.pdf", "mimeType": "application/pdf" }
        }),
    );
    let sub = &submitted["progress"]["data"]["submissions"][&assignment_id];
    assert_eq!(sub["status"], json!("submitted"));
    assert_eq!(sub["file"]["kind"], json!("PDF"));

    let _ = sign_in(&mut stdin, &mut reader, "12", "teach@school.test");
    let graded = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "assignments.grade",
        json!({
            "classId": class_id,
            "assignmentId": assignment_id,
            "studentId": student,
            "grade": 100,
            "feedback": "Perfect"
        }),
    );
    let progress = &graded["progress"];
    assert_eq!(
        progress["path"],
        json!(format!("classes/{}/progress/{}", class_id, student))
    );
    let sub = &progress["data"]["submissions"][&assignment_id];
    assert_eq!(sub["grade"], json!(100));
    assert_eq!(sub["status"], json!("graded"));
    assert_eq!(sub["feedback"], json!("Perfect"));
    // The earlier submission survives the grade merge.
    assert_eq!(sub["file"]["name"], json!("essay.pdf"));

    // Archived assignments stop accepting work and drop out of the active list.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "assignments.archive",
        json!({ "classId": class_id, "assignmentId": assignment_id }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "assignments.list",
        json!({ "classId": class_id }),
    );
    assert_eq!(listed["assignments"], json!([]));
    let all = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "assignments.list",
        json!({ "classId": class_id, "includeArchived": true }),
    );
    assert_eq!(all["assignments"].as_array().map(|a| a.len()), Some(1));
}
