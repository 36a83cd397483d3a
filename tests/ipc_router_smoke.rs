mod test_support;

use serde_json::json;
use test_support::{request, request_ok, sign_up, spawn_sidecar, temp_dir};

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("classroomd-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health["workspacePath"].is_null());
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = sign_up(&mut stdin, &mut reader, "3", "teach@school.test", "teacher");

    let methods = [
        ("auth.current", json!({})),
        ("auth.restore", json!({})),
        ("session.role", json!({})),
        ("guard.check", json!({ "requiredRole": "teacher" })),
        ("classes.list", json!({})),
        ("classes.get", json!({ "classId": "missing" })),
        ("classes.update", json!({ "classId": "missing", "fields": {} })),
        ("classes.enroll", json!({ "classId": "missing", "student": "x@y.z" })),
        ("classes.removeStudent", json!({ "classId": "missing", "studentId": "x" })),
        ("assignments.list", json!({ "classId": "missing" })),
        ("assignments.archive", json!({ "classId": "missing", "assignmentId": "a" })),
        ("assignments.submit", json!({ "classId": "missing", "assignmentId": "a" })),
        ("assignments.grade", json!({ "classId": "missing", "assignmentId": "a", "studentId": "s", "grade": 1 })),
        ("progress.get", json!({ "classId": "missing" })),
        ("resources.list", json!({ "classId": "missing" })),
        ("resources.save", json!({ "classId": "missing", "fields": { "title": "t" } })),
        ("resources.delete", json!({ "classId": "missing", "resourceId": "r" })),
        ("forum.posts.list", json!({})),
        ("forum.comments.tree", json!({ "postId": "missing" })),
        ("forum.comments.add", json!({ "postId": "missing", "content": "hi" })),
        ("chat.list", json!({})),
        ("chat.messages", json!({ "chatId": "missing" })),
        ("live.viewOpen", json!({ "source": "assignments" })),
        ("live.unsubscribe", json!({ "subscriptionId": 999 })),
        ("setup.get", json!({})),
    ];
    for (i, (method, params)) in methods.into_iter().enumerate() {
        let resp = request(&mut stdin, &mut reader, &format!("m{}", i), method, params);
        let code = resp
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("");
        assert_ne!(code, "not_implemented", "unexpected unknown method {}", method);
        assert_ne!(code, "internal", "{} crashed: {}", method, resp);
    }

    let unknown = request(&mut stdin, &mut reader, "99", "grades.export", json!({}));
    assert_eq!(unknown["error"]["code"], json!("not_implemented"));

    let _ = request_ok(&mut stdin, &mut reader, "100", "auth.signOut", json!({}));
    drop(stdin);
    let status = child.wait().expect("wait for sidecar");
    assert!(status.success());
}
