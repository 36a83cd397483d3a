mod test_support;

use serde_json::json;
use test_support::{request, request_err, request_ok, sign_up, spawn_sidecar, temp_dir};

#[test]
fn guard_sends_students_away_from_teacher_screens() {
    let workspace = temp_dir("classroomd-guard");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // Nobody signed in: fail closed.
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "guard.check",
        json!({ "requiredRole": "teacher", "fallbackRoute": "/login" }),
    );
    assert_eq!(res["guard"]["state"], json!("unauthorized"));
    assert_eq!(res["guard"]["redirect"], json!("/login"));

    let _ = sign_up(&mut stdin, &mut reader, "3", "ana@school.test", "student");
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "guard.check",
        json!({ "requiredRole": "teacher", "fallbackRoute": "/student/home" }),
    );
    assert_eq!(res["guard"]["state"], json!("unauthorized"));
    assert_eq!(res["guard"]["redirect"], json!("/student/home"));
    assert_eq!(res["rendered"], json!(false));

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "guard.check",
        json!({ "requiredRole": "student" }),
    );
    assert_eq!(res["guard"]["state"], json!("authorized"));
    assert_eq!(res["guard"]["role"]["role"], json!("student"));
    assert_eq!(res["rendered"], json!(true));
}

#[test]
fn sign_in_checks_role_and_passwords_need_reauthentication() {
    let workspace = temp_dir("classroomd-auth");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let uid = sign_up(&mut stdin, &mut reader, "2", "teach@school.test", "teacher");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "auth.signUp",
        json!({ "email": "Teach@School.test", "password": "another1", "role": "student" }),
    );
    assert_eq!(code, "already_exists");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "auth.signIn",
        json!({ "email": "teach@school.test", "password": "secret1", "expectedRole": "student" }),
    );
    assert_eq!(code, "unauthorized");
    let current = request_ok(&mut stdin, &mut reader, "5", "auth.current", json!({}));
    assert!(current["session"].is_null());

    let code = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "auth.signIn",
        json!({ "email": "teach@school.test", "password": "wrong-one" }),
    );
    assert_eq!(code, "auth_failed");

    let signed_in = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "auth.signIn",
        json!({ "email": "teach@school.test", "password": "secret1", "expectedRole": "teacher" }),
    );
    assert_eq!(signed_in["session"]["uid"], json!(uid));
    assert_eq!(signed_in["role"]["role"], json!("teacher"));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "auth.changePassword",
        json!({ "currentPassword": "nope-nope", "newPassword": "brandnew1" }),
    );
    assert_eq!(code, "auth_failed");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "auth.changePassword",
        json!({ "currentPassword": "secret1", "newPassword": "brandnew1" }),
    );

    // The token outlives the process until sign-out.
    drop(stdin);
    let _ = child.wait();
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected["session"]["uid"], json!(uid));

    let _ = request_ok(&mut stdin, &mut reader, "11", "auth.signOut", json!({}));
    let restored = request_ok(&mut stdin, &mut reader, "12", "auth.restore", json!({}));
    assert!(restored["session"].is_null());
    let code = request_err(&mut stdin, &mut reader, "13", "session.role", json!({}));
    assert_eq!(code, "not_signed_in");

    let old = request(
        &mut stdin,
        &mut reader,
        "14",
        "auth.signIn",
        json!({ "email": "teach@school.test", "password": "secret1" }),
    );
    assert_eq!(old["ok"], json!(false));
    let fresh = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "auth.signIn",
        json!({ "email": "teach@school.test", "password": "brandnew1" }),
    );
    assert_eq!(fresh["session"]["uid"], json!(uid));
}
