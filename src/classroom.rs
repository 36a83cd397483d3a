use crate::blobs::BlobStore;
use crate::comments::{build_tree, CommentNode, FlatComment};
use crate::error::{AppError, AppResult};
use crate::forms::{
    self, number_value, parse_number, read_attachment, store_attachment, Attachment, FormKind,
    FormState, FormTarget,
};
use crate::roles::{user_path, Role, RoleInfo, Session};
use crate::settings::Settings;
use crate::store::{
    array_remove, array_union, compare_values, fields, increment, server_timestamp, Direction,
    Document, DocumentStore, Filter, Query,
};
use serde_json::{json, Map, Value};

pub fn class_path(class_id: &str) -> String {
    format!("classes/{}", class_id)
}

pub fn assignments_collection(class_id: &str) -> String {
    format!("classes/{}/assignments", class_id)
}

pub fn resources_collection(class_id: &str) -> String {
    format!("classes/{}/resources", class_id)
}

pub fn progress_path(class_id: &str, student_id: &str) -> String {
    format!("classes/{}/progress/{}", class_id, student_id)
}

pub fn comments_collection(post_id: &str) -> String {
    format!("posts/{}/comments", post_id)
}

pub fn messages_collection(chat_id: &str) -> String {
    format!("chats/{}/messages", chat_id)
}

/// Ids end up inside dotted field paths, so they must be plain path segments.
fn check_id(id: &str, what: &str) -> AppResult<()> {
    if id.is_empty() || id.contains(['/', '.']) {
        return Err(AppError::BadParams(format!("invalid {}: {:?}", what, id)));
    }
    Ok(())
}

// ---- classes ----

/// Loads the class and checks that `teacher` owns it.
pub fn owned_class(store: &DocumentStore, teacher: &RoleInfo, class_id: &str) -> AppResult<Document> {
    check_id(class_id, "classId")?;
    let class = store.require(&class_path(class_id), "class")?;
    if class.str_field("teacherId") != Some(teacher.uid.as_str()) {
        return Err(AppError::unauthorized("you do not teach this class"));
    }
    Ok(class)
}

/// Loads the class and checks that `uid` is enrolled, or teaches it.
pub fn member_class(store: &DocumentStore, caller: &RoleInfo, class_id: &str) -> AppResult<Document> {
    check_id(class_id, "classId")?;
    let class = store.require(&class_path(class_id), "class")?;
    let allowed = match caller.role {
        Role::Teacher => class.str_field("teacherId") == Some(caller.uid.as_str()),
        Role::Student => class.string_list("studentIds").contains(&caller.uid),
    };
    if !allowed {
        return Err(AppError::unauthorized("you are not a member of this class"));
    }
    Ok(class)
}

/// Finds a student by uid or email.
pub fn find_student(store: &DocumentStore, key: &str) -> AppResult<String> {
    let key = key.trim();
    let doc = if key.contains('@') {
        store
            .query(&Query::new("users").where_eq("email", json!(key.to_ascii_lowercase())))?
            .into_iter()
            .next()
    } else {
        check_id(key, "student id")?;
        store.get(&user_path(key))?
    };
    let Some(doc) = doc else {
        return Err(AppError::not_found(format!("no user matches {}", key)));
    };
    if doc.str_field("role") != Some(Role::Student.as_str()) {
        return Err(AppError::validation(format!("{} is not a student", key)));
    }
    Ok(doc.id)
}

/// Creates the class and enrolls `students`. Every student is resolved before
/// the first write, so an unknown student leaves nothing behind.
pub fn create_class(
    store: &mut DocumentStore,
    blobs: &BlobStore,
    settings: &Settings,
    teacher: &RoleInfo,
    form_fields: Map<String, Value>,
    students: &[String],
) -> AppResult<Document> {
    let form = FormState {
        kind: FormKind::Class,
        fields: form_fields,
        attachment: None,
    };
    forms::validate(&form)?;
    let mut student_ids = Vec::with_capacity(students.len());
    for key in students {
        let uid = find_student(store, key)?;
        if !student_ids.contains(&uid) {
            student_ids.push(uid);
        }
    }

    let target = FormTarget {
        collection: "classes".into(),
        blob_prefix: "classes".into(),
        create_defaults: fields(json!({
            "teacherId": teacher.uid,
            "students": 0,
            "studentIds": [],
        })),
    };
    let class = forms::submit(store, blobs, settings, &form, &target, None)?;
    store.update(
        &user_path(&teacher.uid),
        fields(json!({ "classIds": array_union(vec![json!(class.id)]) })),
    )?;
    log::info!("class {} created by {}", class.id, teacher.uid);

    let mut class = class;
    for uid in &student_ids {
        class = enroll_student(store, &class.id, uid)?;
    }
    Ok(class)
}

pub fn update_class(
    store: &mut DocumentStore,
    blobs: &BlobStore,
    settings: &Settings,
    teacher: &RoleInfo,
    class_id: &str,
    form_fields: Map<String, Value>,
) -> AppResult<Document> {
    let existing = owned_class(store, teacher, class_id)?;
    let form = FormState {
        kind: FormKind::Class,
        fields: form_fields,
        attachment: None,
    };
    let target = FormTarget {
        collection: "classes".into(),
        blob_prefix: "classes".into(),
        create_defaults: Map::new(),
    };
    forms::submit(store, blobs, settings, &form, &target, Some(&existing))
}

/// Adds the student to `studentIds` and bumps `students` in the same write.
/// Enrolling twice is a no-op, which keeps the counter equal to the list length.
pub fn enroll_student(store: &mut DocumentStore, class_id: &str, uid: &str) -> AppResult<Document> {
    let path = class_path(class_id);
    let updated = store.transact(&path, |current| {
        let current = current.ok_or_else(|| AppError::not_found("class not found"))?;
        if current.string_list("studentIds").iter().any(|s| s == uid) {
            return Ok(None);
        }
        Ok(Some(fields(json!({
            "studentIds": array_union(vec![json!(uid)]),
            "students": increment(1),
            "updatedAt": server_timestamp(),
        }))))
    })?;
    store.update(
        &user_path(uid),
        fields(json!({ "classIds": array_union(vec![json!(class_id)]) })),
    )?;
    match updated {
        Some(doc) => {
            log::info!("enrolled {} in {}", uid, class_id);
            Ok(doc)
        }
        None => store.require(&path, "class"),
    }
}

pub fn remove_student(store: &mut DocumentStore, class_id: &str, uid: &str) -> AppResult<Document> {
    let path = class_path(class_id);
    let updated = store.transact(&path, |current| {
        let current = current.ok_or_else(|| AppError::not_found("class not found"))?;
        if !current.string_list("studentIds").iter().any(|s| s == uid) {
            return Ok(None);
        }
        Ok(Some(fields(json!({
            "studentIds": array_remove(vec![json!(uid)]),
            "students": increment(-1),
            "updatedAt": server_timestamp(),
        }))))
    })?;
    if store.get(&user_path(uid))?.is_some() {
        store.update(
            &user_path(uid),
            fields(json!({ "classIds": array_remove(vec![json!(class_id)]) })),
        )?;
    }
    match updated {
        Some(doc) => {
            log::info!("removed {} from {}", uid, class_id);
            Ok(doc)
        }
        None => Err(AppError::not_found("student is not enrolled in this class")),
    }
}

/// Classes the caller teaches or attends.
pub fn list_classes(store: &DocumentStore, caller: &RoleInfo) -> AppResult<Vec<Document>> {
    let q = match caller.role {
        Role::Teacher => Query::new("classes").where_eq("teacherId", json!(caller.uid)),
        Role::Student => Query::new("classes").array_contains("studentIds", json!(caller.uid)),
    };
    store.query(&q.order_by("name", Direction::Asc))
}

// ---- assignments ----

#[allow(clippy::too_many_arguments)]
pub fn save_assignment(
    store: &mut DocumentStore,
    blobs: &BlobStore,
    settings: &Settings,
    teacher: &RoleInfo,
    class_id: &str,
    assignment_id: Option<&str>,
    form_fields: Map<String, Value>,
    attachment: Option<Attachment>,
) -> AppResult<Document> {
    owned_class(store, teacher, class_id)?;
    let collection = assignments_collection(class_id);
    let existing = match assignment_id {
        Some(id) => {
            check_id(id, "assignmentId")?;
            Some(store.require(&format!("{}/{}", collection, id), "assignment")?)
        }
        None => None,
    };
    let mut form_fields = form_fields;
    if existing.is_none() {
        form_fields
            .entry("totalPoints")
            .or_insert_with(|| json!(settings.default_total_points));
    }
    let form = FormState {
        kind: FormKind::Assignment,
        fields: form_fields,
        attachment,
    };
    let target = FormTarget {
        collection,
        blob_prefix: format!("assignments/{}", class_id),
        create_defaults: fields(json!({
            "classId": class_id,
            "teacherId": teacher.uid,
            "status": "active",
        })),
    };
    forms::submit(store, blobs, settings, &form, &target, existing.as_ref())
}

pub fn archive_assignment(
    store: &mut DocumentStore,
    teacher: &RoleInfo,
    class_id: &str,
    assignment_id: &str,
) -> AppResult<Document> {
    owned_class(store, teacher, class_id)?;
    check_id(assignment_id, "assignmentId")?;
    store.update(
        &format!("{}/{}", assignments_collection(class_id), assignment_id),
        fields(json!({ "status": "archived", "updatedAt": server_timestamp() })),
    )
}

pub fn active_assignments_query(class_id: &str) -> Query {
    Query::new(assignments_collection(class_id)).where_eq("status", json!("active"))
}

pub fn list_assignments(
    store: &DocumentStore,
    settings: &Settings,
    caller: &RoleInfo,
    class_id: &str,
    include_archived: bool,
) -> AppResult<Vec<Document>> {
    member_class(store, caller, class_id)?;
    // Students only ever see active work.
    let q = if include_archived && caller.role == Role::Teacher {
        Query::new(assignments_collection(class_id))
    } else {
        active_assignments_query(class_id)
    };
    let mut docs = store.query(&q)?;
    if settings.sort_by_due_date {
        docs.sort_by(|a, b| compare_values(a.get("dueDate"), b.get("dueDate")));
    }
    Ok(docs)
}

/// Records the student's submission under their progress record, keyed by assignment id.
pub fn submit_assignment(
    store: &mut DocumentStore,
    blobs: &BlobStore,
    settings: &Settings,
    student: &RoleInfo,
    class_id: &str,
    assignment_id: &str,
    attachment: Option<Attachment>,
) -> AppResult<Document> {
    member_class(store, student, class_id)?;
    check_id(assignment_id, "assignmentId")?;
    let assignment = store.require(
        &format!("{}/{}", assignments_collection(class_id), assignment_id),
        "assignment",
    )?;
    if assignment.str_field("status") != Some("active") {
        return Err(AppError::validation("this assignment is no longer accepting work"));
    }

    let key = format!("submissions.{}", assignment_id);
    let mut patch = fields(json!({ "studentId": student.uid, "classId": class_id }));
    patch.insert(format!("{}.status", key), json!("submitted"));
    patch.insert(format!("{}.submittedAt", key), server_timestamp());
    if let Some(att) = attachment {
        let bytes = read_attachment(settings, &att)?;
        let prefix = format!("submissions/{}/{}/{}", class_id, assignment_id, student.uid);
        let file_ref = store_attachment(blobs, settings, &att, &bytes, &prefix)?;
        patch.insert(format!("{}.file", key), file_ref);
    }
    let doc = store.set_merge(&progress_path(class_id, &student.uid), patch)?;
    log::info!("{} submitted {}", student.uid, assignment_id);
    Ok(doc)
}

/// Grades must lie in `0..=totalPoints`; anything else is rejected before the write.
pub fn grade_submission(
    store: &mut DocumentStore,
    teacher: &RoleInfo,
    class_id: &str,
    assignment_id: &str,
    student_id: &str,
    grade: &Value,
    feedback: Option<&str>,
) -> AppResult<Document> {
    let class = owned_class(store, teacher, class_id)?;
    check_id(assignment_id, "assignmentId")?;
    check_id(student_id, "studentId")?;
    let assignment = store.require(
        &format!("{}/{}", assignments_collection(class_id), assignment_id),
        "assignment",
    )?;
    let total = assignment
        .get("totalPoints")
        .and_then(parse_number)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("assignment has no totalPoints")))?;
    let grade = parse_number(grade).ok_or_else(|| AppError::validation("Grade must be a number"))?;
    if grade < 0.0 || grade > total {
        return Err(AppError::validation(format!(
            "Grade must be between 0 and {}",
            number_value(total)
        )));
    }
    if !class.string_list("studentIds").iter().any(|s| s == student_id) {
        return Err(AppError::not_found("student is not enrolled in this class"));
    }

    let key = format!("submissions.{}", assignment_id);
    let mut patch = fields(json!({ "studentId": student_id, "classId": class_id }));
    patch.insert(format!("{}.grade", key), number_value(grade));
    patch.insert(format!("{}.status", key), json!("graded"));
    patch.insert(format!("{}.gradedAt", key), server_timestamp());
    if let Some(text) = feedback {
        patch.insert(format!("{}.feedback", key), json!(text.trim()));
    }
    let doc = store.set_merge(&progress_path(class_id, student_id), patch)?;
    log::info!("graded {} for {} ({})", assignment_id, student_id, grade);
    Ok(doc)
}

/// Students may read only their own progress record.
pub fn get_progress(
    store: &DocumentStore,
    caller: &RoleInfo,
    class_id: &str,
    student_id: &str,
) -> AppResult<Option<Document>> {
    member_class(store, caller, class_id)?;
    check_id(student_id, "studentId")?;
    if caller.role == Role::Student && caller.uid != student_id {
        return Err(AppError::unauthorized("students can only see their own progress"));
    }
    store.get(&progress_path(class_id, student_id))
}

// ---- resources ----

#[allow(clippy::too_many_arguments)]
pub fn save_resource(
    store: &mut DocumentStore,
    blobs: &BlobStore,
    settings: &Settings,
    teacher: &RoleInfo,
    class_id: &str,
    resource_id: Option<&str>,
    form_fields: Map<String, Value>,
    attachment: Option<Attachment>,
) -> AppResult<Document> {
    owned_class(store, teacher, class_id)?;
    let collection = resources_collection(class_id);
    let existing = match resource_id {
        Some(id) => {
            check_id(id, "resourceId")?;
            Some(store.require(&format!("{}/{}", collection, id), "resource")?)
        }
        None => None,
    };
    let form = FormState {
        kind: FormKind::Resource,
        fields: form_fields,
        attachment,
    };
    let target = FormTarget {
        collection,
        blob_prefix: format!("resources/{}", class_id),
        create_defaults: fields(json!({ "classId": class_id })),
    };
    forms::submit(store, blobs, settings, &form, &target, existing.as_ref())
}

pub fn delete_resource(
    store: &mut DocumentStore,
    teacher: &RoleInfo,
    class_id: &str,
    resource_id: &str,
) -> AppResult<()> {
    owned_class(store, teacher, class_id)?;
    check_id(resource_id, "resourceId")?;
    // The stored blob stays; other documents may still reference it.
    if !store.delete(&format!("{}/{}", resources_collection(class_id), resource_id))? {
        return Err(AppError::not_found("resource not found"));
    }
    log::info!("resource {} removed from {}", resource_id, class_id);
    Ok(())
}

pub fn list_resources(store: &DocumentStore, caller: &RoleInfo, class_id: &str) -> AppResult<Vec<Document>> {
    member_class(store, caller, class_id)?;
    store.query(&Query::new(resources_collection(class_id)).order_by("createdAt", Direction::Desc))
}

// ---- forum ----

pub fn save_post(
    store: &mut DocumentStore,
    blobs: &BlobStore,
    settings: &Settings,
    session: &Session,
    post_id: Option<&str>,
    form_fields: Map<String, Value>,
    attachment: Option<Attachment>,
) -> AppResult<Document> {
    let existing = match post_id {
        Some(id) => {
            check_id(id, "postId")?;
            let post = store.require(&format!("posts/{}", id), "post")?;
            if post.str_field("authorId") != Some(session.uid.as_str()) {
                return Err(AppError::unauthorized("only the author can edit this post"));
            }
            Some(post)
        }
        None => None,
    };
    let form = FormState {
        kind: FormKind::Post,
        fields: form_fields,
        attachment,
    };
    let target = FormTarget {
        collection: "posts".into(),
        blob_prefix: format!("posts/{}", session.uid),
        create_defaults: fields(json!({
            "authorId": session.uid,
            "authorEmail": session.email,
            "commentCount": 0,
        })),
    };
    forms::submit(store, blobs, settings, &form, &target, existing.as_ref())
}

pub fn list_posts(store: &DocumentStore) -> AppResult<Vec<Document>> {
    store.query(&Query::new("posts").order_by("createdAt", Direction::Desc))
}

/// Adds a comment (optionally replying to `parent_id`) and bumps the post's counter.
pub fn add_comment(
    store: &mut DocumentStore,
    session: &Session,
    post_id: &str,
    parent_id: Option<&str>,
    content: &str,
) -> AppResult<Document> {
    let content = content.trim();
    if content.is_empty() {
        return Err(AppError::validation("Comment cannot be empty"));
    }
    check_id(post_id, "postId")?;
    let post_path = format!("posts/{}", post_id);
    store.require(&post_path, "post")?;
    let collection = comments_collection(post_id);
    if let Some(parent) = parent_id {
        check_id(parent, "parentId")?;
        store.require(&format!("{}/{}", collection, parent), "parent comment")?;
    }
    let comment = store.create(
        &collection,
        fields(json!({
            "postId": post_id,
            "parentId": parent_id,
            "authorId": session.uid,
            "authorEmail": session.email,
            "content": content,
            "createdAt": server_timestamp(),
        })),
    )?;
    store.update(&post_path, fields(json!({ "commentCount": increment(1) })))?;
    Ok(comment)
}

pub fn comment_tree(store: &DocumentStore, settings: &Settings, post_id: &str) -> AppResult<Vec<CommentNode>> {
    check_id(post_id, "postId")?;
    store.require(&format!("posts/{}", post_id), "post")?;
    let flat: Vec<FlatComment> = store
        .query(&Query::new(comments_collection(post_id)))?
        .iter()
        .map(FlatComment::from_document)
        .collect();
    Ok(build_tree(&flat, settings.orphan_policy, settings.max_indent_depth))
}

// ---- chat ----

pub fn create_chat(
    store: &mut DocumentStore,
    session: &Session,
    title: &str,
    participant_ids: &[String],
) -> AppResult<Document> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::validation("Chat title is required"));
    }
    let mut participants = vec![session.uid.clone()];
    for id in participant_ids {
        check_id(id, "participant id")?;
        if !participants.contains(id) {
            store.require(&user_path(id), "participant")?;
            participants.push(id.clone());
        }
    }
    store.create(
        "chats",
        fields(json!({
            "title": title,
            "createdBy": session.uid,
            "participantIds": participants,
            "lastSeq": 0,
            "lastMessage": null,
            "lastUpdated": server_timestamp(),
        })),
    )
}

pub fn participant_chat(store: &DocumentStore, session: &Session, chat_id: &str) -> AppResult<Document> {
    check_id(chat_id, "chatId")?;
    let chat = store.require(&format!("chats/{}", chat_id), "chat")?;
    if !chat.string_list("participantIds").contains(&session.uid) {
        return Err(AppError::unauthorized("you are not in this chat"));
    }
    Ok(chat)
}

/// Appends a message. The chat's `lastSeq` is bumped atomically and names the
/// message document, so history reads back in send order.
pub fn send_message(
    store: &mut DocumentStore,
    settings: &Settings,
    session: &Session,
    chat_id: &str,
    text: &str,
) -> AppResult<Document> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::validation("Message cannot be empty"));
    }
    if text.chars().count() > settings.max_message_chars {
        return Err(AppError::validation(format!(
            "Message is longer than {} characters",
            settings.max_message_chars
        )));
    }
    participant_chat(store, session, chat_id)?;
    let chat = store.update(
        &format!("chats/{}", chat_id),
        fields(json!({
            "lastSeq": increment(1),
            "lastMessage": { "senderId": session.uid, "text": text },
            "lastUpdated": server_timestamp(),
        })),
    )?;
    let seq = chat
        .i64_field("lastSeq")
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("chat has no lastSeq")))?;
    store.set(
        &format!("{}/{:012}", messages_collection(chat_id), seq),
        fields(json!({
            "seq": seq,
            "senderId": session.uid,
            "senderEmail": session.email,
            "text": text,
            "timestamp": server_timestamp(),
        })),
    )
}

pub fn list_messages(
    store: &DocumentStore,
    session: &Session,
    chat_id: &str,
    after_seq: Option<i64>,
) -> AppResult<Vec<Document>> {
    participant_chat(store, session, chat_id)?;
    let mut docs = store.query(&Query::new(messages_collection(chat_id)).order_by("seq", Direction::Asc))?;
    if let Some(after) = after_seq {
        docs.retain(|d| d.i64_field("seq").map(|s| s > after).unwrap_or(false));
    }
    Ok(docs)
}

pub fn list_chats(store: &DocumentStore, session: &Session) -> AppResult<Vec<Document>> {
    store.query(
        &Query::new("chats")
            .array_contains("participantIds", json!(session.uid))
            .order_by("lastUpdated", Direction::Desc),
    )
}

// ---- live queries ----

/// True when some filter pins `field` to anything other than `value`.
fn pins_other(query: &Query, field: &str, value: &str) -> bool {
    query.filters.iter().any(|f| match f {
        Filter::Eq(name, v) => name == field && v.as_str() != Some(value),
        Filter::In(name, options) => {
            name == field && options.iter().any(|v| v.as_str() != Some(value))
        }
        Filter::ArrayContains(..) => false,
    })
}

/// Applies the read rules of the matching list operation to a live query.
///
/// Class collections need membership, progress is narrowed to the caller's own
/// record for students, chats to the caller's conversations. The forum is open
/// to anyone signed in. Every other collection is refused.
pub fn scope_live_query(
    store: &DocumentStore,
    session: &Session,
    caller: &RoleInfo,
    query: Query,
) -> AppResult<Query> {
    let collection = query.collection.clone();
    let segments: Vec<&str> = collection.split('/').collect();
    let scoped = match segments.as_slice() {
        ["posts"] | ["posts", _, "comments"] => query,
        ["chats"] => query.array_contains("participantIds", json!(session.uid)),
        ["chats", chat_id, "messages"] => {
            participant_chat(store, session, chat_id)?;
            query
        }
        ["classes", class_id, "assignments"] => {
            member_class(store, caller, class_id)?;
            if caller.role == Role::Student {
                if pins_other(&query, "status", "active") {
                    return Err(AppError::unauthorized("students only see active assignments"));
                }
                query.where_eq("status", json!("active"))
            } else {
                query
            }
        }
        ["classes", class_id, "resources"] => {
            member_class(store, caller, class_id)?;
            query
        }
        ["classes", class_id, "progress"] => match caller.role {
            Role::Teacher => {
                owned_class(store, caller, class_id)?;
                query
            }
            Role::Student => {
                member_class(store, caller, class_id)?;
                if pins_other(&query, "studentId", &caller.uid) {
                    return Err(AppError::unauthorized(
                        "students can only see their own progress",
                    ));
                }
                query.where_eq("studentId", json!(caller.uid))
            }
        },
        _ => {
            return Err(AppError::unauthorized(format!(
                "{} cannot be watched",
                collection
            )))
        }
    };
    Ok(scoped)
}
