use crate::blobs::{sanitize_file_name, sha256_hex, BlobStore};
use crate::error::{AppError, AppResult};
use crate::settings::Settings;
use crate::store::{array_union, server_timestamp, Document, DocumentStore};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use std::io::Read;
use std::path::PathBuf;

/// A file picked on the device: where to read it and what it claims to be.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub local_path: PathBuf,
    pub name: String,
    pub mime_type: String,
}

impl Attachment {
    pub fn from_json(v: &Value) -> AppResult<Self> {
        let local_path = v
            .get("localPath")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AppError::BadParams("file.localPath is required".into()))?;
        let name = v
            .get("name")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| {
                PathBuf::from(local_path)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "file".to_string())
            });
        let mime_type = v
            .get("mimeType")
            .and_then(|v| v.as_str())
            .unwrap_or("application/octet-stream")
            .to_string();
        Ok(Self {
            local_path: PathBuf::from(local_path),
            name,
            mime_type,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormKind {
    Class,
    Assignment,
    Resource,
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Image,
}

impl FileKind {
    pub fn label(self) -> &'static str {
        match self {
            FileKind::Pdf => "PDF",
            FileKind::Image => "Image",
        }
    }
}

/// Coarse classification by MIME substring: anything that is not a PDF is shown as an image.
pub fn classify_mime(mime: &str) -> FileKind {
    if mime.to_ascii_lowercase().contains("pdf") {
        FileKind::Pdf
    } else {
        FileKind::Image
    }
}

#[derive(Debug, Clone)]
pub struct FormState {
    pub kind: FormKind,
    pub fields: Map<String, Value>,
    pub attachment: Option<Attachment>,
}

/// Where a form lands: the collection for new documents, the blob folder for
/// uploads, and fields only written on create (owner ids, counters, status).
#[derive(Debug, Clone)]
pub struct FormTarget {
    pub collection: String,
    pub blob_prefix: String,
    pub create_defaults: Map<String, Value>,
}

fn required_text(fields: &Map<String, Value>, key: &str, label: &str) -> AppResult<String> {
    let s = fields
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .unwrap_or_default();
    if s.is_empty() {
        return Err(AppError::validation(format!("{} is required", label)));
    }
    Ok(s.to_string())
}

fn optional_text(fields: &Map<String, Value>, key: &str) -> AppResult<Option<String>> {
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => Err(AppError::validation(format!("{} must be text", key))),
    }
}

/// Accepts numbers and numeric strings, the way a text input delivers them.
pub fn parse_number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

pub fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

/// Normalizes `YYYY-MM-DD` (end of that day, UTC) or RFC 3339 input to RFC 3339.
pub fn parse_due_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(
            dt.with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        );
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let end = date.and_hms_opt(23, 59, 59)?;
    Some(end.and_utc().to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Checks required fields and returns the normalized scalar payload.
/// Runs before any file or store access.
pub fn validate(form: &FormState) -> AppResult<Map<String, Value>> {
    let f = &form.fields;
    let mut out = Map::new();
    match form.kind {
        FormKind::Class => {
            out.insert("name".into(), json!(required_text(f, "name", "Class name")?));
            out.insert("subject".into(), json!(required_text(f, "subject", "Subject")?));
        }
        FormKind::Assignment => {
            out.insert("title".into(), json!(required_text(f, "title", "Title")?));
            let points = f
                .get("totalPoints")
                .and_then(parse_number)
                .ok_or_else(|| AppError::validation("Total points must be a number"))?;
            if points <= 0.0 {
                return Err(AppError::validation("Total points must be greater than zero"));
            }
            out.insert("totalPoints".into(), number_value(points));
            let due_raw = required_text(f, "dueDate", "Due date")?;
            let due = parse_due_date(&due_raw)
                .ok_or_else(|| AppError::validation("Due date must be YYYY-MM-DD"))?;
            out.insert("dueDate".into(), json!(due));
            if let Some(description) = optional_text(f, "description")? {
                out.insert("description".into(), json!(description));
            }
            if let Some(status) = optional_text(f, "status")? {
                if status != "active" && status != "archived" {
                    return Err(AppError::validation("status must be active or archived"));
                }
                out.insert("status".into(), json!(status));
            }
        }
        FormKind::Resource => {
            out.insert("title".into(), json!(required_text(f, "title", "Title")?));
            if let Some(content) = optional_text(f, "content")? {
                out.insert("content".into(), json!(content));
            }
        }
        FormKind::Post => {
            out.insert("title".into(), json!(required_text(f, "title", "Title")?));
            out.insert("content".into(), json!(required_text(f, "content", "Content")?));
        }
    }
    Ok(out)
}

fn existing_files(doc: Option<&Document>) -> Vec<&Value> {
    let Some(doc) = doc else {
        return Vec::new();
    };
    let mut out = Vec::new();
    if let Some(f) = doc.get("file").filter(|v| v.is_object()) {
        out.push(f);
    }
    if let Some(items) = doc.get("files").and_then(|v| v.as_array()) {
        out.extend(items.iter().filter(|v| v.is_object()));
    }
    out
}

/// Reads the picked file's bytes, enforcing the configured upload limit.
/// The size is checked from metadata first so an oversized pick is never buffered.
pub fn read_attachment(settings: &Settings, attachment: &Attachment) -> AppResult<Vec<u8>> {
    let too_large = || {
        AppError::validation(format!(
            "file is larger than {} bytes",
            settings.upload_max_bytes
        ))
    };
    let file = std::fs::File::open(&attachment.local_path)?;
    if file.metadata()?.len() > settings.upload_max_bytes {
        return Err(too_large());
    }
    // The file may grow between the check and the read.
    let mut bytes = Vec::new();
    file.take(settings.upload_max_bytes + 1).read_to_end(&mut bytes)?;
    if bytes.len() as u64 > settings.upload_max_bytes {
        return Err(too_large());
    }
    Ok(bytes)
}

/// Stores the bytes under `blob_prefix` and returns the file reference to embed.
pub fn store_attachment(
    blobs: &BlobStore,
    settings: &Settings,
    attachment: &Attachment,
    bytes: &[u8],
    blob_prefix: &str,
) -> AppResult<Value> {
    let file_name = sanitize_file_name(&attachment.name);
    let path = if settings.upload_path_timestamp {
        format!(
            "{}/{}_{}",
            blob_prefix,
            Utc::now().timestamp_millis(),
            file_name
        )
    } else {
        format!("{}/{}", blob_prefix, file_name)
    };
    let stored = blobs.store(&path, bytes, &attachment.mime_type)?;
    let url = blobs.url(&stored)?;
    let kind = classify_mime(&attachment.mime_type);
    Ok(json!({
        "url": url,
        "name": attachment.name,
        "path": stored.path,
        "contentType": stored.content_type,
        "kind": kind.label(),
        "size": stored.size,
        "sha256": stored.sha256,
    }))
}

/// Uploads the attachment unless an identical file is already on the document.
/// Returns the file reference and whether it is new.
fn resolve_attachment(
    blobs: &BlobStore,
    settings: &Settings,
    attachment: &Attachment,
    target: &FormTarget,
    existing: Option<&Document>,
) -> AppResult<(Value, bool)> {
    let bytes = read_attachment(settings, attachment)?;
    let digest = sha256_hex(&bytes);
    if let Some(same) = existing_files(existing)
        .into_iter()
        .find(|f| f.get("sha256").and_then(|v| v.as_str()) == Some(digest.as_str()))
    {
        return Ok((same.clone(), false));
    }
    let file_ref = store_attachment(blobs, settings, attachment, &bytes, &target.blob_prefix)?;
    Ok((file_ref, true))
}

/// Maps form state onto one document write.
///
/// Validation failures return before any I/O. A new attachment is stored first
/// and its reference embedded; otherwise the previous reference is left as is.
/// Creates when `existing` is `None`, else merges into it.
pub fn submit(
    store: &mut DocumentStore,
    blobs: &BlobStore,
    settings: &Settings,
    form: &FormState,
    target: &FormTarget,
    existing: Option<&Document>,
) -> AppResult<Document> {
    let mut payload = validate(form)?;

    let file = match &form.attachment {
        Some(att) => Some(resolve_attachment(blobs, settings, att, target, existing)?),
        None => None,
    };

    if form.kind == FormKind::Resource {
        let kind = file
            .as_ref()
            .map(|(f, _)| f)
            .or_else(|| existing.and_then(|d| d.get("file")).filter(|v| v.is_object()))
            .and_then(|f| f.get("kind").and_then(|v| v.as_str()))
            .unwrap_or("Note")
            .to_string();
        payload.insert("type".into(), json!(kind));
    }

    if let Some((file_ref, is_new)) = file {
        match form.kind {
            FormKind::Post => {
                if is_new {
                    payload.insert("files".into(), array_union(vec![file_ref]));
                }
            }
            _ => {
                payload.insert("file".into(), file_ref);
            }
        }
    }

    payload.insert("updatedAt".into(), server_timestamp());
    match existing {
        Some(doc) => {
            log::debug!("updating {}", doc.path);
            store.update(&doc.path, payload)
        }
        None => {
            for (k, v) in &target.create_defaults {
                payload.entry(k.clone()).or_insert_with(|| v.clone());
            }
            match form.kind {
                FormKind::Post => {
                    payload.entry("files").or_insert_with(|| json!([]));
                }
                FormKind::Assignment => {
                    payload.entry("description").or_insert_with(|| json!(""));
                }
                FormKind::Resource => {
                    payload.entry("content").or_insert_with(|| json!(""));
                }
                FormKind::Class => {}
            }
            payload.insert("createdAt".into(), server_timestamp());
            store.create(&target.collection, payload)
        }
    }
}
