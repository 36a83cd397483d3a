use crate::error::{AppError, AppResult};
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

// Field transforms travel inside ordinary JSON as `{"__op": ...}` objects so
// clients can send them over the wire unchanged.
const OP_KEY: &str = "__op";

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn server_timestamp() -> Value {
    json!({ OP_KEY: "serverTimestamp" })
}

pub fn increment(by: i64) -> Value {
    json!({ OP_KEY: "increment", "by": by })
}

pub fn array_union(values: Vec<Value>) -> Value {
    json!({ OP_KEY: "arrayUnion", "values": values })
}

pub fn array_remove(values: Vec<Value>) -> Value {
    json!({ OP_KEY: "arrayRemove", "values": values })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub path: String,
    pub data: Value,
    pub created_at: String,
    pub updated_at: String,
}

impl Document {
    pub fn get(&self, field: &str) -> Option<&Value> {
        lookup(&self.data, field)
    }

    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(|v| v.as_str())
    }

    pub fn i64_field(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(|v| v.as_i64())
    }

    pub fn string_list(&self, field: &str) -> Vec<String> {
        self.get(field)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Resolves a dotted field path (`submissions.a1.grade`) inside a document body.
pub fn lookup<'a>(data: &'a Value, field: &str) -> Option<&'a Value> {
    field.split('.').try_fold(data, |cur, seg| cur.get(seg))
}

/// Splits `classes/c1/assignments/a1` into (`classes/c1/assignments`, `a1`).
pub fn split_path(path: &str) -> AppResult<(String, String)> {
    let segments = path_segments(path)?;
    if segments.len() % 2 != 0 {
        return Err(AppError::BadParams(format!(
            "document path must have an even number of segments: {}",
            path
        )));
    }
    let (id, parent) = segments
        .split_last()
        .ok_or_else(|| AppError::BadParams("empty document path".into()))?;
    Ok((parent.join("/"), id.to_string()))
}

pub fn validate_collection(collection: &str) -> AppResult<()> {
    let segments = path_segments(collection)?;
    if segments.len() % 2 != 1 {
        return Err(AppError::BadParams(format!(
            "collection path must have an odd number of segments: {}",
            collection
        )));
    }
    Ok(())
}

fn path_segments(path: &str) -> AppResult<Vec<&str>> {
    let segments: Vec<&str> = path.split('/').collect();
    if segments
        .iter()
        .any(|s| s.trim().is_empty() || *s == "." || *s == "..")
    {
        return Err(AppError::BadParams(format!("invalid path: {:?}", path)));
    }
    Ok(segments)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    ArrayContains(String, Value),
    In(String, Vec<Value>),
}

impl Filter {
    fn matches(&self, data: &Value) -> bool {
        match self {
            Filter::Eq(field, want) => lookup(data, field) == Some(want),
            Filter::ArrayContains(field, want) => lookup(data, field)
                .and_then(|v| v.as_array())
                .map(|items| items.contains(want))
                .unwrap_or(false),
            Filter::In(field, options) => lookup(data, field)
                .map(|v| options.contains(v))
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: &str, value: Value) -> Self {
        self.filters.push(Filter::Eq(field.to_string(), value));
        self
    }

    pub fn array_contains(mut self, field: &str, value: Value) -> Self {
        self.filters
            .push(Filter::ArrayContains(field.to_string(), value));
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    fn matches(&self, data: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(data))
    }
}

pub type SubscriptionId = u64;

struct Subscription {
    query: Query,
    listener: Box<dyn FnMut(SubscriptionId, &[Document])>,
}

enum WriteMode {
    Create,
    Replace,
    Merge,
    Update,
}

/// Path-addressed JSON documents on SQLite with push listeners.
///
/// Each write is one transaction over one document. Listeners receive the full
/// result set of their query (never a diff) after any write to their collection.
pub struct DocumentStore {
    conn: Connection,
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    next_subscription: SubscriptionId,
    write_count: u64,
}

impl DocumentStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            subscriptions: BTreeMap::new(),
            next_subscription: 1,
            write_count: 0,
        }
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Number of committed document writes since the store was opened.
    pub fn write_count(&self) -> u64 {
        self.write_count
    }

    pub fn get(&self, path: &str) -> AppResult<Option<Document>> {
        split_path(path)?;
        load_document(&self.conn, path)
    }

    pub fn require(&self, path: &str, what: &str) -> AppResult<Document> {
        self.get(path)?
            .ok_or_else(|| AppError::not_found(format!("{} not found", what)))
    }

    pub fn query(&self, query: &Query) -> AppResult<Vec<Document>> {
        validate_collection(&query.collection)?;
        run_query(&self.conn, query)
    }

    pub fn create(&mut self, collection: &str, data: Map<String, Value>) -> AppResult<Document> {
        validate_collection(collection)?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        let path = format!("{}/{}", collection, id);
        self.commit(&path, WriteMode::Create, |_| Ok(Some(data)))
            .and_then(require_written)
    }

    pub fn set(&mut self, path: &str, data: Map<String, Value>) -> AppResult<Document> {
        self.commit(path, WriteMode::Replace, |_| Ok(Some(data)))
            .and_then(require_written)
    }

    /// Field-level merge that creates the document when it is missing.
    pub fn set_merge(&mut self, path: &str, patch: Map<String, Value>) -> AppResult<Document> {
        self.commit(path, WriteMode::Merge, |_| Ok(Some(patch)))
            .and_then(require_written)
    }

    /// Field-level merge onto an existing document.
    pub fn update(&mut self, path: &str, patch: Map<String, Value>) -> AppResult<Document> {
        self.commit(path, WriteMode::Update, |_| Ok(Some(patch)))
            .and_then(require_written)
    }

    /// Reads the current document and applies the patch `build` derives from it,
    /// both inside one transaction. Returning `Ok(None)` skips the write.
    pub fn transact<F>(&mut self, path: &str, build: F) -> AppResult<Option<Document>>
    where
        F: FnOnce(Option<&Document>) -> AppResult<Option<Map<String, Value>>>,
    {
        self.commit(path, WriteMode::Merge, build)
    }

    /// Removes the document; `false` when there was nothing to remove.
    pub fn delete(&mut self, path: &str) -> AppResult<bool> {
        let (collection, _) = split_path(path)?;
        let n = self
            .conn
            .execute("DELETE FROM documents WHERE path = ?", [path])?;
        if n > 0 {
            self.write_count += 1;
            self.notify(&collection);
        }
        Ok(n > 0)
    }

    /// Registers a listener and immediately delivers the current result set.
    pub fn subscribe<F>(&mut self, query: Query, mut listener: F) -> AppResult<SubscriptionId>
    where
        F: FnMut(SubscriptionId, &[Document]) + 'static,
    {
        validate_collection(&query.collection)?;
        let id = self.next_subscription;
        self.next_subscription += 1;
        let docs = run_query(&self.conn, &query)?;
        listener(id, docs.as_slice());
        log::debug!("subscription {} opened on {}", id, query.collection);
        self.subscriptions.insert(
            id,
            Subscription {
                query,
                listener: Box::new(listener),
            },
        );
        Ok(id)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let removed = self.subscriptions.remove(&id).is_some();
        if removed {
            log::debug!("subscription {} closed", id);
        }
        removed
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    fn commit<F>(&mut self, path: &str, mode: WriteMode, build: F) -> AppResult<Option<Document>>
    where
        F: FnOnce(Option<&Document>) -> AppResult<Option<Map<String, Value>>>,
    {
        let (collection, id) = split_path(path)?;
        let now = now_timestamp();

        let tx = self.conn.unchecked_transaction()?;
        let current = load_document(&tx, path)?;
        match (&mode, current.as_ref()) {
            (WriteMode::Create, Some(_)) => {
                return Err(AppError::AlreadyExists(format!("{} already exists", path)))
            }
            (WriteMode::Update, None) => {
                return Err(AppError::not_found(format!("{} not found", path)))
            }
            _ => {}
        }

        let Some(patch) = build(current.as_ref())? else {
            return Ok(None);
        };
        let base = match mode {
            WriteMode::Create | WriteMode::Replace => None,
            WriteMode::Merge | WriteMode::Update => current.as_ref().map(|d| &d.data),
        };
        let data = apply_patch(base, &patch, &now)?;
        let created_at = current
            .as_ref()
            .map(|d| d.created_at.clone())
            .unwrap_or_else(|| now.clone());

        tx.execute(
            "INSERT INTO documents(path, collection, doc_id, data, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(path) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            (
                path,
                &collection,
                &id,
                serde_json::to_string(&data)?,
                &created_at,
                &now,
            ),
        )?;
        tx.commit()?;
        self.write_count += 1;

        let doc = Document {
            id,
            path: path.to_string(),
            data,
            created_at,
            updated_at: now,
        };
        self.notify(&collection);
        Ok(Some(doc))
    }

    fn notify(&mut self, collection: &str) {
        let conn = &self.conn;
        for (id, sub) in self.subscriptions.iter_mut() {
            if sub.query.collection != collection {
                continue;
            }
            match run_query(conn, &sub.query) {
                Ok(docs) => (sub.listener)(*id, docs.as_slice()),
                Err(e) => log::warn!("subscription {} refresh failed: {}", id, e),
            }
        }
    }
}

fn require_written(doc: Option<Document>) -> AppResult<Document> {
    doc.ok_or_else(|| AppError::Internal(anyhow::anyhow!("write was skipped")))
}

fn load_document(conn: &Connection, path: &str) -> AppResult<Option<Document>> {
    let row = conn
        .query_row(
            "SELECT doc_id, data, created_at, updated_at FROM documents WHERE path = ?",
            [path],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;
    match row {
        Some((id, data, created_at, updated_at)) => Ok(Some(Document {
            id,
            path: path.to_string(),
            data: serde_json::from_str(&data)?,
            created_at,
            updated_at,
        })),
        None => Ok(None),
    }
}

fn run_query(conn: &Connection, query: &Query) -> AppResult<Vec<Document>> {
    let mut stmt = conn.prepare(
        "SELECT path, doc_id, data, created_at, updated_at
         FROM documents
         WHERE collection = ?
         ORDER BY doc_id",
    )?;
    let rows = stmt
        .query_map([&query.collection], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut docs = Vec::with_capacity(rows.len());
    for (path, id, data, created_at, updated_at) in rows {
        let data: Value = serde_json::from_str(&data)?;
        if query.matches(&data) {
            docs.push(Document {
                id,
                path,
                data,
                created_at,
                updated_at,
            });
        }
    }

    if let Some((field, direction)) = &query.order_by {
        // Stable sort: ties keep document-id order.
        docs.sort_by(|a, b| {
            let o = compare_values(a.get(field), b.get(field));
            match direction {
                Direction::Asc => o,
                Direction::Desc => o.reverse(),
            }
        });
    }
    if let Some(n) = query.limit {
        docs.truncate(n);
    }
    Ok(docs)
}

pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(Value::Array(_)) => 4,
            Some(Value::Object(_)) => 5,
        }
    }
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn sentinel_op(value: &Value) -> Option<&str> {
    value
        .as_object()
        .and_then(|m| m.get(OP_KEY))
        .and_then(|v| v.as_str())
}

fn apply_patch(base: Option<&Value>, patch: &Map<String, Value>, now: &str) -> AppResult<Value> {
    let mut out = match base {
        Some(Value::Object(m)) => Value::Object(m.clone()),
        _ => Value::Object(Map::new()),
    };
    for (key, value) in patch {
        let segments: Vec<&str> = key.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(AppError::BadParams(format!("invalid field path: {:?}", key)));
        }
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| AppError::BadParams("empty field path".into()))?;
        let parent = ensure_object_at(&mut out, parents);
        if sentinel_op(value) == Some("delete") {
            parent.remove(*last);
            continue;
        }
        let resolved = resolve_value(value, parent.get(*last), now)?;
        parent.insert(last.to_string(), resolved);
    }
    Ok(out)
}

fn ensure_object_at<'a>(root: &'a mut Value, segments: &[&str]) -> &'a mut Map<String, Value> {
    let mut cur = root;
    for seg in segments {
        cur = coerce_object(cur)
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    coerce_object(cur)
}

fn coerce_object(v: &mut Value) -> &mut Map<String, Value> {
    if !v.is_object() {
        *v = Value::Object(Map::new());
    }
    match v {
        Value::Object(m) => m,
        _ => unreachable!("value was coerced to an object"),
    }
}

fn resolve_value(value: &Value, current: Option<&Value>, now: &str) -> AppResult<Value> {
    match sentinel_op(value) {
        Some("serverTimestamp") => Ok(Value::String(now.to_string())),
        Some("increment") => {
            let by = value
                .get("by")
                .filter(|v| v.is_number())
                .ok_or_else(|| AppError::BadParams("increment requires numeric by".into()))?;
            let base = current.filter(|v| v.is_number());
            match (base.and_then(|v| v.as_i64()), by.as_i64()) {
                (Some(a), Some(b)) => Ok(Value::from(a + b)),
                (None, Some(b)) if base.is_none() => Ok(Value::from(b)),
                _ => {
                    let a = base.and_then(|v| v.as_f64()).unwrap_or(0.0);
                    let b = by.as_f64().unwrap_or(0.0);
                    Ok(Value::from(a + b))
                }
            }
        }
        Some(op @ ("arrayUnion" | "arrayRemove")) => {
            let values = value
                .get("values")
                .and_then(|v| v.as_array())
                .ok_or_else(|| AppError::BadParams(format!("{} requires values", op)))?;
            let mut items = current
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            if op == "arrayUnion" {
                for v in values {
                    if !items.contains(v) {
                        items.push(v.clone());
                    }
                }
            } else {
                items.retain(|v| !values.contains(v));
            }
            Ok(Value::Array(items))
        }
        Some(other) => Err(AppError::BadParams(format!(
            "unsupported field transform: {}",
            other
        ))),
        None => match value {
            Value::Object(m) => {
                let mut out = Map::new();
                for (k, v) in m {
                    if sentinel_op(v) == Some("delete") {
                        continue;
                    }
                    let cur = current.and_then(|c| c.get(k));
                    out.insert(k.clone(), resolve_value(v, cur, now)?);
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|v| resolve_value(v, None, now))
                    .collect::<AppResult<Vec<_>>>()?,
            )),
            other => Ok(other.clone()),
        },
    }
}

/// Builds a patch map from `json!({...})` literals.
pub fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(m) => m,
        _ => Map::new(),
    }
}
