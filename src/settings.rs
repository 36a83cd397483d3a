use crate::comments::OrphanPolicy;
use crate::db;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Section {
    Comments,
    Uploads,
    Assignments,
    Chat,
}

pub const ALL_SECTIONS: [Section; 4] = [
    Section::Comments,
    Section::Uploads,
    Section::Assignments,
    Section::Chat,
];

impl Section {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "comments" => Some(Self::Comments),
            "uploads" => Some(Self::Uploads),
            "assignments" => Some(Self::Assignments),
            "chat" => Some(Self::Chat),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Comments => "comments",
            Self::Uploads => "uploads",
            Self::Assignments => "assignments",
            Self::Chat => "chat",
        }
    }

    fn key(self) -> String {
        format!("setup.{}", self.name())
    }
}

fn default_section(section: Section) -> Value {
    match section {
        Section::Comments => json!({
            "orphanPolicy": "drop",
            "maxIndentDepth": 4
        }),
        Section::Uploads => json!({
            "maxBytes": 20 * 1024 * 1024,
            "pathTimestamp": true
        }),
        Section::Assignments => json!({
            "defaultTotalPoints": 100,
            "sortByDueDate": true
        }),
        Section::Chat => json!({
            "maxMessageChars": 2000
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

pub fn merge_section_patch(
    section: Section,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            Section::Comments => match k.as_str() {
                "orphanPolicy" => {
                    let p = v
                        .as_str()
                        .map(|s| s.trim().to_ascii_lowercase())
                        .ok_or_else(|| format!("{} must be string", k))?;
                    if OrphanPolicy::parse(&p).is_none() {
                        return Err("orphanPolicy must be one of: drop, promote".into());
                    }
                    obj.insert(k.clone(), Value::String(p));
                }
                "maxIndentDepth" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 12)?));
                }
                _ => return Err(format!("unknown comments field: {}", k)),
            },
            Section::Uploads => match k.as_str() {
                "maxBytes" => {
                    let n = parse_i64_range(v, k, 1024, 100 * 1024 * 1024)?;
                    obj.insert(k.clone(), Value::from(n));
                }
                "pathTimestamp" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown uploads field: {}", k)),
            },
            Section::Assignments => match k.as_str() {
                "defaultTotalPoints" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 1000)?));
                }
                "sortByDueDate" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown assignments field: {}", k)),
            },
            Section::Chat => match k.as_str() {
                "maxMessageChars" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 10000)?));
                }
                _ => return Err(format!("unknown chat field: {}", k)),
            },
        }
    }
    Ok(())
}

pub fn load_section(conn: &Connection, section: Section) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, &section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults field by field.
            if let Err(e) = merge_section_patch(section, &mut current, saved_obj) {
                log::warn!("ignoring stored {} settings: {}", section.name(), e);
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

pub fn save_section(conn: &Connection, section: Section, value: &Value) -> anyhow::Result<()> {
    db::settings_set_json(conn, &section.key(), value)
}

/// Typed view over all sections, read fresh for each request that needs it.
#[derive(Debug, Clone)]
pub struct Settings {
    pub orphan_policy: OrphanPolicy,
    pub max_indent_depth: usize,
    pub upload_max_bytes: u64,
    pub upload_path_timestamp: bool,
    pub default_total_points: i64,
    pub sort_by_due_date: bool,
    pub max_message_chars: usize,
}

impl Settings {
    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        let comments = load_section(conn, Section::Comments)?;
        let uploads = load_section(conn, Section::Uploads)?;
        let assignments = load_section(conn, Section::Assignments)?;
        let chat = load_section(conn, Section::Chat)?;
        Ok(Self {
            orphan_policy: comments
                .get("orphanPolicy")
                .and_then(|v| v.as_str())
                .and_then(OrphanPolicy::parse)
                .unwrap_or(OrphanPolicy::Drop),
            max_indent_depth: comments
                .get("maxIndentDepth")
                .and_then(|v| v.as_u64())
                .unwrap_or(4) as usize,
            upload_max_bytes: uploads
                .get("maxBytes")
                .and_then(|v| v.as_u64())
                .unwrap_or(20 * 1024 * 1024),
            upload_path_timestamp: uploads
                .get("pathTimestamp")
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
            default_total_points: assignments
                .get("defaultTotalPoints")
                .and_then(|v| v.as_i64())
                .unwrap_or(100),
            sort_by_due_date: assignments
                .get("sortByDueDate")
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
            max_message_chars: chat
                .get("maxMessageChars")
                .and_then(|v| v.as_u64())
                .unwrap_or(2000) as usize,
        })
    }
}
