use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

pub const DEFAULT_LIST_ID: &str = "inbox";
pub const DEFAULT_LIST_NAME: &str = "Inbox";
pub const DEFAULT_LIST_COLOR: &str = "#667eea";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l" | "low" => Ok(Priority::Low),
            "m" | "medium" => Ok(Priority::Medium),
            "h" | "high" => Ok(Priority::High),
            other => Err(anyhow!("invalid priority: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub priority: Priority,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    pub list_id: String,
}

impl Task {
    /// `text` is expected to be trimmed and non-empty already.
    pub fn new(text: String, priority: Priority, list_id: String, now: DateTime<Utc>) -> Self {
        Self {
            id: new_record_id(),
            text,
            done: false,
            priority,
            created_at: truncate_to_millis(now),
            list_id,
        }
    }

    /// Rebuilds a task from a stored record, filling in defaults for
    /// absent or malformed fields. Returns `None` for non-object values.
    pub fn from_stored(raw: &Value, now: DateTime<Utc>) -> Option<Self> {
        let obj = raw.as_object()?;

        let id = match obj.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => new_record_id(),
        };
        let text = obj
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let done = obj.get("done").map(is_truthy).unwrap_or(false);
        let priority = obj
            .get("priority")
            .and_then(Value::as_str)
            .and_then(|p| serde_json::from_value(Value::String(p.to_string())).ok())
            .unwrap_or_default();
        let created_at = obj
            .get("createdAt")
            .and_then(Value::as_f64)
            .and_then(|ms| DateTime::from_timestamp_millis(ms as i64))
            .unwrap_or_else(|| truncate_to_millis(now));
        let list_id = obj
            .get("listId")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_LIST_ID)
            .to_string();

        Some(Self {
            id,
            text,
            done,
            priority,
            created_at,
            list_id,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TodoList {
    pub id: String,
    pub name: String,
    pub color: String,
}

impl TodoList {
    pub fn inbox() -> Self {
        Self {
            id: DEFAULT_LIST_ID.to_string(),
            name: DEFAULT_LIST_NAME.to_string(),
            color: DEFAULT_LIST_COLOR.to_string(),
        }
    }

    pub fn new(name: String, color: String) -> Self {
        Self {
            id: new_record_id(),
            name,
            color,
        }
    }

    pub fn from_stored(raw: &Value) -> Option<Self> {
        let obj = raw.as_object()?;
        let id = match obj.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return None,
        };
        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(id.as_str())
            .to_string();
        let color = obj
            .get("color")
            .and_then(Value::as_str)
            .filter(|c| is_hex_color(c))
            .unwrap_or(DEFAULT_LIST_COLOR)
            .to_string();
        Some(Self { id, name, color })
    }
}

/// Decodes a persisted task array. Anything that is not a JSON array loads
/// as an empty collection.
pub fn decode_tasks(payload: &str, now: DateTime<Utc>) -> anyhow::Result<Vec<Task>> {
    let parsed: Value = serde_json::from_str(payload)?;
    let Value::Array(items) = parsed else {
        warn!("stored tasks were not an array; starting empty");
        return Ok(vec![]);
    };

    let mut out = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        match Task::from_stored(item, now) {
            Some(task) => out.push(task),
            None => warn!(index = idx, "skipping non-object task record"),
        }
    }
    Ok(out)
}

/// Decodes a persisted list array. Only `[]` decodes to an empty
/// collection; a non-array payload, or an array none of whose records are
/// usable, is an error so callers never mistake it for missing data.
pub fn decode_lists(payload: &str) -> anyhow::Result<Vec<TodoList>> {
    let parsed: Value = serde_json::from_str(payload)?;
    let Value::Array(items) = parsed else {
        bail!("stored lists are not an array");
    };

    let mut out = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        match TodoList::from_stored(item) {
            Some(list) => out.push(list),
            None => warn!(index = idx, "skipping malformed list record"),
        }
    }
    if out.is_empty() && !items.is_empty() {
        bail!("none of the {} stored list records are usable", items.len());
    }
    Ok(out)
}

pub fn is_hex_color(s: &str) -> bool {
    let Some(hex) = s.strip_prefix('#') else {
        return false;
    };
    matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit())
}

/// Time-ordered unique identifier (UUID v7).
pub fn new_record_id() -> String {
    Uuid::now_v7().to_string()
}

pub fn truncate_to_millis(dt: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(dt.timestamp_millis()).unwrap_or(dt)
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).expect("valid timestamp")
    }

    #[test]
    fn stored_task_defaults_fill_missing_fields() {
        let task = Task::from_stored(&json!({"id": 42, "text": "legacy"}), now())
            .expect("object record");
        assert_eq!(task.id, "42");
        assert!(!task.done);
        assert_eq!(task.priority, Priority::Medium);
        assert_eq!(task.created_at, now());
        assert_eq!(task.list_id, DEFAULT_LIST_ID);
    }

    #[test]
    fn stored_task_rejects_unknown_priority_and_bad_timestamp() {
        let task = Task::from_stored(
            &json!({
                "id": "a",
                "text": "x",
                "priority": "urgent",
                "createdAt": "yesterday",
                "done": 1
            }),
            now(),
        )
        .expect("object record");
        assert_eq!(task.priority, Priority::Medium);
        assert_eq!(task.created_at, now());
        assert!(task.done);
    }

    #[test]
    fn serialized_task_uses_camel_case_and_epoch_millis() {
        let task = Task {
            id: "1".to_string(),
            text: "Buy milk".to_string(),
            done: false,
            priority: Priority::High,
            created_at: now(),
            list_id: "inbox".to_string(),
        };
        let value = serde_json::to_value(&task).expect("serialize");
        assert_eq!(
            value,
            json!({
                "id": "1",
                "text": "Buy milk",
                "done": false,
                "priority": "high",
                "createdAt": 1_700_000_000_000_i64,
                "listId": "inbox"
            })
        );
    }

    #[test]
    fn decode_tasks_tolerates_non_array_and_junk_elements() {
        assert!(decode_tasks("{\"a\":1}", now()).expect("valid json").is_empty());
        let tasks = decode_tasks("[1, {\"id\":\"x\",\"text\":\"ok\"}]", now()).expect("valid json");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].text, "ok");
        assert!(decode_tasks("not json", now()).is_err());
    }

    #[test]
    fn decode_lists_separates_empty_from_unusable() {
        assert!(decode_lists("[]").expect("empty array").is_empty());
        assert!(decode_lists(r#"[{"name":"Work"},{"name":"Home"}]"#).is_err());
        assert!(decode_lists(r#"{"id":"inbox"}"#).is_err());

        let lists = decode_lists(r#"[{"name":"Nameless"},{"id":"work","name":"Work","color":"red"}]"#)
            .expect("one usable record");
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].color, DEFAULT_LIST_COLOR);
    }

    #[test]
    fn hex_colors() {
        assert!(is_hex_color("#fff"));
        assert!(is_hex_color("#667eea"));
        assert!(!is_hex_color("667eea"));
        assert!(!is_hex_color("#66"));
        assert!(!is_hex_color("#gggggg"));
    }

    #[test]
    fn priority_parses_short_forms() {
        assert_eq!("H".parse::<Priority>().expect("parse"), Priority::High);
        assert_eq!("low".parse::<Priority>().expect("parse"), Priority::Low);
        assert!("urgent".parse::<Priority>().is_err());
    }
}
