use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::datetime::{DATE_FORMAT, format_date, iso_millis_serde};
use crate::task::{Priority, Task, default_project, next_task_id};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("invalid file format: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid file format: expected a JSON array of tasks")]
    NotAnArray,

    #[error("invalid task at position {index}: {reason}")]
    Record { index: usize, reason: String },
}

/// Serialized snapshot of a collection, ready to be written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub file_name: String,
    pub contents: String,
}

pub fn export_file_name(today: NaiveDate) -> String {
    format!("taskflow-backup-{}.json", format_date(today))
}

pub fn export_tasks(tasks: &[Task], today: NaiveDate) -> anyhow::Result<Export> {
    Ok(Export {
        file_name: export_file_name(today),
        contents: serde_json::to_string_pretty(tasks)?,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportTask {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    completed: Option<bool>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    completed_at: Option<String>,
    #[serde(default)]
    due_date: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

/// Parses an exported collection.
///
/// Records are coerced into valid tasks: missing optional fields take their
/// defaults, `completedAt` is reconciled with `completed`, and missing or
/// repeated ids are replaced. A record without text, or with a field that
/// cannot be read, rejects the whole payload.
#[tracing::instrument(skip(raw))]
pub fn parse_import(raw: &str, now: DateTime<Utc>) -> Result<Vec<Task>, ImportError> {
    let value: Value = serde_json::from_str(raw.trim())?;
    let Value::Array(items) = value else {
        return Err(ImportError::NotAnArray);
    };

    let mut out: Vec<Task> = Vec::with_capacity(items.len());
    let mut seen_ids = BTreeSet::new();
    for (index, item) in items.into_iter().enumerate() {
        let record: ImportTask = serde_json::from_value(item).map_err(|err| ImportError::Record {
            index,
            reason: err.to_string(),
        })?;
        let mut task = normalize_import_item(record, now)
            .map_err(|reason| ImportError::Record { index, reason })?;

        if task.id.is_empty() || seen_ids.contains(&task.id) {
            let fresh = next_task_id(now, &out);
            if !task.id.is_empty() {
                warn!(index, old = %task.id, new = %fresh, "duplicate id in import; reassigned");
            }
            task.id = fresh;
        }
        seen_ids.insert(task.id.clone());
        out.push(task);
    }

    debug!(count = out.len(), "parsed import payload");
    Ok(out)
}

fn normalize_import_item(row: ImportTask, now: DateTime<Utc>) -> Result<Task, String> {
    let id = match row.id {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(id)) => id.trim().to_string(),
        Some(Value::Number(id)) => id.to_string(),
        Some(other) => return Err(format!("id must be a string, got {other}")),
    };

    let text = row.text.unwrap_or_default();
    if text.trim().is_empty() {
        return Err("task text is empty".to_string());
    }

    let created_at = parse_timestamp("createdAt", row.created_at.as_deref())?.unwrap_or(now);
    let completed = row.completed.unwrap_or(false);
    let completed_at = if completed {
        Some(parse_timestamp("completedAt", row.completed_at.as_deref())?.unwrap_or(now))
    } else {
        None
    };

    let due_date = match row.due_date.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            NaiveDate::parse_from_str(raw, DATE_FORMAT)
                .map_err(|err| format!("dueDate '{raw}': {err}"))?,
        ),
    };

    let priority = match row.priority.as_deref() {
        None => Priority::default(),
        Some(raw) => raw.parse::<Priority>().map_err(|err| err.to_string())?,
    };

    Ok(Task {
        id,
        text,
        completed,
        created_at,
        completed_at,
        due_date,
        priority,
        project: row.project.unwrap_or_else(default_project),
        updated_at: parse_timestamp("updatedAt", row.updated_at.as_deref())?,
        extra: row.extra,
    })
}

fn parse_timestamp(field: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, String> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => iso_millis_serde::parse(raw)
            .map(Some)
            .map_err(|err| format!("{field} '{raw}': {err}")),
    }
}
