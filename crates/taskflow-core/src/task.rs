use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::datetime::iso_millis_serde;

pub const DEFAULT_PROJECT: &str = "personal";

#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
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
            "m" | "med" | "medium" => Ok(Priority::Medium),
            "h" | "high" => Ok(Priority::High),
            other => Err(anyhow!("invalid priority: {other} (expected low, medium or high)")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,

    pub text: String,

    #[serde(default)]
    pub completed: bool,

    #[serde(with = "iso_millis_serde")]
    pub created_at: DateTime<Utc>,

    #[serde(default, with = "iso_millis_serde::option")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub due_date: Option<NaiveDate>,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default = "default_project")]
    pub project: String,

    #[serde(
        default,
        with = "iso_millis_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// User-editable fields of a task, used both for creation and for edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDraft {
    pub text: String,
    pub due_date: Option<NaiveDate>,
    pub priority: Priority,
    pub project: String,
}

impl Default for TaskDraft {
    fn default() -> Self {
        Self {
            text: String::new(),
            due_date: None,
            priority: Priority::default(),
            project: default_project(),
        }
    }
}

impl TaskDraft {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Trimmed text, or `None` when nothing is left.
    pub fn trimmed_text(&self) -> Option<&str> {
        let text = self.text.trim();
        (!text.is_empty()).then_some(text)
    }
}

impl Task {
    pub fn new(id: String, text: String, draft: &TaskDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            text,
            completed: false,
            created_at: now,
            completed_at: None,
            due_date: draft.due_date,
            priority: draft.priority,
            project: draft.project.clone(),
            updated_at: None,
            extra: BTreeMap::new(),
        }
    }

    /// Sets the completion flag, keeping `completed_at` present exactly when
    /// the task is completed.
    pub fn set_completed(&mut self, completed: bool, now: DateTime<Utc>) {
        self.completed = completed;
        self.completed_at = completed.then_some(now);
    }

    pub fn apply_draft(&mut self, text: String, draft: &TaskDraft, now: DateTime<Utc>) {
        self.text = text;
        self.due_date = draft.due_date;
        self.priority = draft.priority;
        self.project = draft.project.clone();
        self.updated_at = Some(now);
    }
}

pub fn default_project() -> String {
    DEFAULT_PROJECT.to_string()
}

/// Creation-timestamp id in milliseconds, bumped past any id already taken.
pub fn next_task_id(now: DateTime<Utc>, existing: &[Task]) -> String {
    let mut candidate = now.timestamp_millis();
    while existing.iter().any(|task| task.id == candidate.to_string()) {
        candidate += 1;
    }
    candidate.to_string()
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::{Priority, Task, TaskDraft, next_task_id};

    fn fixed_now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 9, 30, 0)
            .single()
            .expect("valid now")
    }

    #[test]
    fn serializes_with_camel_case_wire_names() {
        let now = fixed_now();
        let mut draft = TaskDraft::new("Buy milk");
        draft.due_date = NaiveDate::from_ymd_opt(2026, 10, 20);
        draft.priority = Priority::High;
        let task = Task::new("1".to_string(), "Buy milk".to_string(), &draft, now);

        let value = serde_json::to_value(&task).expect("serialize");
        assert_eq!(value["id"], "1");
        assert_eq!(value["createdAt"], "2026-10-16T09:30:00.000Z");
        assert_eq!(value["dueDate"], "2026-10-20");
        assert_eq!(value["priority"], "high");
        assert_eq!(value["project"], "personal");
        assert!(value["completedAt"].is_null());
        assert!(value.get("updatedAt").is_none());
    }

    #[test]
    fn preserves_unknown_fields() {
        let raw = r#"{"id":"7","text":"x","completed":false,
            "createdAt":"2026-10-16T09:30:00.000Z","priority":"low",
            "project":"work","color":"red"}"#;
        let task: Task = serde_json::from_str(raw).expect("parse");
        assert_eq!(task.extra.get("color"), Some(&serde_json::json!("red")));

        let back = serde_json::to_value(&task).expect("serialize");
        assert_eq!(back["color"], "red");
    }

    #[test]
    fn set_completed_keeps_timestamp_in_sync() {
        let now = fixed_now();
        let mut task = Task::new("1".to_string(), "x".to_string(), &TaskDraft::new("x"), now);
        task.set_completed(true, now);
        assert_eq!(task.completed_at, Some(now));
        task.set_completed(false, now);
        assert_eq!(task.completed_at, None);
    }

    #[test]
    fn next_id_skips_taken_ids() {
        let now = fixed_now();
        let millis = now.timestamp_millis();
        let taken = Task::new(millis.to_string(), "x".to_string(), &TaskDraft::new("x"), now);
        assert_eq!(next_task_id(now, &[]), millis.to_string());
        assert_eq!(next_task_id(now, &[taken]), (millis + 1).to_string());
    }

    #[test]
    fn priority_parses_short_and_long_names() {
        assert_eq!("H".parse::<Priority>().expect("h"), Priority::High);
        assert_eq!("med".parse::<Priority>().expect("med"), Priority::Medium);
        assert!("urgent".parse::<Priority>().is_err());
    }
}
