use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_PRIORITY: i64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub done: bool,
    /// Sorted, deduplicated topic names.
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub due: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recurring: bool,
    #[serde(default)]
    pub recurrence_rule: String,
    #[serde(default)]
    pub recurrence_interval: i64,
    #[serde(default)]
    pub notes: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Returns display icon: x=done, .=open
    pub fn icon(&self) -> &'static str {
        if self.done {
            "x"
        } else {
            "."
        }
    }

    /// Tags split on commas for display; the stored form is free text.
    pub fn tag_list(&self) -> Vec<&str> {
        self.tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect()
    }
}

/// Full replacement for a task's descriptive fields, as written by
/// `ops::update_metadata`.
#[derive(Debug, Clone, Default)]
pub struct TaskMetadata {
    /// Comma separated topic names.
    pub topics: String,
    pub tags: String,
    pub priority: i64,
    pub due: Option<DateTime<Utc>>,
    pub start: Option<DateTime<Utc>>,
    pub recurring: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicSummary {
    pub name: String,
    pub open: i64,
    pub total: i64,
    pub has_note: bool,
}

pub fn clamp_priority(priority: i64) -> i64 {
    priority.clamp(0, MAX_PRIORITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_fields_default_when_missing() {
        let json = r#"{"id": 7, "title": "old", "done": false, "created_at": "2024-01-01T00:00:00Z"}"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert!(task.topics.is_empty());
        assert!(task.due.is_none());
        assert_eq!(task.priority, 0);
        assert_eq!(task.notes, "");
    }

    #[test]
    fn tag_list_splits_on_commas() {
        let json = r#"{"id": 1, "title": "t", "done": false, "tags": "a, b,,c ", "created_at": "2024-01-01T00:00:00Z"}"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.tag_list(), vec!["a", "b", "c"]);
    }

    #[test]
    fn priority_clamps() {
        assert_eq!(clamp_priority(99), 5);
        assert_eq!(clamp_priority(-7), 0);
        assert_eq!(clamp_priority(3), 3);
    }
}
