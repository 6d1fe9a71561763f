use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type TaskId = i64;

pub const DEFAULT_CATEGORY: &str = "General";

// Current layout of data/db.json
pub const DB_VERSION: u32 = 3;

// Declaration order is the sort order: Urgent first.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[serde(alias = "URGENT")]
    Urgent,
    #[serde(alias = "HIGH")]
    High,
    #[default]
    #[serde(alias = "MEDIUM")]
    Medium,
    #[serde(alias = "LOW")]
    Low,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[serde(alias = "UPCOMING")]
    Upcoming,
    // older records used PENDING / IN_PROGRESS for anything not yet done
    #[default]
    #[serde(alias = "ACTIVE", alias = "PENDING", alias = "IN_PROGRESS", alias = "pending", alias = "in_progress")]
    Active,
    #[serde(alias = "COMPLETED")]
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub details: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, alias = "scheduledTimeMillis", with = "scheduled_time")]
    pub scheduled_time: Option<DateTime<Utc>>, // None = no reminder
    #[serde(default)]
    pub status: TaskStatus,
}

impl Task {
    // id 0 means "not persisted yet"; the store assigns the real one.
    pub fn from_draft(draft: TaskDraft, default_category: &str) -> Self {
        let category = draft
            .category
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| default_category.to_string());

        Task {
            id: 0,
            title: draft.title,
            details: draft.details.unwrap_or_default(),
            category,
            priority: draft.priority.unwrap_or_default(),
            scheduled_time: draft.scheduled_time,
            status: TaskStatus::Upcoming,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

// User-editable fields of a task, as submitted by the UI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    pub details: Option<String>,
    pub category: Option<String>,
    pub priority: Option<Priority>,
    pub scheduled_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Db {
    #[serde(default = "default_db_version")]
    pub version: u32,
    #[serde(default)]
    pub next_id: TaskId,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Default for Db {
    fn default() -> Self {
        Db {
            version: DB_VERSION,
            next_id: 1,
            tasks: Vec::new(),
        }
    }
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

fn default_db_version() -> u32 {
    DB_VERSION
}

// Scheduled time is written as RFC3339. Older files stored epoch millis,
// and 0 meant "unset".
mod scheduled_time {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(DateTime<Utc>),
    }

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_str(&dt.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<Raw> = Option::deserialize(deserializer)?;
        Ok(match raw {
            None | Some(Raw::Millis(0)) => None,
            Some(Raw::Millis(ms)) => DateTime::from_timestamp_millis(ms),
            Some(Raw::Text(dt)) => Some(dt),
        })
    }
}
