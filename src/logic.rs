/*
Status derivation and read-side views.
Module was independently written from HTTP / Axum for testing.
Nothing here touches the store or the timers.
*/

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Deserializer};
use tokio::sync::watch;

use crate::clock::Clock;
use crate::models::{Task, TaskStatus};

// Longest the live view waits before re-reading the wall clock.
const MAX_IDLE: Duration = Duration::from_secs(60);

// Time-driven status of a task.
//
// Rules:
// - Completed stays Completed
// - A reminder still in the future -> Upcoming
// - Otherwise (no reminder, or its moment has passed) -> Active
pub fn derive_status(
    scheduled_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    current: TaskStatus,
) -> TaskStatus {
    if current == TaskStatus::Completed {
        return TaskStatus::Completed;
    }
    match scheduled_time {
        Some(at) if at > now => TaskStatus::Upcoming,
        _ => TaskStatus::Active,
    }
}

// Status as of `now`. The stored value can lag behind when no timer was
// armed for the task, so readers go through this instead.
pub fn current_status(task: &Task, now: DateTime<Utc>) -> TaskStatus {
    derive_status(task.scheduled_time, now, task.status)
}

// Copy of `tasks` with every status brought up to `now`.
pub fn with_current_status(tasks: &[Task], now: DateTime<Utc>) -> Vec<Task> {
    tasks
        .iter()
        .map(|t| Task {
            status: current_status(t, now),
            ..t.clone()
        })
        .collect()
}

// Whether a task should have a pending timer right now.
pub fn reminder_due(task: &Task, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if task.is_completed() {
        return None;
    }
    task.scheduled_time.filter(|at| *at > now)
}

fn matches_query(task: &Task, needle: &str) -> bool {
    task.title.to_lowercase().contains(needle)
        || task.details.to_lowercase().contains(needle)
        || task.category.to_lowercase().contains(needle)
}

// Case-insensitive substring match on title, details or category.
// A blank query keeps everything, in order.
pub fn filter_tasks(tasks: &[Task], query: &str) -> Vec<Task> {
    if query.trim().is_empty() {
        return tasks.to_vec();
    }
    let needle = query.to_lowercase();
    tasks
        .iter()
        .filter(|t| matches_query(t, &needle))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UpcomingQuery {
    #[serde(default, alias = "q")]
    pub query: String,
    #[serde(default)]
    pub sort_by_priority: bool,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub limit: Option<usize>,
}

// `?limit=` means no limit.
fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)?.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

// Tasks still upcoming at `now`, filtered, sorted and truncated.
//
// Sorting rules:
// 1) by priority (Urgent first) when requested
// 2) then by scheduled time, earliest first
// 3) stable, so ties keep snapshot order
pub fn upcoming_tasks(tasks: &[Task], params: &UpcomingQuery, now: DateTime<Utc>) -> Vec<Task> {
    let mut upcoming: Vec<Task> = filter_tasks(tasks, &params.query)
        .into_iter()
        .filter(|t| current_status(t, now) == TaskStatus::Upcoming)
        .collect();

    // Upcoming always carries a time, but never trust that for ordering.
    let time_key = |t: &Task| (t.scheduled_time.is_none(), t.scheduled_time);
    if params.sort_by_priority {
        upcoming.sort_by_key(|t| (t.priority, time_key(t)));
    } else {
        upcoming.sort_by_key(time_key);
    }

    if let Some(limit) = params.limit {
        upcoming.truncate(limit);
    }
    upcoming
}

pub fn categories(tasks: &[Task]) -> Vec<String> {
    tasks
        .iter()
        .map(|t| t.category.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

// "Pay rent - Scheduled for: Mar 01, 2026 09:30 AM"
pub fn widget_line(task: &Task, offset: FixedOffset) -> String {
    match task.scheduled_time {
        Some(at) => format!(
            "{} - Scheduled for: {}",
            task.title,
            at.with_timezone(&offset).format("%b %d, %Y %I:%M %p")
        ),
        None => task.title.clone(),
    }
}

// Upcoming view that follows the store: recomputed from scratch on every
// new snapshot, and again whenever an upcoming task's time passes.
pub struct LiveUpcoming {
    rx: watch::Receiver<Vec<Task>>,
    params: UpcomingQuery,
    clock: Arc<dyn Clock>,
}

impl LiveUpcoming {
    pub fn new(
        rx: watch::Receiver<Vec<Task>>,
        params: UpcomingQuery,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { rx, params, clock }
    }

    pub fn current(&mut self) -> Vec<Task> {
        let now = self.clock.now();
        let tasks = self.rx.borrow_and_update();
        upcoming_tasks(&tasks, &self.params, now)
    }

    // Next recomputation: a new snapshot, or the earliest upcoming time
    // passing. None once the store is gone.
    pub async fn changed(&mut self) -> Option<Vec<Task>> {
        match self.until_next_expiry() {
            Some(wait) => {
                tokio::select! {
                    res = self.rx.changed() => res.ok()?,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            None => self.rx.changed().await.ok()?,
        }
        Some(self.current())
    }

    fn until_next_expiry(&self) -> Option<Duration> {
        let now = self.clock.now();
        let next = self
            .rx
            .borrow()
            .iter()
            .filter(|t| current_status(t, now) == TaskStatus::Upcoming)
            .filter_map(|t| t.scheduled_time)
            .min()?;
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        Some(wait.min(MAX_IDLE))
    }
}
