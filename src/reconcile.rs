//! Reconciliation controller.
//!
//! The only code path that writes tasks. Every mutation runs under the
//! task's lock and follows the same shape: validate, write the store, then
//! bring the dispatcher in line (cancel, and schedule again if the task
//! still wants a reminder). A failed write stops the sequence before the
//! dispatcher is touched; a failed reminder never undoes a write.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::dispatcher::ReminderDispatcher;
use crate::error::{EngineError, ReminderWarning, Result};
use crate::logic::{derive_status, reminder_due};
use crate::models::{Task, TaskDraft, TaskId, TaskStatus};
use crate::store::TaskStore;

/// A task as persisted by a mutation, plus any reminder problem.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reconciled {
    pub task: Task,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<ReminderWarning>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RestoreReport {
    pub tasks: usize,
    pub status_changes: usize,
    pub armed: usize,
    pub warnings: usize,
    pub failures: usize,
}

pub struct ReconciliationController {
    store: Arc<dyn TaskStore>,
    dispatcher: ReminderDispatcher,
    clock: Arc<dyn Clock>,
    default_category: String,
}

fn validate(task: &Task) -> Result<()> {
    if task.title.trim().is_empty() {
        return Err(EngineError::Validation("title required".into()));
    }
    if let Some(at) = task.scheduled_time {
        if at.timestamp_millis() <= 0 {
            return Err(EngineError::Validation(format!(
                "invalid scheduled time {}",
                at.to_rfc3339()
            )));
        }
    }
    Ok(())
}

// Status to store after a write: Completed is kept, anything else is
// re-derived from the (new) scheduled time.
fn settle_status(task: &mut Task, now: DateTime<Utc>) {
    task.status = derive_status(task.scheduled_time, now, task.status);
}

impl ReconciliationController {
    pub fn new(
        store: Arc<dyn TaskStore>,
        dispatcher: ReminderDispatcher,
        clock: Arc<dyn Clock>,
        default_category: impl Into<String>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
            default_category: default_category.into(),
        }
    }

    pub async fn on_insert(&self, draft: TaskDraft) -> Result<Reconciled> {
        let mut task = Task::from_draft(draft, &self.default_category);
        validate(&task)?;

        let now = self.clock.now();
        task.status = derive_status(task.scheduled_time, now, TaskStatus::Upcoming);
        task.id = self.store.insert(task.clone()).await?;

        // Nobody else can know the id yet, but hold it like every other path.
        let _guard = self.dispatcher.lock_task(task.id).await;
        let warning = self.arm(&task, now).await;

        info!(task_id = task.id, status = ?task.status, "task created");
        Ok(Reconciled { task, warning })
    }

    /// Replace a task wholesale with `task` (matched by id).
    pub async fn on_update(&self, mut task: Task) -> Result<Reconciled> {
        validate(&task)?;
        let _guard = self.dispatcher.lock_task(task.id).await;

        let now = self.clock.now();
        settle_status(&mut task, now);
        self.write_and_resync(task, now).await
    }

    /// Apply user edits to a stored task. `status` is kept when `None`.
    pub async fn on_edit(
        &self,
        id: TaskId,
        draft: TaskDraft,
        status: Option<TaskStatus>,
    ) -> Result<Reconciled> {
        let _guard = self.dispatcher.lock_task(id).await;
        let current = self.store.get(id).await?.ok_or(EngineError::NotFound(id))?;

        let mut task = Task::from_draft(draft, &self.default_category);
        task.id = id;
        task.status = status.unwrap_or(current.status);
        validate(&task)?;

        let now = self.clock.now();
        settle_status(&mut task, now);
        self.write_and_resync(task, now).await
    }

    pub async fn on_delete(&self, id: TaskId) -> Result<()> {
        let _guard = self.dispatcher.lock_task(id).await;

        // Cancel first: once the record is gone nothing may fire for it.
        self.dispatcher.cancel(id).await;
        if !self.store.delete(id).await? {
            return Err(EngineError::NotFound(id));
        }

        info!(task_id = id, "task deleted");
        Ok(())
    }

    pub async fn on_status_toggle(&self, id: TaskId, requested: TaskStatus) -> Result<Reconciled> {
        let _guard = self.dispatcher.lock_task(id).await;
        let mut task = self.store.get(id).await?.ok_or(EngineError::NotFound(id))?;

        let now = self.clock.now();
        task.status = match requested {
            TaskStatus::Completed => TaskStatus::Completed,
            other => derive_status(task.scheduled_time, now, other),
        };
        self.write_and_resync(task, now).await
    }

    /// A timer went off: move the task on from Upcoming.
    ///
    /// Returns the task if its stored status changed.
    pub async fn on_timer_fired(&self, id: TaskId) -> Result<Option<Task>> {
        let _guard = self.dispatcher.lock_task(id).await;
        let Some(mut task) = self.store.get(id).await? else {
            debug!(task_id = id, "timer fired for a task that no longer exists");
            return Ok(None);
        };

        let now = self.clock.now();
        let before = task.status;
        settle_status(&mut task, now);
        if task.status == before {
            return Ok(None);
        }

        self.store.update(&task).await?;
        info!(task_id = id, from = ?before, to = ?task.status, "status advanced by timer");
        Ok(Some(task))
    }

    /// Bring every stored task and its timer back in line, e.g. after a
    /// restart. A failure on one task does not stop the others.
    pub async fn restore(&self) -> Result<RestoreReport> {
        let tasks = self.store.list().await?;
        let mut report = RestoreReport {
            tasks: tasks.len(),
            ..Default::default()
        };

        for listed in tasks {
            let id = listed.id;
            let _guard = self.dispatcher.lock_task(id).await;
            // re-read under the lock; the listing may be stale by now
            let mut task = match self.store.get(id).await {
                Ok(Some(task)) => task,
                Ok(None) => continue,
                Err(e) => {
                    error!(task_id = id, error = %e, "could not reload task");
                    report.failures += 1;
                    continue;
                }
            };
            let now = self.clock.now();

            let before = task.status;
            settle_status(&mut task, now);
            if task.status != before {
                if let Err(e) = self.store.update(&task).await {
                    error!(task_id = id, error = %e, "could not persist derived status");
                    report.failures += 1;
                    continue;
                }
                report.status_changes += 1;
            }

            self.dispatcher.cancel(id).await;
            let wants_timer = reminder_due(&task, now).is_some();
            match self.arm(&task, now).await {
                Some(_) => report.warnings += 1,
                None if wants_timer => report.armed += 1,
                None => {}
            }
        }

        info!(
            tasks = report.tasks,
            armed = report.armed,
            status_changes = report.status_changes,
            "reminders restored"
        );
        Ok(report)
    }

    // Caller holds the task lock.
    async fn write_and_resync(&self, task: Task, now: DateTime<Utc>) -> Result<Reconciled> {
        self.store.update(&task).await?;

        self.dispatcher.cancel(task.id).await;
        let warning = self.arm(&task, now).await;

        info!(task_id = task.id, status = ?task.status, "task updated");
        Ok(Reconciled { task, warning })
    }

    // Schedule the task's reminder if it should have one.
    async fn arm(&self, task: &Task, now: DateTime<Utc>) -> Option<ReminderWarning> {
        let fire_at = reminder_due(task, now)?;
        match self
            .dispatcher
            .schedule(task.id, &task.title, &task.details, fire_at)
            .await
        {
            Ok(()) => None,
            Err(err) => {
                warn!(task_id = task.id, error = %err, "reminder not scheduled");
                ReminderWarning::from_schedule_error(err)
            }
        }
    }
}
