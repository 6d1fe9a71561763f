//! Reminder dispatcher.
//!
//! Turns "remind me about task N at T" into exactly one pending timer in the
//! facility, or none. Also hands out the per-task locks that keep every
//! cancel/schedule sequence for one task in program order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::clock::Clock;
use crate::error::ScheduleError;
use crate::models::TaskId;
use crate::notify::ReminderPayload;
use crate::timer::{TimerFacility, TimerKey};

/// Held while a mutation sequence for one task is in flight.
pub struct TaskGuard {
    _guard: OwnedMutexGuard<()>,
}

// One async mutex per task id, created on demand and dropped once unused.
#[derive(Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<TaskId, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    async fn acquire(&self, id: TaskId) -> TaskGuard {
        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            // only the map holds these, nobody is waiting on them
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(id).or_default())
        };
        TaskGuard {
            _guard: lock.lock_owned().await,
        }
    }

    #[cfg(test)]
    fn live(&self) -> usize {
        self.locks.lock().unwrap().len()
    }
}

pub struct ReminderDispatcher {
    facility: Arc<dyn TimerFacility>,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks,
}

impl ReminderDispatcher {
    pub fn new(facility: Arc<dyn TimerFacility>, clock: Arc<dyn Clock>) -> Self {
        Self {
            facility,
            clock,
            locks: KeyedLocks::default(),
        }
    }

    /// Wait until no other sequence holds `task_id`, then hold it.
    pub async fn lock_task(&self, task_id: TaskId) -> TaskGuard {
        self.locks.acquire(task_id).await
    }

    /// Arm the reminder for `task_id`, replacing any earlier one.
    ///
    /// Refuses times that are not strictly in the future.
    pub async fn schedule(
        &self,
        task_id: TaskId,
        title: &str,
        message: &str,
        fire_at: DateTime<Utc>,
    ) -> Result<(), ScheduleError> {
        let now = self.clock.now();
        if fire_at <= now {
            return Err(ScheduleError::PastDeadline { fire_at, now });
        }

        let payload = ReminderPayload {
            task_id,
            title: title.to_string(),
            message: message.to_string(),
        };
        self.facility
            .register_one_shot(TimerKey::for_task(task_id), fire_at, payload)
            .await?;

        debug!(task_id, %fire_at, "reminder scheduled");
        Ok(())
    }

    /// Remove any pending reminder for `task_id`. No-op if none.
    pub async fn cancel(&self, task_id: TaskId) {
        self.facility.cancel(TimerKey::for_task(task_id)).await;
        debug!(task_id, "reminder cancelled");
    }
}
