/*
One-shot timer facility.
Plays the part of the platform alarm service: a registration table keyed by
TimerKey, where registering an existing key replaces the earlier timer.
*/

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::clock::Clock;
use crate::error::FacilityError;
use crate::models::TaskId;
use crate::notify::{NotificationSink, Permission, Permissions, ReminderPayload};

// Longest single sleep. The wall clock is re-read after each one, so a clock
// change is noticed within this window.
const MAX_SLEEP: Duration = Duration::from_secs(60);

/// Identity of a task's timer in the facility.
///
/// Reinterprets the full 64-bit id, so distinct ids never share a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TimerKey(u64);

impl TimerKey {
    pub fn for_task(id: TaskId) -> Self {
        TimerKey(id as u64)
    }

    pub fn task_id(self) -> TaskId {
        self.0 as TaskId
    }
}

#[async_trait]
pub trait TimerFacility: Send + Sync {
    /// Arm a timer, replacing any registration under the same key.
    async fn register_one_shot(
        &self,
        key: TimerKey,
        fire_at: DateTime<Utc>,
        payload: ReminderPayload,
    ) -> Result<(), FacilityError>;

    /// Drop the registration under `key`, if any.
    async fn cancel(&self, key: TimerKey);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingTimer {
    pub key: TimerKey,
    pub fire_at: DateTime<Utc>,
    pub task_id: TaskId,
}

struct Registration {
    generation: u64,
    fire_at: DateTime<Utc>,
    handle: AbortHandle,
}

struct Inner {
    registrations: Mutex<HashMap<TimerKey, Registration>>,
    permissions: Arc<Permissions>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    max_pending: usize,
    next_generation: AtomicU64,
}

impl Inner {
    fn registrations(&self) -> MutexGuard<'_, HashMap<TimerKey, Registration>> {
        match self.registrations.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// In-process facility: one tokio task per pending timer.
#[derive(Clone)]
pub struct TokioTimerFacility {
    inner: Arc<Inner>,
}

impl TokioTimerFacility {
    pub fn new(
        permissions: Arc<Permissions>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        max_pending: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registrations: Mutex::new(HashMap::new()),
                permissions,
                sink,
                clock,
                max_pending: max_pending.max(1),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    pub fn pending(&self) -> Vec<PendingTimer> {
        let mut out: Vec<PendingTimer> = self
            .inner
            .registrations()
            .iter()
            .map(|(key, reg)| PendingTimer {
                key: *key,
                fire_at: reg.fire_at,
                task_id: key.task_id(),
            })
            .collect();
        out.sort_by_key(|p| (p.fire_at, p.key));
        out
    }
}

#[async_trait]
impl TimerFacility for TokioTimerFacility {
    async fn register_one_shot(
        &self,
        key: TimerKey,
        fire_at: DateTime<Utc>,
        payload: ReminderPayload,
    ) -> Result<(), FacilityError> {
        for permission in [Permission::ExactAlarms, Permission::Notifications] {
            if !self.inner.permissions.allows(permission) {
                return Err(FacilityError::PermissionDenied(permission));
            }
        }

        let mut regs = self.inner.registrations();
        if !regs.contains_key(&key) && regs.len() >= self.inner.max_pending {
            return Err(FacilityError::Rejected(format!(
                "pending timer quota of {} reached",
                self.inner.max_pending
            )));
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            wait_until(inner.clock.as_ref(), fire_at).await;

            // Fire only if this registration was not replaced meanwhile.
            let current = {
                let mut regs = inner.registrations();
                match regs.get(&key) {
                    Some(reg) if reg.generation == generation => {
                        regs.remove(&key);
                        true
                    }
                    _ => false,
                }
            };
            if current {
                debug!(key = key.0, "timer fired");
                inner.sink.deliver(payload);
            }
        });

        let previous = regs.insert(
            key,
            Registration {
                generation,
                fire_at,
                handle: task.abort_handle(),
            },
        );
        if let Some(prev) = previous {
            prev.handle.abort();
        }
        debug!(key = key.0, %fire_at, "timer registered");
        Ok(())
    }

    async fn cancel(&self, key: TimerKey) {
        if let Some(reg) = self.inner.registrations().remove(&key) {
            reg.handle.abort();
            debug!(key = key.0, "timer cancelled");
        }
    }
}

async fn wait_until(clock: &dyn Clock, fire_at: DateTime<Utc>) {
    loop {
        let now = clock.now();
        if now >= fire_at {
            return;
        }
        let remaining = (fire_at - now).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(remaining.min(MAX_SLEEP)).await;
    }
}
