// --------------------------------------------------
// Notification delivery and platform permissions.
//
// Responsibilities:
// - Track which platform permissions the user has granted
// - Present a reminder when its timer fires (one per task, latest wins)
// - Tell the engine a task's moment has arrived
// --------------------------------------------------

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::models::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Notifications,
    ExactAlarms,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Notifications => f.write_str("notifications"),
            Permission::ExactAlarms => f.write_str("exact_alarms"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionState {
    pub notifications: bool,
    pub exact_alarms: bool,
}

// Granted permissions. The user can revoke them at any time, so every
// reader checks at the moment it needs one.
#[derive(Debug)]
pub struct Permissions {
    notifications: AtomicBool,
    exact_alarms: AtomicBool,
}

impl Permissions {
    pub fn new(state: PermissionState) -> Self {
        Self {
            notifications: AtomicBool::new(state.notifications),
            exact_alarms: AtomicBool::new(state.exact_alarms),
        }
    }

    fn flag(&self, permission: Permission) -> &AtomicBool {
        match permission {
            Permission::Notifications => &self.notifications,
            Permission::ExactAlarms => &self.exact_alarms,
        }
    }

    pub fn allows(&self, permission: Permission) -> bool {
        self.flag(permission).load(Ordering::SeqCst)
    }

    pub fn set(&self, permission: Permission, granted: bool) {
        self.flag(permission).store(granted, Ordering::SeqCst);
    }

    pub fn state(&self) -> PermissionState {
        PermissionState {
            notifications: self.allows(Permission::Notifications),
            exact_alarms: self.allows(Permission::ExactAlarms),
        }
    }

    pub fn apply(&self, state: PermissionState) {
        self.set(Permission::Notifications, state.notifications);
        self.set(Permission::ExactAlarms, state.exact_alarms);
    }
}

/// What a timer carries back when it fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderPayload {
    pub task_id: TaskId,
    pub title: String,
    pub message: String,
}

/// Receives fired timers.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, payload: ReminderPayload);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresentedNotification {
    pub task_id: TaskId,
    pub title: String,
    pub message: String,
    pub presented_at: DateTime<Utc>,
}

pub struct Notifier {
    permissions: Arc<Permissions>,
    clock: Arc<dyn Clock>,
    // keyed by task id: a newer reminder for the same task replaces the old one
    presented: Mutex<BTreeMap<TaskId, PresentedNotification>>,
    fired_tx: Option<mpsc::UnboundedSender<TaskId>>,
}

impl Notifier {
    pub fn new(permissions: Arc<Permissions>, clock: Arc<dyn Clock>) -> Self {
        Self {
            permissions,
            clock,
            presented: Mutex::new(BTreeMap::new()),
            fired_tx: None,
        }
    }

    /// Forward the id of every fired reminder to `tx`.
    pub fn with_fired_channel(mut self, tx: mpsc::UnboundedSender<TaskId>) -> Self {
        self.fired_tx = Some(tx);
        self
    }

    pub fn presented(&self) -> Vec<PresentedNotification> {
        match self.presented.lock() {
            Ok(map) => map.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        }
    }
}

impl NotificationSink for Notifier {
    fn deliver(&self, payload: ReminderPayload) {
        // The moment has come whether or not we may show anything.
        if let Some(tx) = &self.fired_tx {
            if tx.send(payload.task_id).is_err() {
                warn!(task_id = payload.task_id, "fired-task channel closed");
            }
        }

        if !self.permissions.allows(Permission::Notifications) {
            warn!(
                task_id = payload.task_id,
                "notification permission revoked since scheduling, dropping reminder"
            );
            return;
        }

        let notification = PresentedNotification {
            task_id: payload.task_id,
            title: payload.title,
            message: payload.message,
            presented_at: self.clock.now(),
        };
        info!(
            task_id = notification.task_id,
            title = %notification.title,
            "reminder delivered"
        );

        let mut presented = match self.presented.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        presented.insert(notification.task_id, notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    fn payload(task_id: TaskId, title: &str) -> ReminderPayload {
        ReminderPayload {
            task_id,
            title: title.to_string(),
            message: String::new(),
        }
    }

    fn all_granted() -> Arc<Permissions> {
        Arc::new(Permissions::new(PermissionState {
            notifications: true,
            exact_alarms: true,
        }))
    }

    #[test]
    fn same_task_replaces_rather_than_stacks() {
        let notifier = Notifier::new(all_granted(), Arc::new(SystemClock));
        notifier.deliver(payload(1, "first"));
        notifier.deliver(payload(1, "second"));
        notifier.deliver(payload(2, "other"));

        let shown = notifier.presented();
        assert_eq!(shown.len(), 2);
        assert_eq!(shown[0].title, "second");
        assert_eq!(shown[1].task_id, 2);
    }

    #[test]
    fn revoked_permission_is_checked_at_fire_time() {
        let permissions = all_granted();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let notifier =
            Notifier::new(permissions.clone(), Arc::new(SystemClock)).with_fired_channel(tx);

        permissions.set(Permission::Notifications, false);
        notifier.deliver(payload(3, "Pay rent"));

        assert!(notifier.presented().is_empty());
        // the engine still hears about it
        assert_eq!(rx.try_recv().unwrap(), 3);
    }

    #[test]
    fn permission_state_round_trips_through_apply() {
        let permissions = all_granted();
        permissions.apply(PermissionState {
            notifications: true,
            exact_alarms: false,
        });
        assert!(permissions.allows(Permission::Notifications));
        assert!(!permissions.allows(Permission::ExactAlarms));
        assert!(!permissions.state().exact_alarms);
    }
}
