//! Error types for the reminder engine.
//!
//! Fatal errors (`EngineError`) abort a mutation. Reminder problems never do:
//! the task is persisted and the caller gets a [`ReminderWarning`] instead.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::TaskId;
use crate::notify::Permission;

/// Task Store failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("task {0} not found")]
    NotFound(TaskId),
}

/// Rejection reported by the timer facility.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FacilityError {
    #[error("permission denied: {0}")]
    PermissionDenied(Permission),

    #[error("registration rejected: {0}")]
    Rejected(String),
}

/// Why the dispatcher could not arm a timer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("permission denied: {0}")]
    PermissionDenied(Permission),

    #[error("fire time {fire_at} is not after now ({now})")]
    PastDeadline {
        fire_at: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    #[error("timer facility error: {0}")]
    Facility(FacilityError),
}

impl From<FacilityError> for ScheduleError {
    fn from(err: FacilityError) -> Self {
        match err {
            FacilityError::PermissionDenied(p) => ScheduleError::PermissionDenied(p),
            other => ScheduleError::Facility(other),
        }
    }
}

/// Fatal error for a task mutation; nothing was applied.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("store failure: {0}")]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => EngineError::NotFound(id),
            other => EngineError::Store(other),
        }
    }
}

/// Non-fatal outcome of a mutation whose reminder could not be armed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReminderWarning {
    #[error("reminder not scheduled, permission missing: {permission}")]
    PermissionDenied { permission: Permission },

    #[error("reminder not scheduled: {reason}")]
    DispatcherFailure { reason: String },
}

impl ReminderWarning {
    /// Maps a dispatcher error to what the UI should see.
    ///
    /// `PastDeadline` yields `None`: the task simply has no timer.
    pub fn from_schedule_error(err: ScheduleError) -> Option<Self> {
        match err {
            ScheduleError::PermissionDenied(permission) => {
                Some(ReminderWarning::PermissionDenied { permission })
            }
            ScheduleError::Facility(FacilityError::PermissionDenied(permission)) => {
                Some(ReminderWarning::PermissionDenied { permission })
            }
            ScheduleError::Facility(FacilityError::Rejected(reason)) => {
                Some(ReminderWarning::DispatcherFailure { reason })
            }
            ScheduleError::PastDeadline { .. } => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
