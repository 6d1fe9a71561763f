// --------------------------------------------------
// Handles API endpoints related to task CRUD operations.
//
// Responsibilities:
// - Create / read / update / delete tasks
// - Set task status (complete / reopen)
// - List categories
//
// Every write goes through the reconciliation controller so the task's
// reminder is kept in step.
// -------------------------------------------------

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::error;

use crate::app::AppState;
use crate::clock::Clock;
use crate::error::EngineError;
use crate::logic;
use crate::models::{Priority, TaskDraft, TaskId, TaskStatus};

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        match self {
            EngineError::Validation(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "task not found").into_response(),
            EngineError::Store(e) => {
                error!(error = %e, "store failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "failed to save db").into_response()
            }
        }
    }
}

fn parse_id(raw: &str) -> Result<TaskId, Response> {
    raw.parse::<TaskId>()
        .map_err(|_| (StatusCode::BAD_REQUEST, "invalid id").into_response())
}

// Empty or missing means "no reminder".
fn parse_scheduled_time(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, Response> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| (StatusCode::BAD_REQUEST, "invalid scheduled_time").into_response()),
    }
}

#[derive(Debug, Deserialize)]
pub struct TasksQuery {
    pub q: Option<String>,
}

// -----------------------------
// GET /api/tasks?q=
// Returns all tasks, optionally filtered by text
// -----------------------------
pub async fn get_tasks(State(state): State<AppState>, Query(q): Query<TasksQuery>) -> Response {
    let tasks = match state.store.list().await {
        Ok(tasks) => tasks,
        Err(e) => return EngineError::from(e).into_response(),
    };

    let tasks = logic::with_current_status(&tasks, state.clock.now());
    Json(logic::filter_tasks(&tasks, q.q.as_deref().unwrap_or(""))).into_response()
}

// -----------------------------
// GET /api/tasks/:id
// -----------------------------
pub async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.store.get(id).await {
        Ok(Some(mut task)) => {
            task.status = logic::current_status(&task, state.clock.now());
            Json(task).into_response()
        }
        Ok(None) => EngineError::NotFound(id).into_response(),
        Err(e) => EngineError::from(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskInput {
    pub title: String,
    pub details: Option<String>,
    pub category: Option<String>,
    pub priority: Option<Priority>,
    pub scheduled_time: Option<String>, // RFC3339
}

// -----------------------------
// POST /api/tasks
// Creates a new task and arms its reminder
// -----------------------------
pub async fn create_task(
    State(state): State<AppState>,
    Json(input): Json<CreateTaskInput>,
) -> Response {
    let scheduled_time = match parse_scheduled_time(input.scheduled_time.as_deref()) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    let draft = TaskDraft {
        title: input.title,
        details: input.details,
        category: input.category,
        priority: input.priority,
        scheduled_time,
    };

    match state.controller.on_insert(draft).await {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateTaskInput {
    pub title: String,
    pub details: Option<String>,
    pub category: Option<String>,
    pub priority: Option<Priority>,
    pub scheduled_time: Option<String>, // RFC3339
    pub status: Option<TaskStatus>,     // kept as stored when absent
}

// -----------------------------
// PUT /api/tasks/:id
// Updates an existing task by ID
// -----------------------------
pub async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<UpdateTaskInput>,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let scheduled_time = match parse_scheduled_time(input.scheduled_time.as_deref()) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    let draft = TaskDraft {
        title: input.title,
        details: input.details,
        category: input.category,
        priority: input.priority,
        scheduled_time,
    };

    match state.controller.on_edit(id, draft, input.status).await {
        Ok(updated) => Json(updated).into_response(),
        Err(e) => e.into_response(),
    }
}

// -----------------------------
// DELETE /api/tasks/:id
// Removes a task permanently, reminder first
// -----------------------------
pub async fn delete_task(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.controller.on_delete(id).await {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusInput {
    pub status: TaskStatus,
}

// -----------------------------
// POST /api/tasks/:id/status
// Completes or reopens a task
// -----------------------------
pub async fn set_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<StatusInput>,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.controller.on_status_toggle(id, input.status).await {
        Ok(updated) => Json(updated).into_response(),
        Err(e) => e.into_response(),
    }
}

// -----------------------------
// GET /api/categories
// -----------------------------
pub async fn get_categories(State(state): State<AppState>) -> Response {
    match state.store.list().await {
        Ok(tasks) => Json(logic::categories(&tasks)).into_response(),
        Err(e) => EngineError::from(e).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::AppConfig;
    use axum::body::to_bytes;
    use chrono::Duration;
    use serde_json::Value;
    use std::sync::Arc;

    fn state(dir: &tempfile::TempDir) -> AppState {
        let mut config = AppConfig::default();
        config.storage.db_path = dir.path().join("db.json");
        let (state, _fired) = AppState::build(&config, Arc::new(SystemClock)).unwrap();
        state
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn input(title: &str, at: Option<String>) -> CreateTaskInput {
        CreateTaskInput {
            title: title.to_string(),
            details: None,
            category: None,
            priority: None,
            scheduled_time: at,
        }
    }

    #[tokio::test]
    async fn create_then_complete_then_delete() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        let at = (Utc::now() + Duration::hours(1)).to_rfc3339();

        let resp = create_task(State(state.clone()), Json(input("Pay rent", Some(at)))).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = body_json(resp).await;
        assert_eq!(body["task"]["status"], "upcoming");
        assert_eq!(body["task"]["category"], "General");
        assert!(body.get("warning").is_none());
        let id = body["task"]["id"].as_i64().unwrap();
        assert_eq!(state.facility.pending().len(), 1);

        let resp = set_status(
            State(state.clone()),
            Path(id.to_string()),
            Json(StatusInput {
                status: TaskStatus::Completed,
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(state.facility.pending().is_empty());

        let resp = delete_task(State(state.clone()), Path(id.to_string())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = get_task(State(state.clone()), Path(id.to_string())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bad_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);

        let resp = create_task(State(state.clone()), Json(input("  ", None))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = create_task(
            State(state.clone()),
            Json(input("x", Some("tomorrow-ish".into()))),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = delete_task(State(state.clone()), Path("abc".into())).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = delete_task(State(state), Path("77".into())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn permission_warning_rides_in_the_body() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        state.permissions.set(crate::notify::Permission::Notifications, false);
        let at = (Utc::now() + Duration::hours(1)).to_rfc3339();

        let resp = create_task(State(state.clone()), Json(input("Call bank", Some(at)))).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = body_json(resp).await;
        assert_eq!(body["warning"]["kind"], "permission_denied");
        assert_eq!(body["warning"]["permission"], "notifications");

        let resp = get_tasks(State(state.clone()), Query(TasksQuery { q: Some("BANK".into()) })).await;
        let list = body_json(resp).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn edit_keeps_status_unless_given() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);

        let body = body_json(create_task(State(state.clone()), Json(input("Gym", None))).await).await;
        let id = body["task"]["id"].as_i64().unwrap();
        set_status(
            State(state.clone()),
            Path(id.to_string()),
            Json(StatusInput {
                status: TaskStatus::Completed,
            }),
        )
        .await;

        let later = (Utc::now() + Duration::days(1)).to_rfc3339();
        let resp = update_task(
            State(state.clone()),
            Path(id.to_string()),
            Json(UpdateTaskInput {
                title: "Gym".into(),
                details: Some("legs".into()),
                category: Some("Health".into()),
                priority: Some(Priority::High),
                scheduled_time: Some(later),
                status: None,
            }),
        )
        .await;
        let body = body_json(resp).await;
        assert_eq!(body["task"]["status"], "completed");
        assert_eq!(body["task"]["category"], "Health");
        assert!(state.facility.pending().is_empty());

        let cats = body_json(get_categories(State(state)).await).await;
        assert_eq!(cats, serde_json::json!(["Health"]));
    }
}
