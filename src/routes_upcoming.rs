use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, FixedOffset};
use serde::Serialize;

use crate::app::AppState;
use crate::clock::Clock;
use crate::error::EngineError;
use crate::logic::{self, UpcomingQuery};
use crate::models::Task;
use crate::notify::{PermissionState, PresentedNotification};
use crate::timer::PendingTimer;

#[derive(Debug, Serialize)]
pub struct UpcomingResponse {
    pub now: String,
    pub sort_by_priority: bool,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Serialize)]
pub struct WidgetResponse {
    pub title: &'static str,
    pub lines: Vec<String>,
}

// Local -> FixedOffset (current system offset)
fn now_fixed_offset() -> DateTime<FixedOffset> {
    chrono::Local::now().fixed_offset()
}

// GET /api/upcoming?q=&sort_by_priority=&limit=
pub async fn get_upcoming(
    State(state): State<AppState>,
    Query(q): Query<UpcomingQuery>,
) -> Response {
    let tasks = match state.store.list().await {
        Ok(tasks) => tasks,
        Err(e) => return EngineError::from(e).into_response(),
    };

    Json(UpcomingResponse {
        now: now_fixed_offset().to_rfc3339(),
        sort_by_priority: q.sort_by_priority,
        tasks: logic::upcoming_tasks(&tasks, &q, state.clock.now()),
    })
    .into_response()
}

// GET /api/widget
// Top-N upcoming tasks as display strings, kept fresh by the widget feed.
pub async fn get_widget(State(state): State<AppState>) -> Json<WidgetResponse> {
    let lines = state.widget.borrow().clone();
    Json(WidgetResponse {
        title: "Upcoming Tasks",
        lines,
    })
}

// GET /api/notifications
pub async fn get_notifications(State(state): State<AppState>) -> Json<Vec<PresentedNotification>> {
    Json(state.notifier.presented())
}

// GET /api/timers
pub async fn get_timers(State(state): State<AppState>) -> Json<Vec<PendingTimer>> {
    Json(state.facility.pending())
}

// GET /api/permissions
pub async fn get_permissions(State(state): State<AppState>) -> Json<PermissionState> {
    Json(state.permissions.state())
}

// PUT /api/permissions
// Only records the grant. Tasks created while a permission was missing get
// their reminder on their next update.
pub async fn put_permissions(
    State(state): State<AppState>,
    Json(next): Json<PermissionState>,
) -> Json<PermissionState> {
    state.permissions.apply(next);
    Json(state.permissions.state())
}
