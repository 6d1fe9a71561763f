// --------------------------------------------------
// Wiring: builds the engine from config, owns the shared handles the HTTP
// handlers use, and runs the two background feeds (fired timers, widget).
// --------------------------------------------------

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::sync::{mpsc, watch};
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::clock::Clock;
use crate::config::AppConfig;
use crate::dispatcher::ReminderDispatcher;
use crate::error::StoreError;
use crate::logic::{LiveUpcoming, UpcomingQuery, widget_line};
use crate::models::{Task, TaskId};
use crate::notify::{Notifier, Permissions};
use crate::reconcile::ReconciliationController;
use crate::store::{JsonTaskStore, TaskStore};
use crate::timer::TokioTimerFacility;
use crate::{routes_tasks, routes_upcoming};

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<ReconciliationController>,
    pub store: Arc<dyn TaskStore>,
    pub facility: TokioTimerFacility,
    pub notifier: Arc<Notifier>,
    pub permissions: Arc<Permissions>,
    pub clock: Arc<dyn Clock>,
    pub widget: watch::Receiver<Vec<String>>,
}

impl AppState {
    // Returns the state plus the feed of fired task ids, which the caller
    // hands to `spawn_fired_loop` once the engine is ready.
    pub fn build(
        config: &AppConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TaskId>), StoreError> {
        let permissions = Arc::new(Permissions::new(config.initial_permissions()));

        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let notifier = Arc::new(
            Notifier::new(permissions.clone(), clock.clone()).with_fired_channel(fired_tx),
        );
        let facility = TokioTimerFacility::new(
            permissions.clone(),
            notifier.clone(),
            clock.clone(),
            config.reminders.max_pending_timers,
        );

        let store: Arc<dyn TaskStore> = Arc::new(JsonTaskStore::open(&config.storage.db_path)?);
        let dispatcher = ReminderDispatcher::new(Arc::new(facility.clone()), clock.clone());
        let controller = Arc::new(ReconciliationController::new(
            store.clone(),
            dispatcher,
            clock.clone(),
            config.reminders.default_category.clone(),
        ));

        let widget = spawn_widget_feed(
            store.subscribe(),
            config.reminders.widget_limit,
            clock.clone(),
        );

        let state = AppState {
            controller,
            store,
            facility,
            notifier,
            permissions,
            clock,
            widget,
        };
        Ok((state, fired_rx))
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        // tasks
        .route("/tasks", get(routes_tasks::get_tasks).post(routes_tasks::create_task))
        .route(
            "/tasks/:id",
            get(routes_tasks::get_task)
                .put(routes_tasks::update_task)
                .delete(routes_tasks::delete_task),
        )
        .route("/tasks/:id/status", post(routes_tasks::set_status))
        .route("/categories", get(routes_tasks::get_categories))
        // upcoming / widget
        .route("/upcoming", get(routes_upcoming::get_upcoming))
        .route("/widget", get(routes_upcoming::get_widget))
        // reminders
        .route("/notifications", get(routes_upcoming::get_notifications))
        .route("/timers", get(routes_upcoming::get_timers))
        .route(
            "/permissions",
            get(routes_upcoming::get_permissions).put(routes_upcoming::put_permissions),
        );

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// Each fired timer moves its task on from Upcoming. Different tasks are
// handled concurrently; the controller serializes per task.
pub fn spawn_fired_loop(
    controller: Arc<ReconciliationController>,
    mut fired_rx: mpsc::UnboundedReceiver<TaskId>,
) {
    tokio::spawn(async move {
        while let Some(id) = fired_rx.recv().await {
            let controller = controller.clone();
            tokio::spawn(async move {
                if let Err(e) = controller.on_timer_fired(id).await {
                    error!(task_id = id, error = %e, "failed to advance fired task");
                }
            });
        }
        debug!("fired-timer feed closed");
    });
}

// Keeps the widget's top-N lines current with the store and the clock.
pub fn spawn_widget_feed(
    tasks_rx: watch::Receiver<Vec<Task>>,
    limit: usize,
    clock: Arc<dyn Clock>,
) -> watch::Receiver<Vec<String>> {
    let mut view = LiveUpcoming::new(
        tasks_rx,
        UpcomingQuery {
            limit: Some(limit),
            ..Default::default()
        },
        clock,
    );
    let render = |tasks: Vec<Task>| -> Vec<String> {
        let offset = *chrono::Local::now().fixed_offset().offset();
        tasks.iter().map(|t| widget_line(t, offset)).collect()
    };

    let (tx, rx) = watch::channel(render(view.current()));
    tokio::spawn(async move {
        while let Some(tasks) = view.changed().await {
            if tx.is_closed() {
                break;
            }
            let lines = render(tasks);
            tx.send_if_modified(|current| {
                if *current == lines {
                    return false;
                }
                *current = lines;
                true
            });
        }
    });
    rx
}
