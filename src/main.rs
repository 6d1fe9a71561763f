// Define data modules
mod models; // Data structures (Task, Priority, TaskStatus, Db)
mod store; // Persistent storage (load/save db.json)
mod logic; // Status derivation and read-side views
mod clock; // Wall clock, swappable in tests
mod error; // Error taxonomy
mod config; // TOML + env configuration
mod notify; // Notification delivery and permissions
mod timer; // One-shot timer facility
mod dispatcher; // Task -> pending timer
mod reconcile; // Keeps store writes and timers in step
mod app; // Engine wiring, router, background feeds
mod routes_tasks; // HTTP handlers for task APIs
mod routes_upcoming; // HTTP handlers for upcoming / widget / reminder APIs

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::app::AppState;
use crate::clock::SystemClock;
use crate::config::AppConfig;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("reminder_scheduler=info,tower_http=info")),
        )
        .init();

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let (state, fired_rx) = match AppState::build(&config, Arc::new(SystemClock)) {
        Ok(built) => built,
        Err(e) => {
            error!(error = %e, path = %config.storage.db_path.display(), "failed to open task store");
            std::process::exit(1);
        }
    };

    // Timers live in memory only: re-arm everything the store still wants.
    if let Err(e) = state.controller.restore().await {
        error!(error = %e, "failed to restore reminders");
        std::process::exit(1);
    }
    app::spawn_fired_loop(state.controller.clone(), fired_rx);

    let addr = match config.bind_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, "bad bind address");
            std::process::exit(1);
        }
    };

    // Print the link to the server
    info!("Server running at http://{}", addr);
    info!("API base:     http://{}/api", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("bind failed");

    axum::serve(listener, app::router(state))
        .await
        .expect("server error");
}
