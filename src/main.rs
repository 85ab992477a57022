//! Streakline - habit streaks and points.
//!
//! # API Endpoints
//!
//! - `POST /users/:user_id/habits` - Create a habit
//! - `GET /users/:user_id/habits` - List active habits
//! - `GET /users/:user_id/habits/:habit_id` - Fetch one habit
//! - `DELETE /users/:user_id/habits/:habit_id` - Soft-delete a habit
//! - `POST /users/:user_id/habits/:habit_id/complete` - Record a completion
//! - `GET /users/:user_id/habits/:habit_id/completions` - Completion history
//! - `GET /users/:user_id/points` - Points totals and level
//! - `GET /users/:user_id/summary` - Progress for a day
//! - `GET /health` - Health check

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use streakline::api::{AppState, router};
use streakline::clock::SystemClock;
use streakline::config::Config;
use streakline::service::HabitService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Tracing with env filter; completion notes stay out of INFO logs
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("streakline=info".parse()?))
        .init();

    // Configuration from environment
    let config = Config::from_env()?;

    info!(port = config.port, backend = config.backend.label(), "Starting Streakline server");

    // Open the configured store
    let store = config.open_store().await?;
    info!("Store initialized");

    // Wall-clock days for completions
    let state = AppState {
        service: HabitService::new(store, Arc::new(SystemClock)),
    };
    // Build router
    let app = router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "Streakline is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
