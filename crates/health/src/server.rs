use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use tracing::info;

use crate::state::HealthState;

#[derive(Clone)]
struct AppState {
    health: Arc<HealthState>,
    poll_interval_secs: u64,
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let interval = Some(state.poll_interval_secs);
    let snapshot = state.health.snapshot(interval);
    let code = if state.health.is_healthy(interval) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(snapshot))
}

/// Serve `GET /healthz` on `addr` until the process exits. Intended to be
/// spawned as its own task; it never touches mail or contact state.
pub async fn serve(
    health: Arc<HealthState>,
    poll_interval_secs: u64,
    addr: SocketAddr,
) -> std::io::Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .with_state(AppState {
            health,
            poll_interval_secs,
        });

    info!(%addr, "health endpoint listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}
