use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::routes::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let status = if state.task_manager.is_shutting_down() {
        "shutting_down"
    } else {
        "ok"
    };

    Json(json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": "quant-dashboard",
        "version": env!("CARGO_PKG_VERSION"),
        "live_tasks": state.task_manager.live_count().await,
        "connected_clients": state.hub.client_count().await,
    }))
}
