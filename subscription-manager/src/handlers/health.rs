use crate::startup::AppState;
use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "subscription-manager",
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.backend_label()
    }))
}
