use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use service::AppState;

/// GET banner kept for clients that probe the root path
pub async fn welcome() -> impl IntoResponse {
    (StatusCode::OK, "Welcome to the Real-Time Notification Server!")
}

/// GET relay liveness and the number of open relay connections
pub async fn health_check(State(app_state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "connections": app_state.manager_ref().connection_count(),
        })),
    )
}
