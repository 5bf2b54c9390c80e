use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

use crate::server::types::ApiErrorType;
use crate::types::AppState;

/// GET /health
///
/// Reports healthy when the store answers a query.
pub async fn get_health(State(s): State<Arc<AppState>>) -> Response {
    info!("GET /health");

    match s.store.semesters() {
        Ok(semesters) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "semesters": semesters,
            })),
        )
            .into_response(),
        Err(e) => {
            error!("Health check failed: {}", e);
            ApiErrorType::from((
                StatusCode::SERVICE_UNAVAILABLE,
                "Database unavailable",
                Some(e.to_string()),
            ))
            .into_response()
        }
    }
}
