use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::info;

use crate::model::AcademicSettings;
use crate::semester::is_valid_semester;
use crate::server::types::ApiErrorType;
use crate::types::AppState;

/// GET /settings
pub async fn get_settings(State(s): State<Arc<AppState>>) -> Response {
    info!("GET /settings");

    match s.store.settings() {
        Ok(settings) => (StatusCode::OK, Json(settings)).into_response(),
        Err(e) => ApiErrorType::from(e).into_response(),
    }
}

/// PUT /settings
///
/// Replaces both settings. Omitting `current_semester` clears the semester filter.
pub async fn put_settings(
    State(s): State<Arc<AppState>>,
    Json(settings): Json<AcademicSettings>,
) -> Response {
    info!(
        "PUT /settings (enrollment_open={}, current_semester={:?})",
        settings.enrollment_open, settings.current_semester
    );

    if let Some(semester) = &settings.current_semester {
        if !is_valid_semester(semester) {
            return ApiErrorType::new(
                StatusCode::BAD_REQUEST,
                "INVALID_SEMESTER",
                format!("Invalid semester key: {semester}"),
            )
            .into_response();
        }
    }

    match s.store.update_settings(&settings) {
        Ok(()) => (StatusCode::OK, Json(settings)).into_response(),
        Err(e) => ApiErrorType::from(e).into_response(),
    }
}
