//! Timetable generation, listing and export.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

use crate::server::types::ApiErrorType;
use crate::timetable::GenerateOptions;
use crate::types::AppState;

#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    pub semester: String,
    #[serde(flatten)]
    pub options: GenerateOptions,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub semester: String,
}

/// POST /scheduling/generate
///
/// Body: `{ "semester": "2025-FALL", "overwriteExisting": true, "preferredTimeSlot": "morning" }`.
/// Unplaced sections are part of the report, not an error.
pub async fn post_generate(
    State(s): State<Arc<AppState>>,
    Json(body): Json<GenerateBody>,
) -> Response {
    info!("POST /scheduling/generate ({})", body.semester);

    match s.timetable.generate(&body.semester, &body.options).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => {
            error!("Timetable generation for {} failed: {}", body.semester, e);
            ApiErrorType::from(e).into_response()
        }
    }
}

/// DELETE /scheduling/generate/:semester
///
/// Asks the semester's running generation to stop after the current section.
pub async fn delete_generate(
    Path(semester): Path<String>,
    State(s): State<Arc<AppState>>,
) -> Response {
    info!("DELETE /scheduling/generate/{}", semester);

    if s.timetable.cancel(&semester) {
        (
            StatusCode::ACCEPTED,
            Json(json!({ "semester": semester, "cancelling": true })),
        )
            .into_response()
    } else {
        ApiErrorType::new(
            StatusCode::NOT_FOUND,
            "NO_RUN_IN_PROGRESS",
            format!("No timetable generation is running for {semester}"),
        )
        .into_response()
    }
}

/// GET /scheduling/:semester
pub async fn get_timetable(
    Path(semester): Path<String>,
    State(s): State<Arc<AppState>>,
) -> Response {
    info!("GET /scheduling/{}", semester);

    match s.timetable.semester_timetable(&semester).await {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(e) => ApiErrorType::from(e).into_response(),
    }
}

/// GET /scheduling/export/ical?semester=
pub async fn get_ical_export(
    State(s): State<Arc<AppState>>,
    Query(query): Query<ExportQuery>,
) -> Response {
    info!("GET /scheduling/export/ical ({})", query.semester);

    match s.timetable.export_timetable(&query.semester).await {
        Ok(calendar) => {
            let disposition = format!("attachment; filename=\"timetable-{}.ics\"", query.semester);
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/calendar; charset=utf-8".to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                calendar,
            )
                .into_response()
        }
        Err(e) => ApiErrorType::from(e).into_response(),
    }
}
