use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{AdmissionError, GenerateError, ReservationError, StoreError};

/// Error body returned by every endpoint: `{ code, message, details }`.
#[derive(Debug, Serialize)]
pub struct ApiErrorType {
    #[serde(skip)]
    status: StatusCode,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ApiErrorType {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<(StatusCode, &str, Option<String>)> for ApiErrorType {
    fn from((status, message, details): (StatusCode, &str, Option<String>)) -> Self {
        let code = status
            .canonical_reason()
            .unwrap_or("ERROR")
            .to_uppercase()
            .replace([' ', '-'], "_");
        Self {
            status,
            code,
            message: message.to_string(),
            details: details.map(Value::String),
        }
    }
}

impl IntoResponse for ApiErrorType {
    fn into_response(self) -> Response {
        let status = self.status;
        let mut response = (status, Json(self)).into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, header::HeaderValue::from_static("1"));
        }
        response
    }
}

impl From<StoreError> for ApiErrorType {
    fn from(err: StoreError) -> Self {
        ApiErrorType::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "STORE_UNAVAILABLE",
            "Storage is temporarily unavailable",
        )
        .with_details(json!(err.to_string()))
    }
}

impl From<AdmissionError> for ApiErrorType {
    fn from(err: AdmissionError) -> Self {
        let status = match &err {
            AdmissionError::SectionNotFound { .. } | AdmissionError::EnrollmentNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            AdmissionError::Unauthorized => StatusCode::FORBIDDEN,
            AdmissionError::ReasonRequired => StatusCode::BAD_REQUEST,
            AdmissionError::MissingPrerequisites { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AdmissionError::EnrollmentClosed
            | AdmissionError::SemesterNotOpen { .. }
            | AdmissionError::AlreadyEnrolled { .. }
            | AdmissionError::AlreadyPending { .. }
            | AdmissionError::CapacityFull { .. }
            | AdmissionError::ScheduleConflict { .. }
            | AdmissionError::NotPending { .. }
            | AdmissionError::InvalidTransition(_) => StatusCode::CONFLICT,
            AdmissionError::Unavailable { .. } | AdmissionError::Store(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        let details = match &err {
            AdmissionError::MissingPrerequisites { missing } => Some(json!({ "missing": missing })),
            AdmissionError::ScheduleConflict { conflicts } => {
                Some(json!({ "conflicts": conflicts }))
            }
            AdmissionError::NotPending { status } => Some(json!({ "status": status })),
            AdmissionError::InvalidTransition(t) => Some(json!({ "from": t.from, "to": t.to })),
            AdmissionError::Store(e) => Some(json!(e.to_string())),
            _ => None,
        };

        let api = ApiErrorType::new(status, err.code(), err.to_string());
        match details {
            Some(details) => api.with_details(details),
            None => api,
        }
    }
}

impl From<GenerateError> for ApiErrorType {
    fn from(err: GenerateError) -> Self {
        match err {
            GenerateError::InvalidSemester { .. } => {
                ApiErrorType::new(StatusCode::BAD_REQUEST, "INVALID_SEMESTER", err.to_string())
            }
            GenerateError::NoSections { .. } => {
                ApiErrorType::new(StatusCode::UNPROCESSABLE_ENTITY, "NO_SECTIONS", err.to_string())
            }
            GenerateError::NoClassrooms => ApiErrorType::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "NO_CLASSROOMS",
                err.to_string(),
            ),
            GenerateError::Store(e) => e.into(),
        }
    }
}

impl From<ReservationError> for ApiErrorType {
    fn from(err: ReservationError) -> Self {
        let (status, code) = match &err {
            ReservationError::InvalidSemester { .. } => {
                (StatusCode::BAD_REQUEST, "INVALID_SEMESTER")
            }
            ReservationError::InvalidRange(_) => (StatusCode::BAD_REQUEST, "INVALID_RANGE"),
            ReservationError::MissingPurpose => (StatusCode::BAD_REQUEST, "MISSING_PURPOSE"),
            ReservationError::DateOutsideSemester { .. } => {
                (StatusCode::BAD_REQUEST, "DATE_OUTSIDE_SEMESTER")
            }
            ReservationError::ClassroomNotFound { .. } => {
                (StatusCode::NOT_FOUND, "CLASSROOM_NOT_FOUND")
            }
            ReservationError::NotFound { .. } => (StatusCode::NOT_FOUND, "RESERVATION_NOT_FOUND"),
            ReservationError::Conflict { .. } => (StatusCode::CONFLICT, "RESERVATION_CONFLICT"),
            ReservationError::NotPending { .. } => (StatusCode::CONFLICT, "NOT_PENDING"),
            ReservationError::Store(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE"),
        };
        let api = ApiErrorType::new(status, code, err.to_string());
        match err {
            ReservationError::Conflict { conflicts } => {
                api.with_details(json!({ "conflicts": conflicts }))
            }
            ReservationError::NotPending { status } => api.with_details(json!({ "status": status })),
            _ => api,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuple_conversion_derives_code_from_status() {
        let err = ApiErrorType::from((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to list sections",
            Some("disk I/O error".to_string()),
        ));
        assert_eq!(err.code, "INTERNAL_SERVER_ERROR");
        assert_eq!(err.details, Some(json!("disk I/O error")));
    }

    #[test]
    fn test_admission_errors_map_to_statuses() {
        let full = ApiErrorType::from(AdmissionError::CapacityFull { section_id: 3 });
        assert_eq!(full.code, "CAPACITY_FULL");
        assert_eq!(full.into_response().status(), StatusCode::CONFLICT);

        let down = ApiErrorType::from(AdmissionError::Unavailable {
            message: "settings lookup timed out".to_string(),
        })
        .into_response();
        assert_eq!(down.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(down.headers().contains_key(header::RETRY_AFTER));

        let body = serde_json::to_value(ApiErrorType::from(AdmissionError::Unauthorized)).unwrap();
        assert_eq!(body["code"], "UNAUTHORIZED");
        assert!(body.get("details").is_none());
    }
}
