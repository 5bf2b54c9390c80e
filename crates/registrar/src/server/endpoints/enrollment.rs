//! Enrollment requests, advisor decisions and listings.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::enrollment::Decision;
use crate::error::AdmissionError;
use crate::model::{AdvisorId, EnrollmentId, SectionId, StudentId};
use crate::server::types::ApiErrorType;
use crate::types::AppState;

#[derive(Debug, Deserialize)]
pub struct EnrollmentBody {
    pub student_id: StudentId,
    pub section_id: SectionId,
}

#[derive(Debug, Deserialize)]
pub struct DecisionBody {
    pub advisor_id: AdvisorId,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SemesterQuery {
    pub semester: Option<String>,
}

fn admission_error_response(e: AdmissionError) -> Response {
    if e.is_retryable() {
        warn!("Admission call failed, retryable: {}", e);
    }
    ApiErrorType::from(e).into_response()
}

/// POST /enrollments
///
/// Creates a PENDING enrollment that already holds its seat.
pub async fn post_enrollment(
    State(s): State<Arc<AppState>>,
    Json(body): Json<EnrollmentBody>,
) -> Response {
    info!(
        "POST /enrollments (student {}, section {})",
        body.student_id, body.section_id
    );

    match s.admissions.request(body.student_id, body.section_id).await {
        Ok(enrollment) => (StatusCode::CREATED, Json(enrollment)).into_response(),
        Err(e) => admission_error_response(e),
    }
}

/// POST /enrollments/:id/approve
pub async fn post_approve(
    Path(enrollment_id): Path<EnrollmentId>,
    State(s): State<Arc<AppState>>,
    Json(body): Json<DecisionBody>,
) -> Response {
    info!("POST /enrollments/{}/approve", enrollment_id);
    decide(&s, enrollment_id, body, Decision::Approve).await
}

/// POST /enrollments/:id/reject
///
/// Requires a non-empty `reason`.
pub async fn post_reject(
    Path(enrollment_id): Path<EnrollmentId>,
    State(s): State<Arc<AppState>>,
    Json(body): Json<DecisionBody>,
) -> Response {
    info!("POST /enrollments/{}/reject", enrollment_id);
    decide(&s, enrollment_id, body, Decision::Reject).await
}

async fn decide(
    s: &AppState,
    enrollment_id: EnrollmentId,
    body: DecisionBody,
    decision: Decision,
) -> Response {
    match s
        .admissions
        .decide(enrollment_id, body.advisor_id, decision, body.reason)
        .await
    {
        Ok(enrollment) => (StatusCode::OK, Json(enrollment)).into_response(),
        Err(e) => admission_error_response(e),
    }
}

/// DELETE /enrollments/:id
pub async fn delete_enrollment(
    Path(enrollment_id): Path<EnrollmentId>,
    State(s): State<Arc<AppState>>,
) -> Response {
    info!("DELETE /enrollments/{}", enrollment_id);

    match s.admissions.drop_enrollment(enrollment_id).await {
        Ok(enrollment) => (StatusCode::OK, Json(enrollment)).into_response(),
        Err(e) => admission_error_response(e),
    }
}

/// GET /students/:id/enrollments?semester=
pub async fn get_student_enrollments(
    Path(student_id): Path<StudentId>,
    State(s): State<Arc<AppState>>,
    Query(query): Query<SemesterQuery>,
) -> Response {
    info!("GET /students/{}/enrollments", student_id);

    match s
        .admissions
        .enrollments_for_student(student_id, query.semester.as_deref())
    {
        Ok(enrollments) => (StatusCode::OK, Json(enrollments)).into_response(),
        Err(e) => admission_error_response(e),
    }
}

/// GET /advisors/:id/pending
pub async fn get_advisor_pending(
    Path(advisor_id): Path<AdvisorId>,
    State(s): State<Arc<AppState>>,
) -> Response {
    info!("GET /advisors/{}/pending", advisor_id);

    match s.admissions.pending_for_advisor(advisor_id) {
        Ok(enrollments) => (StatusCode::OK, Json(enrollments)).into_response(),
        Err(e) => admission_error_response(e),
    }
}
