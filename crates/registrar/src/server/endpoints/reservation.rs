//! Classroom reservations.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::model::ReservationId;
use crate::reservation::ReservationRequest;
use crate::server::types::ApiErrorType;
use crate::types::AppState;

#[derive(Debug, Deserialize)]
pub struct ApproverBody {
    pub approver_id: i64,
}

/// POST /reservations
pub async fn post_reservation(
    State(s): State<Arc<AppState>>,
    Json(body): Json<ReservationRequest>,
) -> Response {
    info!(
        "POST /reservations (classroom {}, {} {}-{})",
        body.classroom_id, body.date, body.start, body.end
    );

    match s.reservations.request(body).await {
        Ok(reservation) => (StatusCode::CREATED, Json(reservation)).into_response(),
        Err(e) => ApiErrorType::from(e).into_response(),
    }
}

/// POST /reservations/:id/approve
pub async fn post_approve(
    Path(reservation_id): Path<ReservationId>,
    State(s): State<Arc<AppState>>,
    Json(body): Json<ApproverBody>,
) -> Response {
    info!("POST /reservations/{}/approve", reservation_id);

    match s.reservations.approve(reservation_id, body.approver_id).await {
        Ok(reservation) => (StatusCode::OK, Json(reservation)).into_response(),
        Err(e) => ApiErrorType::from(e).into_response(),
    }
}

/// POST /reservations/:id/reject
pub async fn post_reject(
    Path(reservation_id): Path<ReservationId>,
    State(s): State<Arc<AppState>>,
    Json(body): Json<ApproverBody>,
) -> Response {
    info!("POST /reservations/{}/reject", reservation_id);

    match s.reservations.reject(reservation_id, body.approver_id).await {
        Ok(reservation) => (StatusCode::OK, Json(reservation)).into_response(),
        Err(e) => ApiErrorType::from(e).into_response(),
    }
}

/// POST /reservations/:id/cancel
pub async fn post_cancel(
    Path(reservation_id): Path<ReservationId>,
    State(s): State<Arc<AppState>>,
) -> Response {
    info!("POST /reservations/{}/cancel", reservation_id);

    match s.reservations.cancel(reservation_id).await {
        Ok(reservation) => (StatusCode::OK, Json(reservation)).into_response(),
        Err(e) => ApiErrorType::from(e).into_response(),
    }
}
