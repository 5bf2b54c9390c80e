use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::server::endpoints::{enrollment, reservation, scheduling, settings, status};
use crate::types::AppState;

mod endpoints;
pub mod types;

/// Creates a router that can be used by `axum`.
///
/// # Parameters
/// - `app_state`: The app server state.
///
/// # Returns
/// The router.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let scheduling_router = Router::new()
        .route("/scheduling/generate", post(scheduling::post_generate))
        .route(
            "/scheduling/generate/:semester",
            delete(scheduling::delete_generate),
        )
        .route("/scheduling/export/ical", get(scheduling::get_ical_export))
        .route("/scheduling/:semester", get(scheduling::get_timetable));

    let enrollment_router = Router::new()
        .route("/enrollments", post(enrollment::post_enrollment))
        .route("/enrollments/:id", delete(enrollment::delete_enrollment))
        .route("/enrollments/:id/approve", post(enrollment::post_approve))
        .route("/enrollments/:id/reject", post(enrollment::post_reject))
        .route(
            "/students/:id/enrollments",
            get(enrollment::get_student_enrollments),
        )
        .route("/advisors/:id/pending", get(enrollment::get_advisor_pending));

    let reservation_router = Router::new()
        .route("/reservations", post(reservation::post_reservation))
        .route("/reservations/:id/approve", post(reservation::post_approve))
        .route("/reservations/:id/reject", post(reservation::post_reject))
        .route("/reservations/:id/cancel", post(reservation::post_cancel));

    Router::new()
        .route("/health", get(status::get_health))
        .route(
            "/settings",
            get(settings::get_settings).put(settings::put_settings),
        )
        .merge(scheduling_router)
        .merge(enrollment_router)
        .merge(reservation_router)
        .with_state(app_state)
}
