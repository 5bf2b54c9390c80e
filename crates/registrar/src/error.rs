//! Error types for the registrar.
//!
//! Constraint violations (full section, missing prerequisites, time conflicts) are
//! ordinary variants carrying enough detail to show the student what went wrong.
//! Store failures are the only retryable class.

use chrono::NaiveDate;
use thiserror::Error;

use crate::enrollment::{CourseRef, EnrollmentStatus, InvalidTransition, ScheduleConflict};
use crate::model::{ClassroomId, EnrollmentId, ReservationId, SectionId};
use crate::reservation::{ReservationConflict, ReservationStatus};
use crate::schedule::IntervalError;

/// Errors raised by the SQLite store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Another thread panicked while holding the connection
    #[error("Database connection lock poisoned")]
    Poisoned,

    /// A persisted row could not be decoded into a domain value
    #[error("Corrupt row: {message}")]
    Corrupt { message: String },
}

impl From<IntervalError> for StoreError {
    fn from(err: IntervalError) -> Self {
        StoreError::Corrupt {
            message: err.to_string(),
        }
    }
}

/// Outcomes of an enrollment request or decision that did not succeed.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("Enrollment is currently closed")]
    EnrollmentClosed,

    #[error("Section {section_id} belongs to {semester}, which is not open for enrollment")]
    SemesterNotOpen { section_id: SectionId, semester: String },

    #[error("Section {section_id} not found")]
    SectionNotFound { section_id: SectionId },

    #[error("Enrollment {enrollment_id} not found")]
    EnrollmentNotFound { enrollment_id: EnrollmentId },

    #[error("Already enrolled in section {section_id}")]
    AlreadyEnrolled { section_id: SectionId },

    #[error("A request for section {section_id} is already pending approval")]
    AlreadyPending { section_id: SectionId },

    #[error("Section {section_id} is full")]
    CapacityFull { section_id: SectionId },

    #[error("Missing prerequisites: {}", .missing.iter().map(|c| c.code.as_str()).collect::<Vec<_>>().join(", "))]
    MissingPrerequisites { missing: Vec<CourseRef> },

    #[error("Schedule conflict with {} existing meeting(s)", .conflicts.len())]
    ScheduleConflict { conflicts: Vec<ScheduleConflict> },

    #[error("Enrollment is {status}, not pending")]
    NotPending { status: EnrollmentStatus },

    #[error("Not the advisor of this student")]
    Unauthorized,

    #[error("A rejection reason is required")]
    ReasonRequired,

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    /// A collaborator lookup (student record, advisor mapping, settings) failed or timed out
    #[error("Dependency unavailable: {message}")]
    Unavailable { message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AdmissionError {
    /// Stable machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            AdmissionError::EnrollmentClosed => "ENROLLMENT_CLOSED",
            AdmissionError::SemesterNotOpen { .. } => "SEMESTER_NOT_OPEN",
            AdmissionError::SectionNotFound { .. } => "SECTION_NOT_FOUND",
            AdmissionError::EnrollmentNotFound { .. } => "ENROLLMENT_NOT_FOUND",
            AdmissionError::AlreadyEnrolled { .. } => "ALREADY_ENROLLED",
            AdmissionError::AlreadyPending { .. } => "ALREADY_PENDING",
            AdmissionError::CapacityFull { .. } => "CAPACITY_FULL",
            AdmissionError::MissingPrerequisites { .. } => "MISSING_PREREQUISITES",
            AdmissionError::ScheduleConflict { .. } => "SCHEDULE_CONFLICT",
            AdmissionError::NotPending { .. } => "NOT_PENDING",
            AdmissionError::Unauthorized => "UNAUTHORIZED",
            AdmissionError::ReasonRequired => "REASON_REQUIRED",
            AdmissionError::InvalidTransition(_) => "INVALID_TRANSITION",
            AdmissionError::Unavailable { .. } => "UNAVAILABLE",
            AdmissionError::Store(_) => "STORE_UNAVAILABLE",
        }
    }

    /// Returns true if retrying the same call later may succeed without other changes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdmissionError::Unavailable { .. } | AdmissionError::Store(_)
        )
    }
}

/// Errors that stop a timetable run or export before it produces a report.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("Invalid semester key: {semester}")]
    InvalidSemester { semester: String },

    #[error("No sections found for {semester}")]
    NoSections { semester: String },

    #[error("No classrooms available")]
    NoClassrooms,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GenerateError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GenerateError::Store(_))
    }
}

/// Errors raised by classroom reservations.
#[derive(Debug, Error)]
pub enum ReservationError {
    #[error("Invalid semester key: {semester}")]
    InvalidSemester { semester: String },

    #[error(transparent)]
    InvalidRange(#[from] IntervalError),

    #[error("Purpose must not be empty")]
    MissingPurpose,

    #[error("{date} is outside the teaching dates of {semester}")]
    DateOutsideSemester { date: NaiveDate, semester: String },

    #[error("Classroom {classroom_id} not found")]
    ClassroomNotFound { classroom_id: ClassroomId },

    #[error("Reservation {reservation_id} not found")]
    NotFound { reservation_id: ReservationId },

    #[error("Classroom is already booked for {} overlapping period(s)", .conflicts.len())]
    Conflict { conflicts: Vec<ReservationConflict> },

    #[error("Reservation is {status}, not pending")]
    NotPending { status: ReservationStatus },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_infrastructure_errors_are_retryable() {
        assert!(AdmissionError::Store(StoreError::Poisoned).is_retryable());
        assert!(AdmissionError::Unavailable {
            message: "advisor lookup timed out".to_string()
        }
        .is_retryable());
        assert!(!AdmissionError::CapacityFull { section_id: 1 }.is_retryable());
        assert!(!AdmissionError::Unauthorized.is_retryable());
        assert!(GenerateError::Store(StoreError::Poisoned).is_retryable());
        assert!(!GenerateError::NoClassrooms.is_retryable());
    }

    #[test]
    fn test_missing_prerequisites_message_lists_codes() {
        let err = AdmissionError::MissingPrerequisites {
            missing: vec![
                CourseRef {
                    id: 1,
                    code: "MATH 18".to_string(),
                },
                CourseRef {
                    id: 2,
                    code: "CSE 12".to_string(),
                },
            ],
        };
        assert_eq!(err.to_string(), "Missing prerequisites: MATH 18, CSE 12");
        assert_eq!(err.code(), "MISSING_PREREQUISITES");
    }
}
