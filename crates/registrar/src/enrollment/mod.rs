//! Enrollment admission: request, advisor decision and drop.

mod engine;
mod state;

pub use engine::AdmissionEngine;
pub use state::{EnrollmentStatus, InvalidTransition};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::StoreError;
use crate::model::{AcademicSettings, AdvisorId, CourseId, SectionId, StudentId};
use crate::schedule::WeeklyInterval;

/// A course named in an error, so the caller can show its code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseRef {
    pub id: CourseId,
    pub code: String,
}

/// One meeting of the requested section that collides with a section the student holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConflict {
    /// The section the student already holds
    pub section_id: SectionId,
    pub existing: WeeklyInterval,
    pub requested: WeeklyInterval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

/// Student academic record, owned outside the registrar.
pub trait StudentRecords: Send + Sync {
    fn completed_courses(&self, student_id: StudentId) -> Result<HashSet<CourseId>, StoreError>;

    fn advisor_of(&self, student_id: StudentId) -> Result<Option<AdvisorId>, StoreError>;
}

/// Source of the registrar-wide settings, read once per request.
pub trait SettingsSource: Send + Sync {
    fn academic_settings(&self) -> Result<AcademicSettings, StoreError>;
}
