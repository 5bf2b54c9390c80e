/// Registrar domain records
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::enrollment::EnrollmentStatus;
use crate::schedule::TimeSlot;

// Type aliases for clarity
pub type CourseId = i64;
pub type SectionId = i64;
pub type ClassroomId = i64;
pub type InstructorId = i64;
pub type StudentId = i64;
pub type AdvisorId = i64;
pub type EnrollmentId = i64;
pub type ReservationId = i64;

/// A course in the catalog. Read-only while a timetable is generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    /// Unique, at most 20 characters
    pub code: String,
    pub credits: u32,
    /// Contact hours per week
    pub weekly_hours: u32,
    #[serde(default)]
    pub prerequisite_course_ids: BTreeSet<CourseId>,
}

impl Course {
    /// Number of blocks of `block_minutes` needed to cover the weekly hours, rounded up.
    pub fn required_blocks(&self, block_minutes: u16) -> usize {
        let block = u64::from(block_minutes.max(1));
        (u64::from(self.weekly_hours) * 60).div_ceil(block) as usize
    }
}

/// One offering of a course in a semester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    pub course_id: CourseId,
    /// Semester key, e.g. `2025-SPRING`
    pub semester: String,
    pub section_number: u32,
    pub instructor_id: Option<InstructorId>,
    pub capacity: u32,
    /// ACTIVE + PENDING enrollments
    pub enrolled_count: u32,
    #[serde(default)]
    pub schedule: Vec<TimeSlot>,
}

impl Section {
    pub fn available_seats(&self) -> u32 {
        self.capacity.saturating_sub(self.enrolled_count)
    }

    pub fn is_full(&self) -> bool {
        self.enrolled_count >= self.capacity
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classroom {
    pub id: ClassroomId,
    pub name: String,
    pub capacity: u32,
}

/// A student's request to join a section, and its decision trail.
///
/// Rows are never deleted; a withdrawn or refused request stays as DROPPED or REJECTED
/// and a new request creates a new row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: EnrollmentId,
    pub student_id: StudentId,
    pub section_id: SectionId,
    pub status: EnrollmentStatus,
    pub requested_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<AdvisorId>,
    pub rejection_reason: Option<String>,
}

/// Registrar-wide settings, read once per admission request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcademicSettings {
    pub enrollment_open: bool,
    /// When set, only sections of this semester accept requests
    #[serde(default)]
    pub current_semester: Option<String>,
}

impl Default for AcademicSettings {
    fn default() -> Self {
        Self {
            enrollment_open: true,
            current_semester: None,
        }
    }
}
