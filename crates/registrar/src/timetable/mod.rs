//! Timetable generation for a semester.
//!
//! Placement is greedy and deterministic: sections needing the most blocks go first, and
//! each takes the earliest acceptable blocks from a fixed candidate catalog. A section
//! that cannot get every block it needs is left unplaced and reported; the run carries on.

mod catalog;
mod generator;
mod service;

pub use catalog::candidate_blocks;
pub use generator::plan_section;
pub use service::TimetableService;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::model::{Section, SectionId};
use crate::schedule::ClockTime;

/// Part of the day whose blocks are tried first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreferredTimeSlot {
    /// 09:00-12:00
    Morning,
    /// 13:00-17:00
    Afternoon,
    #[default]
    Any,
}

impl PreferredTimeSlot {
    pub fn window(self) -> Option<(ClockTime, ClockTime)> {
        match self {
            PreferredTimeSlot::Morning => {
                Some((ClockTime::on_the_hour(9), ClockTime::on_the_hour(12)))
            }
            PreferredTimeSlot::Afternoon => {
                Some((ClockTime::on_the_hour(13), ClockTime::on_the_hour(17)))
            }
            PreferredTimeSlot::Any => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerateOptions {
    /// Clear every schedule in the semester first; otherwise only unscheduled sections
    /// are placed
    pub overwrite_existing: bool,
    pub preferred_time_slot: PreferredTimeSlot,
    /// Report `success = false` when any section is left unplaced
    pub strict: bool,
    /// Give times without a room to sections no classroom can hold
    pub allow_roomless: bool,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            overwrite_existing: true,
            preferred_time_slot: PreferredTimeSlot::Any,
            strict: false,
            allow_roomless: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnplacedReason {
    NoFeasibleSlot,
    NoRoomLargeEnough,
    CourseMissing,
    /// The course asks for no contact hours, so there is nothing to place
    NoWeeklyHours,
    /// The run was cancelled before this section was attempted
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnplacedSection {
    pub section_id: SectionId,
    pub reason: UnplacedReason,
}

/// Outcome of a generation run. Unplaced sections are data here, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationReport {
    pub semester: String,
    pub success: bool,
    /// Sections placed by this run
    pub assignment_count: usize,
    /// Sections this run tried to place
    pub total_sections: usize,
    pub unassigned_count: usize,
    /// Time slots written by this run
    pub slot_count: usize,
    pub message: String,
    pub unplaced: Vec<UnplacedSection>,
    pub cancelled: bool,
}

/// Cooperative cancellation for a generation run, checked between sections.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn same_run(&self, other: &CancelFlag) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A section with its course code, as listed and exported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimetableEntry {
    pub course_code: String,
    pub available_seats: u32,
    #[serde(flatten)]
    pub section: Section,
}
