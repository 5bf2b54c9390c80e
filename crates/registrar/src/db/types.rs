/// Raw rows as read from SQLite, before they are checked into domain values
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Row;

use crate::enrollment::EnrollmentStatus;
use crate::error::StoreError;
use crate::model::Enrollment;
use crate::reservation::{Reservation, ReservationStatus};
use crate::schedule::{ClockTime, Day, TimeSlot, WeeklyInterval};

#[derive(Debug, Clone)]
pub struct DbSlot {
    pub day: u8,
    pub start_minute: u16,
    pub end_minute: u16,
    pub classroom_id: Option<i64>,
}

impl DbSlot {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            day: row.get(0)?,
            start_minute: row.get(1)?,
            end_minute: row.get(2)?,
            classroom_id: row.get(3)?,
        })
    }
}

impl TryFrom<DbSlot> for TimeSlot {
    type Error = StoreError;

    fn try_from(row: DbSlot) -> Result<Self, Self::Error> {
        let interval = WeeklyInterval::new(
            Day::from_number(row.day)?,
            ClockTime::from_minutes(row.start_minute)?,
            ClockTime::from_minutes(row.end_minute)?,
        )?;
        Ok(TimeSlot::new(interval, row.classroom_id))
    }
}

#[derive(Debug, Clone)]
pub struct DbEnrollment {
    pub enrollment_id: i64,
    pub student_id: i64,
    pub section_id: i64,
    pub status: String,
    pub requested_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<i64>,
    pub rejection_reason: Option<String>,
}

impl DbEnrollment {
    pub const COLUMNS: &'static str = "enrollment_id, student_id, section_id, status, \
         requested_at, decided_at, decided_by, rejection_reason";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            enrollment_id: row.get(0)?,
            student_id: row.get(1)?,
            section_id: row.get(2)?,
            status: row.get(3)?,
            requested_at: row.get(4)?,
            decided_at: row.get(5)?,
            decided_by: row.get(6)?,
            rejection_reason: row.get(7)?,
        })
    }
}

impl TryFrom<DbEnrollment> for Enrollment {
    type Error = StoreError;

    fn try_from(row: DbEnrollment) -> Result<Self, Self::Error> {
        let status: EnrollmentStatus = row
            .status
            .parse()
            .map_err(|message| StoreError::Corrupt { message })?;
        Ok(Enrollment {
            id: row.enrollment_id,
            student_id: row.student_id,
            section_id: row.section_id,
            status,
            requested_at: row.requested_at,
            decided_at: row.decided_at,
            decided_by: row.decided_by,
            rejection_reason: row.rejection_reason,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DbReservation {
    pub reservation_id: i64,
    pub classroom_id: i64,
    pub requested_by: i64,
    pub semester: String,
    pub date: NaiveDate,
    pub start_minute: u16,
    pub end_minute: u16,
    pub purpose: String,
    pub status: String,
    pub decided_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl DbReservation {
    pub const COLUMNS: &'static str = "reservation_id, classroom_id, requested_by, semester, \
         date, start_minute, end_minute, purpose, status, decided_by, created_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            reservation_id: row.get(0)?,
            classroom_id: row.get(1)?,
            requested_by: row.get(2)?,
            semester: row.get(3)?,
            date: row.get(4)?,
            start_minute: row.get(5)?,
            end_minute: row.get(6)?,
            purpose: row.get(7)?,
            status: row.get(8)?,
            decided_by: row.get(9)?,
            created_at: row.get(10)?,
        })
    }
}

impl TryFrom<DbReservation> for Reservation {
    type Error = StoreError;

    fn try_from(row: DbReservation) -> Result<Self, Self::Error> {
        let status: ReservationStatus = row
            .status
            .parse()
            .map_err(|message| StoreError::Corrupt { message })?;
        Ok(Reservation {
            id: row.reservation_id,
            classroom_id: row.classroom_id,
            requested_by: row.requested_by,
            semester: row.semester,
            date: row.date,
            start: ClockTime::from_minutes(row.start_minute)?,
            end: ClockTime::from_minutes(row.end_minute)?,
            purpose: row.purpose,
            status,
            decided_by: row.decided_by,
            created_at: row.created_at,
        })
    }
}
