//! Ad-hoc classroom reservations.
//!
//! A reservation books one room on one date. It may not overlap an approved reservation
//! of the same room, nor a class meeting held in that room on that weekday while the
//! semester is in session. Conflicts are checked when the request is made and again on
//! approval, since other reservations may have been approved in between.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::conflict::{ConflictIndex, Owner};
use crate::db::Store;
use crate::error::{ReservationError, StoreError};
use crate::locks::LockRegistry;
use crate::model::{ClassroomId, ReservationId, SectionId};
use crate::schedule::{ranges_overlap, ClockTime, Day, IntervalError, WeeklyInterval};
use crate::semester::is_valid_semester;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "PENDING",
            ReservationStatus::Approved => "APPROVED",
            ReservationStatus::Rejected => "REJECTED",
            ReservationStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ReservationStatus::Pending),
            "APPROVED" => Ok(ReservationStatus::Approved),
            "REJECTED" => Ok(ReservationStatus::Rejected),
            "CANCELLED" => Ok(ReservationStatus::Cancelled),
            other => Err(format!("unknown reservation status {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub classroom_id: ClassroomId,
    pub requested_by: i64,
    pub semester: String,
    pub date: NaiveDate,
    pub start: ClockTime,
    pub end: ClockTime,
    pub purpose: String,
    pub status: ReservationStatus,
    pub decided_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Body of a reservation request.
#[derive(Debug, Clone, Deserialize)]
pub struct ReservationRequest {
    pub classroom_id: ClassroomId,
    pub requested_by: i64,
    pub semester: String,
    pub date: NaiveDate,
    pub start: ClockTime,
    pub end: ClockTime,
    pub purpose: String,
}

/// What a reservation collides with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReservationConflict {
    Reservation {
        reservation_id: ReservationId,
        start: ClockTime,
        end: ClockTime,
    },
    Class {
        section_id: SectionId,
        interval: WeeklyInterval,
    },
}

/// The booking window being checked.
struct Booking<'a> {
    classroom_id: ClassroomId,
    semester: &'a str,
    date: NaiveDate,
    start: ClockTime,
    end: ClockTime,
}

pub struct ReservationDesk {
    store: Arc<Store>,
    index: Arc<ConflictIndex>,
    locks: Arc<LockRegistry>,
    config: Arc<AppConfig>,
}

impl ReservationDesk {
    pub fn new(
        store: Arc<Store>,
        index: Arc<ConflictIndex>,
        locks: Arc<LockRegistry>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            store,
            index,
            locks,
            config,
        }
    }

    /// Creates a PENDING reservation if the room is free for the requested window.
    pub async fn request(
        &self,
        request: ReservationRequest,
    ) -> Result<Reservation, ReservationError> {
        let dates = is_valid_semester(&request.semester)
            .then(|| self.config.semester_dates(&request.semester))
            .flatten();
        let Some(dates) = dates else {
            return Err(ReservationError::InvalidSemester {
                semester: request.semester,
            });
        };
        if request.date < dates.starts_on || request.date > dates.ends_on {
            return Err(ReservationError::DateOutsideSemester {
                date: request.date,
                semester: request.semester,
            });
        }
        if request.start >= request.end {
            return Err(IntervalError::EmptyRange {
                start: request.start,
                end: request.end,
            }
            .into());
        }
        if request.purpose.trim().is_empty() {
            return Err(ReservationError::MissingPurpose);
        }
        if self.store.classroom(request.classroom_id)?.is_none() {
            return Err(ReservationError::ClassroomNotFound {
                classroom_id: request.classroom_id,
            });
        }

        let room_lock = self.locks.classroom(request.classroom_id);
        let _room = room_lock.lock().await;
        let semester_lock = self.locks.semester(&request.semester);
        let _semester = semester_lock.read().await;

        let booking = Booking {
            classroom_id: request.classroom_id,
            semester: &request.semester,
            date: request.date,
            start: request.start,
            end: request.end,
        };
        let conflicts = self.conflicts(&booking, None)?;
        if !conflicts.is_empty() {
            return Err(ReservationError::Conflict { conflicts });
        }

        let reservation = self.store.insert_reservation(&request, Utc::now())?;
        info!(
            reservation_id = reservation.id,
            classroom_id = reservation.classroom_id,
            date = %reservation.date,
            "Classroom reservation requested"
        );
        Ok(reservation)
    }

    /// Approves a PENDING reservation after checking conflicts again.
    pub async fn approve(
        &self,
        reservation_id: ReservationId,
        approver: i64,
    ) -> Result<Reservation, ReservationError> {
        let found = self.find(reservation_id)?;
        let room_lock = self.locks.classroom(found.classroom_id);
        let _room = room_lock.lock().await;
        let semester_lock = self.locks.semester(&found.semester);
        let _semester = semester_lock.read().await;

        let current = self.find(reservation_id)?;
        if current.status != ReservationStatus::Pending {
            return Err(ReservationError::NotPending {
                status: current.status,
            });
        }

        let booking = Booking {
            classroom_id: current.classroom_id,
            semester: &current.semester,
            date: current.date,
            start: current.start,
            end: current.end,
        };
        let conflicts = self.conflicts(&booking, Some(reservation_id))?;
        if !conflicts.is_empty() {
            warn!(
                reservation_id,
                conflicts = conflicts.len(),
                "Reservation no longer fits, refusing approval"
            );
            return Err(ReservationError::Conflict { conflicts });
        }

        self.move_status(
            reservation_id,
            ReservationStatus::Pending,
            ReservationStatus::Approved,
            Some(approver),
        )
    }

    pub async fn reject(
        &self,
        reservation_id: ReservationId,
        approver: i64,
    ) -> Result<Reservation, ReservationError> {
        let found = self.find(reservation_id)?;
        let room_lock = self.locks.classroom(found.classroom_id);
        let _room = room_lock.lock().await;

        let current = self.find(reservation_id)?;
        if current.status != ReservationStatus::Pending {
            return Err(ReservationError::NotPending {
                status: current.status,
            });
        }
        self.move_status(
            reservation_id,
            ReservationStatus::Pending,
            ReservationStatus::Rejected,
            Some(approver),
        )
    }

    /// Cancels a PENDING or APPROVED reservation. Cancelling twice is a no-op.
    pub async fn cancel(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Reservation, ReservationError> {
        let found = self.find(reservation_id)?;
        let room_lock = self.locks.classroom(found.classroom_id);
        let _room = room_lock.lock().await;

        let current = self.find(reservation_id)?;
        match current.status {
            ReservationStatus::Cancelled => Ok(current),
            ReservationStatus::Rejected => Err(ReservationError::NotPending {
                status: current.status,
            }),
            from => self.move_status(reservation_id, from, ReservationStatus::Cancelled, None),
        }
    }

    fn find(&self, reservation_id: ReservationId) -> Result<Reservation, ReservationError> {
        self.store
            .reservation(reservation_id)?
            .ok_or(ReservationError::NotFound { reservation_id })
    }

    fn move_status(
        &self,
        reservation_id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
        decided_by: Option<i64>,
    ) -> Result<Reservation, ReservationError> {
        match self
            .store
            .set_reservation_status(reservation_id, from, to, decided_by)?
        {
            Some(reservation) => {
                info!(reservation_id, status = %to, "Reservation updated");
                Ok(reservation)
            }
            None => {
                let current = self.find(reservation_id)?;
                Err(ReservationError::NotPending {
                    status: current.status,
                })
            }
        }
    }

    fn conflicts(
        &self,
        booking: &Booking<'_>,
        exclude: Option<ReservationId>,
    ) -> Result<Vec<ReservationConflict>, StoreError> {
        let mut conflicts: Vec<ReservationConflict> = self
            .store
            .approved_reservations(booking.classroom_id, booking.date)?
            .into_iter()
            .filter(|r| Some(r.id) != exclude)
            .filter(|r| ranges_overlap((r.start, r.end), (booking.start, booking.end)))
            .map(|r| ReservationConflict::Reservation {
                reservation_id: r.id,
                start: r.start,
                end: r.end,
            })
            .collect();

        // The date was checked to lie within the semester when the request was made
        if let Some(day) = Day::from_weekday(booking.date.weekday()) {
            if let Ok(interval) = WeeklyInterval::new(day, booking.start, booking.end) {
                conflicts.extend(
                    self.index
                        .conflicts(booking.semester, Owner::Room(booking.classroom_id), &interval)
                        .into_iter()
                        .map(|o| ReservationConflict::Class {
                            section_id: o.section_id,
                            interval: o.interval,
                        }),
                );
            }
        }
        Ok(conflicts)
    }
}
