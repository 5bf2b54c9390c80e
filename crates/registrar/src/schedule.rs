//! Weekly interval model.
//!
//! Every schedule in the registrar is a set of `(day, start, end)` intervals that repeat
//! weekly. The same overlap test backs the timetable generator, the conflict index and
//! classroom reservations, so it lives here and nowhere else.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ClassroomId;

/// Errors produced while building interval values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntervalError {
    /// Time text was not `HH:MM` or was outside the day.
    #[error("Invalid clock time: {input}")]
    InvalidTime { input: String },

    /// Day text or number did not name a working day.
    #[error("Invalid day: {input}")]
    InvalidDay { input: String },

    /// `start` was not strictly before `end`.
    #[error("Empty time range: {start}-{end}")]
    EmptyRange { start: ClockTime, end: ClockTime },
}

/// A working day. Classes only meet Monday through Friday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Day {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
}

impl Day {
    pub const ALL: [Day; 5] = [
        Day::Monday,
        Day::Tuesday,
        Day::Wednesday,
        Day::Thursday,
        Day::Friday,
    ];

    /// ISO day number (Monday = 1), which is how days are stored.
    pub fn number(self) -> u8 {
        match self {
            Day::Monday => 1,
            Day::Tuesday => 2,
            Day::Wednesday => 3,
            Day::Thursday => 4,
            Day::Friday => 5,
        }
    }

    pub fn from_number(n: u8) -> Result<Self, IntervalError> {
        match n {
            1 => Ok(Day::Monday),
            2 => Ok(Day::Tuesday),
            3 => Ok(Day::Wednesday),
            4 => Ok(Day::Thursday),
            5 => Ok(Day::Friday),
            _ => Err(IntervalError::InvalidDay {
                input: n.to_string(),
            }),
        }
    }

    /// Maps a calendar weekday onto a working day. Weekends have no counterpart.
    pub fn from_weekday(weekday: chrono::Weekday) -> Option<Self> {
        Day::from_number(weekday.number_from_monday() as u8).ok()
    }

    pub fn to_weekday(self) -> chrono::Weekday {
        match self {
            Day::Monday => chrono::Weekday::Mon,
            Day::Tuesday => chrono::Weekday::Tue,
            Day::Wednesday => chrono::Weekday::Wed,
            Day::Thursday => chrono::Weekday::Thu,
            Day::Friday => chrono::Weekday::Fri,
        }
    }

    /// Two-letter iCalendar day code.
    pub fn ical_code(self) -> &'static str {
        match self {
            Day::Monday => "MO",
            Day::Tuesday => "TU",
            Day::Wednesday => "WE",
            Day::Thursday => "TH",
            Day::Friday => "FR",
        }
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Day::Monday => "Monday",
            Day::Tuesday => "Tuesday",
            Day::Wednesday => "Wednesday",
            Day::Thursday => "Thursday",
            Day::Friday => "Friday",
        };
        f.write_str(name)
    }
}

/// Minute of the day, `0..=1440`. Serialized as `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClockTime(u16);

impl ClockTime {
    pub const MIDNIGHT: ClockTime = ClockTime(0);
    pub const END_OF_DAY: ClockTime = ClockTime(24 * 60);

    pub fn from_minutes(minutes: u16) -> Result<Self, IntervalError> {
        if minutes > Self::END_OF_DAY.0 {
            return Err(IntervalError::InvalidTime {
                input: minutes.to_string(),
            });
        }
        Ok(Self(minutes))
    }

    /// `hour:00`, clamped to the end of the day.
    pub const fn on_the_hour(hour: u16) -> Self {
        if hour >= 24 {
            Self::END_OF_DAY
        } else {
            Self(hour * 60)
        }
    }

    pub fn hm(hour: u16, minute: u16) -> Result<Self, IntervalError> {
        let invalid = || IntervalError::InvalidTime {
            input: format!("{hour}:{minute}"),
        };
        if minute >= 60 || hour > 24 {
            return Err(invalid());
        }
        let minutes = hour
            .checked_mul(60)
            .and_then(|m| m.checked_add(minute))
            .ok_or_else(invalid)?;
        Self::from_minutes(minutes)
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    pub fn hour(self) -> u16 {
        self.0 / 60
    }

    pub fn minute(self) -> u16 {
        self.0 % 60
    }

    /// Adds minutes, returning `None` past the end of the day.
    pub fn checked_add(self, minutes: u16) -> Option<Self> {
        let total = self.0.checked_add(minutes)?;
        (total <= Self::END_OF_DAY.0).then_some(Self(total))
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for ClockTime {
    type Err = IntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || IntervalError::InvalidTime {
            input: s.to_string(),
        };
        let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
        let hour: u16 = h.parse().map_err(|_| invalid())?;
        // "09:00:00" as stored by some SQL TIME columns is accepted too
        let m = m.split(':').next().unwrap_or(m);
        let minute: u16 = m.parse().map_err(|_| invalid())?;
        Self::hm(hour, minute).map_err(|_| invalid())
    }
}

impl TryFrom<String> for ClockTime {
    type Error = IntervalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ClockTime> for String {
    fn from(value: ClockTime) -> Self {
        value.to_string()
    }
}

/// Half-open overlap test on `[start, end)` ranges. Back-to-back ranges do not overlap.
pub fn ranges_overlap(a: (ClockTime, ClockTime), b: (ClockTime, ClockTime)) -> bool {
    a.0.max(b.0) < a.1.min(b.1)
}

/// A `[start, end)` range on one working day, repeating every week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WeeklyInterval {
    pub day: Day,
    pub start: ClockTime,
    pub end: ClockTime,
}

impl WeeklyInterval {
    pub fn new(day: Day, start: ClockTime, end: ClockTime) -> Result<Self, IntervalError> {
        if start >= end {
            return Err(IntervalError::EmptyRange { start, end });
        }
        Ok(Self { day, start, end })
    }

    pub fn overlaps(&self, other: &WeeklyInterval) -> bool {
        self.day == other.day && ranges_overlap((self.start, self.end), (other.start, other.end))
    }

    /// True when the two intervals share a day and one ends exactly where the other starts.
    pub fn is_adjacent_to(&self, other: &WeeklyInterval) -> bool {
        self.day == other.day && (self.end == other.start || other.end == self.start)
    }

}

impl fmt::Display for WeeklyInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}-{}", self.day, self.start, self.end)
    }
}

/// One weekly meeting of a section, optionally bound to a classroom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSlot {
    pub day: Day,
    pub start: ClockTime,
    pub end: ClockTime,
    /// A section can hold a time without a room when no classroom fits.
    pub room_id: Option<ClassroomId>,
}

impl TimeSlot {
    pub fn new(interval: WeeklyInterval, room_id: Option<ClassroomId>) -> Self {
        Self {
            day: interval.day,
            start: interval.start,
            end: interval.end,
            room_id,
        }
    }

    pub fn interval(&self) -> WeeklyInterval {
        WeeklyInterval {
            day: self.day,
            start: self.start,
            end: self.end,
        }
    }
}
