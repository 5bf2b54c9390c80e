/// Service configuration loaded from a JSON file, with environment overrides
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::schedule::ClockTime;
use crate::semester::{parse_semester, Term};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub db_path: String,
    pub bind_address: String,
    pub calendar: CalendarConfig,
    /// Upper bound on student-record, advisor and settings lookups
    pub collaborator_timeout_ms: u64,
    /// Explicit first and last teaching day per semester, for calendar export
    pub semesters: HashMap<String, SemesterDates>,
}

/// Shape of the teaching day the timetable generator fills.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    pub block_minutes: u16,
    pub day_start: ClockTime,
    pub day_end: ClockTime,
    pub lunch_start: ClockTime,
    pub lunch_end: ClockTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemesterDates {
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: "registrar.db".to_string(),
            bind_address: "127.0.0.1:8080".to_string(),
            calendar: CalendarConfig::default(),
            collaborator_timeout_ms: 2_000,
            semesters: HashMap::new(),
        }
    }
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            block_minutes: 60,
            day_start: ClockTime::on_the_hour(9),
            day_end: ClockTime::on_the_hour(17),
            lunch_start: ClockTime::on_the_hour(12),
            lunch_end: ClockTime::on_the_hour(13),
        }
    }
}

impl AppConfig {
    /// Loads configuration from the path given as the first CLI argument or in
    /// `REGISTRAR_CONFIG`, falling back to defaults when neither is set.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::args()
            .nth(1)
            .or_else(|| std::env::var("REGISTRAR_CONFIG").ok());

        let mut config = match path {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(db_path) = std::env::var("REGISTRAR_DB_PATH") {
            self.db_path = db_path;
        }
        if let Ok(bind) = std::env::var("REGISTRAR_BIND") {
            self.bind_address = bind;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let cal = &self.calendar;
        if cal.block_minutes == 0 {
            return Err(ConfigError::Invalid {
                message: "calendar.block_minutes must be positive".to_string(),
            });
        }
        if cal.day_start >= cal.day_end {
            return Err(ConfigError::Invalid {
                message: format!(
                    "calendar.day_start {} must be before day_end {}",
                    cal.day_start, cal.day_end
                ),
            });
        }
        if cal.lunch_start > cal.lunch_end {
            return Err(ConfigError::Invalid {
                message: "calendar.lunch_start must not be after lunch_end".to_string(),
            });
        }
        for (semester, dates) in &self.semesters {
            if dates.starts_on > dates.ends_on {
                return Err(ConfigError::Invalid {
                    message: format!("semester {semester} ends before it starts"),
                });
            }
        }
        Ok(())
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }

    /// Teaching period of a semester: the configured dates, else dates derived from the term.
    pub fn semester_dates(&self, semester: &str) -> Option<SemesterDates> {
        if let Some(dates) = self.semesters.get(semester) {
            return Some(*dates);
        }
        let (year, term) = parse_semester(semester)?;
        let (start, end) = match term {
            Term::Spring => ((2, 10), (5, 30)),
            Term::Summer => ((6, 15), (8, 15)),
            Term::Fall => ((9, 15), (12, 31)),
        };
        Some(SemesterDates {
            starts_on: NaiveDate::from_ymd_opt(year, start.0, start.1)?,
            ends_on: NaiveDate::from_ymd_opt(year, end.0, end.1)?,
        })
    }
}

impl SemesterDates {
    /// First date on or after the semester start that falls on `weekday`.
    pub fn first_on_or_after(&self, weekday: chrono::Weekday) -> NaiveDate {
        let from = self.starts_on.weekday().num_days_from_monday() as i64;
        let to = weekday.num_days_from_monday() as i64;
        let offset = (to - from).rem_euclid(7);
        self.starts_on + chrono::Duration::days(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = AppConfig::from_json(
            r#"{ "db_path": "/tmp/x.db", "calendar": { "block_minutes": 90 } }"#,
        )
        .unwrap();
        assert_eq!(config.db_path, "/tmp/x.db");
        assert_eq!(config.bind_address, "127.0.0.1:8080");
        assert_eq!(config.calendar.block_minutes, 90);
        assert_eq!(config.calendar.day_start.to_string(), "09:00");
    }

    #[test]
    fn test_invalid_calendar_rejected() {
        let err = AppConfig::from_json(
            r#"{ "calendar": { "day_start": "17:00", "day_end": "09:00" } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(AppConfig::from_json(r#"{ "calendar": { "block_minutes": 0 } }"#).is_err());
    }

    #[test]
    fn test_semester_dates_derived_and_overridden() {
        let mut config = AppConfig::default();
        let spring = config.semester_dates("2025-SPRING").unwrap();
        assert_eq!(spring.starts_on, NaiveDate::from_ymd_opt(2025, 2, 10).unwrap());
        assert!(config.semester_dates("spring").is_none());

        let custom = SemesterDates {
            starts_on: NaiveDate::from_ymd_opt(2025, 1, 20).unwrap(),
            ends_on: NaiveDate::from_ymd_opt(2025, 5, 10).unwrap(),
        };
        config.semesters.insert("2025-SPRING".to_string(), custom);
        assert_eq!(config.semester_dates("2025-SPRING"), Some(custom));
    }

    #[test]
    fn test_first_weekday_on_or_after() {
        // 2025-02-10 is a Monday
        let dates = AppConfig::default().semester_dates("2025-SPRING").unwrap();
        assert_eq!(
            dates.first_on_or_after(chrono::Weekday::Mon),
            NaiveDate::from_ymd_opt(2025, 2, 10).unwrap()
        );
        assert_eq!(
            dates.first_on_or_after(chrono::Weekday::Fri),
            NaiveDate::from_ymd_opt(2025, 2, 14).unwrap()
        );
    }
}
