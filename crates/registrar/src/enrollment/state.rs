//! Enrollment status and its transition table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Status of an enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    /// Waiting for the advisor; already holds a seat
    Pending,
    /// Approved and counted in the section
    Active,
    /// Refused by the advisor
    Rejected,
    /// Withdrawn by the student or removed by an admin
    Dropped,
}

/// A status change outside the transition table.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Invalid enrollment transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: EnrollmentStatus,
    pub to: EnrollmentStatus,
}

impl EnrollmentStatus {
    /// The only permitted edges. Everything else, including self-loops, is rejected.
    const TRANSITIONS: [(EnrollmentStatus, EnrollmentStatus); 4] = [
        (EnrollmentStatus::Pending, EnrollmentStatus::Active),
        (EnrollmentStatus::Pending, EnrollmentStatus::Rejected),
        (EnrollmentStatus::Pending, EnrollmentStatus::Dropped),
        (EnrollmentStatus::Active, EnrollmentStatus::Dropped),
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EnrollmentStatus::Pending => "PENDING",
            EnrollmentStatus::Active => "ACTIVE",
            EnrollmentStatus::Rejected => "REJECTED",
            EnrollmentStatus::Dropped => "DROPPED",
        }
    }

    pub fn can_transition_to(self, to: EnrollmentStatus) -> bool {
        Self::TRANSITIONS.contains(&(self, to))
    }

    /// Validates a status change against the transition table.
    pub fn transition(self, to: EnrollmentStatus) -> Result<EnrollmentStatus, InvalidTransition> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }

    /// REJECTED and DROPPED have no outgoing edges.
    pub fn is_terminal(self) -> bool {
        matches!(self, EnrollmentStatus::Rejected | EnrollmentStatus::Dropped)
    }

    /// PENDING reserves a seat just like ACTIVE does.
    pub fn holds_seat(self) -> bool {
        matches!(self, EnrollmentStatus::Pending | EnrollmentStatus::Active)
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnrollmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(EnrollmentStatus::Pending),
            "ACTIVE" => Ok(EnrollmentStatus::Active),
            "REJECTED" => Ok(EnrollmentStatus::Rejected),
            "DROPPED" => Ok(EnrollmentStatus::Dropped),
            other => Err(format!("unknown enrollment status {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::EnrollmentStatus::*;
    use super::*;

    const ALL: [EnrollmentStatus; 4] = [Pending, Active, Rejected, Dropped];

    #[test]
    fn test_transition_table() {
        let allowed = [
            (Pending, Active),
            (Pending, Rejected),
            (Pending, Dropped),
            (Active, Dropped),
        ];
        for from in ALL {
            for to in ALL {
                let expected = allowed.contains(&(from, to));
                assert_eq!(
                    from.transition(to).is_ok(),
                    expected,
                    "{from} -> {to} should be {}",
                    if expected { "allowed" } else { "rejected" }
                );
            }
        }
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in [Rejected, Dropped] {
            assert!(from.is_terminal());
            assert!(ALL.iter().all(|to| !from.can_transition_to(*to)));
        }
        assert!(!Pending.is_terminal());
        assert!(!Active.is_terminal());
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<EnrollmentStatus>().unwrap(), status);
        }
        assert!("APPROVED".parse::<EnrollmentStatus>().is_err());
        assert_eq!(serde_json::to_string(&Pending).unwrap(), "\"PENDING\"");
    }
}
