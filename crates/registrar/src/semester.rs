//! Semester keys such as `2025-SPRING`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static SEMESTER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-(SPRING|SUMMER|FALL)$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Term {
    Spring,
    Summer,
    Fall,
}

/// Splits a semester key into its year and term. Returns `None` for malformed keys.
pub fn parse_semester(key: &str) -> Option<(i32, Term)> {
    let caps = SEMESTER_REGEX.captures(key)?;
    let year = caps.get(1)?.as_str().parse().ok()?;
    let term = match caps.get(2)?.as_str() {
        "SPRING" => Term::Spring,
        "SUMMER" => Term::Summer,
        "FALL" => Term::Fall,
        _ => return None,
    };
    Some((year, term))
}

pub fn is_valid_semester(key: &str) -> bool {
    SEMESTER_REGEX.is_match(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_semester() {
        assert_eq!(parse_semester("2025-SPRING"), Some((2025, Term::Spring)));
        assert_eq!(parse_semester("1999-FALL"), Some((1999, Term::Fall)));
        assert_eq!(parse_semester("2025-spring"), None);
        assert_eq!(parse_semester("25-FALL"), None);
        assert_eq!(parse_semester("2025-WINTER"), None);
        assert_eq!(parse_semester(" 2025-FALL"), None);
    }

    #[test]
    fn test_is_valid_semester() {
        assert!(is_valid_semester("2026-SUMMER"));
        assert!(!is_valid_semester(""));
        assert!(!is_valid_semester("2026-SUMMER; DROP TABLE sections"));
    }
}
