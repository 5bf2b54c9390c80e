//! iCalendar (RFC 5545) export of a semester timetable.
//!
//! Each time slot becomes one weekly recurring event running from its first occurrence
//! on or after the semester start until the semester end. Times are floating local times.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;

use crate::config::SemesterDates;
use crate::model::ClassroomId;
use crate::schedule::{ClockTime, TimeSlot};
use crate::timetable::TimetableEntry;

const CRLF: &str = "\r\n";
/// Content lines longer than this many octets are folded
const MAX_LINE_OCTETS: usize = 75;

pub fn render_calendar(
    semester: &str,
    entries: &[TimetableEntry],
    dates: &SemesterDates,
    room_names: &HashMap<ClassroomId, String>,
    generated_at: DateTime<Utc>,
) -> String {
    let stamp = generated_at.format("%Y%m%dT%H%M%SZ").to_string();
    let until = format!("{}T235959", dates.ends_on.format("%Y%m%d"));

    let mut lines = vec![
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        "PRODID:-//registrar//timetable//EN".to_string(),
        "CALSCALE:GREGORIAN".to_string(),
        format!("X-WR-CALNAME:{}", escape_text(&format!("Timetable {semester}"))),
    ];

    for entry in entries {
        let section = &entry.section;
        for slot in &section.schedule {
            let first = dates.first_on_or_after(slot.day.to_weekday());
            if first > dates.ends_on {
                continue;
            }
            lines.push("BEGIN:VEVENT".to_string());
            lines.push(format!("UID:{}", event_uid(section.id, slot)));
            lines.push(format!("DTSTAMP:{stamp}"));
            lines.push(format!("DTSTART:{}", local_datetime(first, slot.start)));
            lines.push(format!("DTEND:{}", local_datetime(first, slot.end)));
            lines.push(format!(
                "RRULE:FREQ=WEEKLY;BYDAY={};UNTIL={until}",
                slot.day.ical_code()
            ));
            lines.push(format!(
                "SUMMARY:{}",
                escape_text(&format!(
                    "{} section {}",
                    entry.course_code, section.section_number
                ))
            ));
            if let Some(name) = slot.room_id.and_then(|id| room_names.get(&id)) {
                lines.push(format!("LOCATION:{}", escape_text(name)));
            }
            lines.push("END:VEVENT".to_string());
        }
    }
    lines.push("END:VCALENDAR".to_string());

    let mut out = String::new();
    for line in &lines {
        out.push_str(&fold(line));
        out.push_str(CRLF);
    }
    out
}

fn event_uid(section_id: i64, slot: &TimeSlot) -> String {
    format!(
        "section-{section_id}-{}-{:02}{:02}@registrar",
        slot.day.ical_code(),
        slot.start.hour(),
        slot.start.minute()
    )
}

fn local_datetime(date: NaiveDate, time: ClockTime) -> String {
    format!(
        "{}T{:02}{:02}00",
        date.format("%Y%m%d"),
        time.hour(),
        time.minute()
    )
}

/// Escapes TEXT values: backslash, semicolon, comma and newlines.
fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            other => out.push(other),
        }
    }
    out
}

/// Folds a content line at 75 octets without splitting a UTF-8 character.
fn fold(line: &str) -> String {
    if line.len() <= MAX_LINE_OCTETS {
        return line.to_string();
    }
    let mut out = String::with_capacity(line.len() + line.len() / MAX_LINE_OCTETS * 3);
    let mut width = 0;
    for c in line.chars() {
        // continuation lines start with a space, which counts toward their length
        if width + c.len_utf8() > MAX_LINE_OCTETS {
            out.push_str(CRLF);
            out.push(' ');
            width = 1;
        }
        out.push(c);
        width += c.len_utf8();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Section;
    use crate::schedule::{Day, WeeklyInterval};
    use chrono::TimeZone;

    fn entry(code: &str, slots: Vec<TimeSlot>) -> TimetableEntry {
        TimetableEntry {
            course_code: code.to_string(),
            available_seats: 30,
            section: Section {
                id: 12,
                course_id: 1,
                semester: "2025-SPRING".to_string(),
                section_number: 2,
                instructor_id: None,
                capacity: 30,
                enrolled_count: 0,
                schedule: slots,
            },
        }
    }

    fn slot(day: Day, start: &str, end: &str, room: Option<ClassroomId>) -> TimeSlot {
        TimeSlot::new(
            WeeklyInterval::new(day, start.parse().unwrap(), end.parse().unwrap()).unwrap(),
            room,
        )
    }

    fn spring() -> SemesterDates {
        SemesterDates {
            starts_on: NaiveDate::from_ymd_opt(2025, 2, 10).unwrap(),
            ends_on: NaiveDate::from_ymd_opt(2025, 5, 30).unwrap(),
        }
    }

    #[test]
    fn test_weekly_event_per_slot() {
        let rooms = HashMap::from([(4, "CENTR 115".to_string())]);
        let generated = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let ical = render_calendar(
            "2025-SPRING",
            &[entry(
                "CSE 100",
                vec![
                    slot(Day::Monday, "09:00", "10:00", Some(4)),
                    slot(Day::Wednesday, "13:00", "14:00", None),
                ],
            )],
            &spring(),
            &rooms,
            generated,
        );

        assert!(ical.starts_with("BEGIN:VCALENDAR\r\n"));
        assert!(ical.ends_with("END:VCALENDAR\r\n"));
        assert_eq!(ical.matches("BEGIN:VEVENT").count(), 2);
        assert!(ical.contains("DTSTAMP:20250102T030405Z\r\n"));
        assert!(ical.contains("DTSTART:20250210T090000\r\n"));
        assert!(ical.contains("DTEND:20250210T100000\r\n"));
        // First Wednesday of the term
        assert!(ical.contains("DTSTART:20250212T130000\r\n"));
        assert!(ical.contains("RRULE:FREQ=WEEKLY;BYDAY=MO;UNTIL=20250530T235959\r\n"));
        assert!(ical.contains("SUMMARY:CSE 100 section 2\r\n"));
        assert_eq!(ical.matches("LOCATION:").count(), 1);
        assert!(ical.contains("UID:section-12-MO-0900@registrar"));
        assert!(!ical.replace("\r\n", "").contains('\n'));
    }

    #[test]
    fn test_text_escaping() {
        assert_eq!(escape_text("Lab; room 1, east\\wing\n"), "Lab\\; room 1\\, east\\\\wing\\n");
    }

    #[test]
    fn test_long_lines_are_folded() {
        let line = format!("SUMMARY:{}", "é".repeat(60));
        let folded = fold(&line);
        for part in folded.split("\r\n") {
            assert!(part.len() <= MAX_LINE_OCTETS, "{} octets", part.len());
        }
        assert_eq!(folded.replace("\r\n ", ""), line);
    }
}
