use crate::config::CalendarConfig;
use crate::schedule::{ranges_overlap, ClockTime, Day, WeeklyInterval};

use super::PreferredTimeSlot;

/// Blocks of one teaching day, skipping any that would run into the lunch break.
fn day_blocks(calendar: &CalendarConfig) -> Vec<(ClockTime, ClockTime)> {
    let lunch = (calendar.lunch_start, calendar.lunch_end);
    let has_lunch = calendar.lunch_start < calendar.lunch_end;
    let mut blocks = Vec::new();
    let mut start = calendar.day_start;

    while let Some(end) = start.checked_add(calendar.block_minutes) {
        if end > calendar.day_end {
            break;
        }
        if has_lunch && ranges_overlap((start, end), lunch) {
            // overlap implies start < lunch_end, so this always moves forward
            start = calendar.lunch_end;
            continue;
        }
        blocks.push((start, end));
        start = end;
    }
    blocks
}

/// The fixed candidate catalog: every block of the working week, those inside the
/// preferred window first, each group in day-then-time order.
pub fn candidate_blocks(
    calendar: &CalendarConfig,
    preferred: PreferredTimeSlot,
) -> Vec<WeeklyInterval> {
    let blocks = day_blocks(calendar);
    let all = Day::ALL.into_iter().flat_map(|day| {
        blocks.iter().map(move |&(start, end)| WeeklyInterval { day, start, end })
    });

    match preferred.window() {
        None => all.collect(),
        Some((from, to)) => {
            let (mut inside, outside): (Vec<_>, Vec<_>) =
                all.partition(|block| from <= block.start && block.end <= to);
            inside.extend(outside);
            inside
        }
    }
}
