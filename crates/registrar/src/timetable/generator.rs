use std::collections::BTreeSet;

use crate::conflict::{ConflictIndex, Owner};
use crate::model::{Classroom, ClassroomId, Section};
use crate::schedule::{Day, TimeSlot, WeeklyInterval};

use super::UnplacedReason;

/// Picks `required` blocks (and rooms) for one section against the current index.
///
/// `rooms` must be ordered smallest first; the first free room that can hold the section
/// wins. The index is only read here. The caller commits the result.
///
/// Blocks go on distinct days first. Only if that falls short does a day take another
/// block, and then only one touching a block already picked that day, so same-day
/// meetings stay contiguous. An unassigned instructor never conflicts.
pub fn plan_section(
    index: &ConflictIndex,
    section: &Section,
    required: usize,
    candidates: &[WeeklyInterval],
    rooms: &[Classroom],
    allow_roomless: bool,
) -> Result<Vec<TimeSlot>, UnplacedReason> {
    let eligible: Vec<ClassroomId> = rooms
        .iter()
        .filter(|room| room.capacity >= section.capacity)
        .map(|room| room.id)
        .collect();
    if eligible.is_empty() && !allow_roomless {
        return Err(UnplacedReason::NoRoomLargeEnough);
    }

    let semester = section.semester.as_str();
    let fits = |block: &WeeklyInterval| -> Option<Option<ClassroomId>> {
        if let Some(instructor) = section.instructor_id {
            if !index.is_free(semester, Owner::Instructor(instructor), block) {
                return None;
            }
        }
        if eligible.is_empty() {
            return Some(None);
        }
        eligible
            .iter()
            .find(|room| index.is_free(semester, Owner::Room(**room), block))
            .map(|room| Some(*room))
    };

    let mut picked: Vec<TimeSlot> = Vec::with_capacity(required);
    let mut used_days: BTreeSet<Day> = BTreeSet::new();

    for block in candidates {
        if picked.len() == required {
            break;
        }
        if used_days.contains(&block.day) {
            continue;
        }
        if let Some(room) = fits(block) {
            picked.push(TimeSlot::new(*block, room));
            used_days.insert(block.day);
        }
    }

    let mut progress = true;
    while picked.len() < required && progress {
        progress = false;
        for block in candidates {
            if picked.len() == required {
                break;
            }
            let taken = picked.iter().any(|slot| slot.interval() == *block);
            let touches = picked
                .iter()
                .any(|slot| slot.interval().is_adjacent_to(block));
            if taken || !touches {
                continue;
            }
            if let Some(room) = fits(block) {
                picked.push(TimeSlot::new(*block, room));
                progress = true;
            }
        }
    }

    if picked.len() < required {
        return Err(UnplacedReason::NoFeasibleSlot);
    }
    picked.sort_by_key(|slot| (slot.day, slot.start));
    Ok(picked)
}
