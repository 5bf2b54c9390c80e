//! Conflict index: who is busy when.
//!
//! For every `(semester, owner)` pair the index keeps the weekly intervals that owner is
//! committed to, each tagged with the section that put it there. Owners are instructors,
//! classrooms and students. The index is derived data: it can always be thrown away and
//! rebuilt from persisted section schedules and seat-holding enrollments.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

use crate::model::{ClassroomId, InstructorId, Section, SectionId, StudentId};
use crate::schedule::{ClockTime, Day, WeeklyInterval};

/// Something that cannot be in two places at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Owner {
    Instructor(InstructorId),
    Room(ClassroomId),
    Student(StudentId),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct IndexKey {
    semester: String,
    owner: Owner,
}

impl IndexKey {
    fn new(semester: &str, owner: Owner) -> Self {
        Self {
            semester: semester.to_string(),
            owner,
        }
    }
}

/// An interval held on behalf of a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Occupancy {
    pub section_id: SectionId,
    pub interval: WeeklyInterval,
}

/// Non-overlapping intervals ordered by `(day, start)`.
#[derive(Debug, Clone, Default)]
pub struct IntervalSet {
    entries: BTreeMap<(Day, ClockTime), Occupancy>,
}

impl IntervalSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries overlapping `interval`.
    ///
    /// Since entries never overlap each other, only those starting before `interval.end`
    /// on the same day can qualify; of those, the ones ending after `interval.start` do.
    pub fn overlapping<'a>(
        &'a self,
        interval: &'a WeeklyInterval,
    ) -> impl Iterator<Item = &'a Occupancy> + 'a {
        self.entries
            .range((interval.day, ClockTime::MIDNIGHT)..(interval.day, interval.end))
            .map(|(_, occupancy)| occupancy)
            .filter(move |occupancy| occupancy.interval.overlaps(interval))
    }

    pub fn is_free(&self, interval: &WeeklyInterval) -> bool {
        self.overlapping(interval).next().is_none()
    }

    /// Inserts an occupancy, or returns the first entry it would overlap.
    pub fn insert(&mut self, occupancy: Occupancy) -> Result<(), Occupancy> {
        if let Some(existing) = self.overlapping(&occupancy.interval).next() {
            return Err(*existing);
        }
        self.entries.insert(
            (occupancy.interval.day, occupancy.interval.start),
            occupancy,
        );
        Ok(())
    }

    /// Removes every interval tagged with `section_id`, returning how many were removed.
    pub fn remove_section(&mut self, section_id: SectionId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, o| o.section_id != section_id);
        before - self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Occupancy> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Counters from a rebuild, for startup logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildStats {
    pub intervals: usize,
    /// Persisted intervals that overlapped something already indexed
    pub collisions: usize,
}

/// Thread-safe conflict index.
///
/// Uses DashMap so readers of different owners never contend. Callers serialize
/// writers through the semester and student locks.
#[derive(Debug, Default)]
pub struct ConflictIndex {
    entries: DashMap<IndexKey, IntervalSet>,
}

impl ConflictIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_free(&self, semester: &str, owner: Owner, interval: &WeeklyInterval) -> bool {
        self.entries
            .get(&IndexKey::new(semester, owner))
            .map_or(true, |set| set.is_free(interval))
    }

    /// Every committed interval of `owner` that overlaps `interval`.
    pub fn conflicts(
        &self,
        semester: &str,
        owner: Owner,
        interval: &WeeklyInterval,
    ) -> Vec<Occupancy> {
        self.entries
            .get(&IndexKey::new(semester, owner))
            .map(|set| set.overlapping(interval).copied().collect())
            .unwrap_or_default()
    }

    /// Commits a single interval.
    pub fn reserve(
        &self,
        semester: &str,
        owner: Owner,
        occupancy: Occupancy,
    ) -> Result<(), Occupancy> {
        self.entries
            .entry(IndexKey::new(semester, owner))
            .or_default()
            .insert(occupancy)
    }

    /// Commits all intervals of a section for one owner, or none of them.
    ///
    /// On failure returns the refused interval and the entry in its way.
    pub fn reserve_all(
        &self,
        semester: &str,
        owner: Owner,
        section_id: SectionId,
        intervals: &[WeeklyInterval],
    ) -> Result<(), (WeeklyInterval, Occupancy)> {
        let mut set = self.entries.entry(IndexKey::new(semester, owner)).or_default();
        let mut staged = set.clone();
        for interval in intervals {
            staged
                .insert(Occupancy {
                    section_id,
                    interval: *interval,
                })
                .map_err(|existing| (*interval, existing))?;
        }
        *set = staged;
        Ok(())
    }

    /// Releases every interval `owner` holds for `section_id`.
    pub fn release(&self, semester: &str, owner: Owner, section_id: SectionId) -> usize {
        let key = IndexKey::new(semester, owner);
        let removed = match self.entries.get_mut(&key) {
            Some(mut set) => set.remove_section(section_id),
            None => return 0,
        };
        self.entries.remove_if(&key, |_, set| set.is_empty());
        removed
    }

    /// Intervals currently held by `owner`, in `(day, start)` order.
    pub fn occupancies(&self, semester: &str, owner: Owner) -> Vec<Occupancy> {
        self.entries
            .get(&IndexKey::new(semester, owner))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Commits a placed section's slots for its instructor and rooms.
    pub fn commit_section(&self, section: &Section) -> usize {
        let mut collisions = 0;
        for slot in &section.schedule {
            let occupancy = Occupancy {
                section_id: section.id,
                interval: slot.interval(),
            };
            let owners = section
                .instructor_id
                .map(Owner::Instructor)
                .into_iter()
                .chain(slot.room_id.map(Owner::Room));
            for owner in owners {
                if let Err(existing) = self.reserve(&section.semester, owner, occupancy) {
                    collisions += 1;
                    warn!(
                        semester = %section.semester,
                        section_id = section.id,
                        owner = ?owner,
                        interval = %occupancy.interval,
                        existing_section = existing.section_id,
                        "Persisted slot overlaps an indexed interval"
                    );
                }
            }
        }
        collisions
    }

    /// Drops everything indexed for a semester.
    pub fn clear_semester(&self, semester: &str) {
        self.entries.retain(|key, _| key.semester != semester);
    }

    /// Rebuilds a semester's instructor and room entries from `sections`. Students' seats
    /// are left as they are.
    pub fn rebuild_schedules(&self, semester: &str, sections: &[Section]) -> RebuildStats {
        self.entries.retain(|key, _| {
            key.semester != semester || matches!(key.owner, Owner::Student(_))
        });
        let mut stats = RebuildStats::default();
        for section in sections.iter().filter(|s| s.semester == semester) {
            stats.intervals += section.schedule.len();
            stats.collisions += self.commit_section(section);
        }
        stats
    }

    /// Rebuilds a semester from persisted sections and `(student, section)` seat holders.
    pub fn rebuild_semester(
        &self,
        semester: &str,
        sections: &[Section],
        seat_holders: &[(StudentId, SectionId)],
    ) -> RebuildStats {
        self.clear_semester(semester);
        let mut stats = self.rebuild_schedules(semester, sections);

        let by_id: BTreeMap<SectionId, &Section> = sections.iter().map(|s| (s.id, s)).collect();
        for (student_id, section_id) in seat_holders {
            let Some(section) = by_id.get(section_id) else {
                continue;
            };
            for slot in &section.schedule {
                stats.intervals += 1;
                let occupancy = Occupancy {
                    section_id: *section_id,
                    interval: slot.interval(),
                };
                if self
                    .reserve(semester, Owner::Student(*student_id), occupancy)
                    .is_err()
                {
                    stats.collisions += 1;
                    warn!(
                        semester = %semester,
                        student_id = *student_id,
                        section_id = *section_id,
                        interval = %occupancy.interval,
                        "Student holds seats in overlapping sections"
                    );
                }
            }
        }

        stats
    }
}
