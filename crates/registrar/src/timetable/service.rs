use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::{
    candidate_blocks, plan_section, CancelFlag, GenerateOptions, GenerationReport,
    TimetableEntry, UnplacedReason, UnplacedSection,
};
use crate::config::AppConfig;
use crate::conflict::{ConflictIndex, RebuildStats};
use crate::db::Store;
use crate::error::{GenerateError, StoreError};
use crate::export::render_calendar;
use crate::locks::LockRegistry;
use crate::model::{Course, CourseId, Section};
use crate::semester::is_valid_semester;
use crate::util::generate_correlation_id;

/// Runs timetable generation and serves the resulting timetables.
pub struct TimetableService {
    store: Arc<Store>,
    index: Arc<ConflictIndex>,
    locks: Arc<LockRegistry>,
    config: Arc<AppConfig>,
    /// Cancel handle of the run in progress, per semester
    runs: DashMap<String, CancelFlag>,
}

impl TimetableService {
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
            runs: DashMap::new(),
        }
    }

    /// Generates the semester's timetable. The run can be stopped with [`Self::cancel`].
    pub async fn generate(
        &self,
        semester: &str,
        options: &GenerateOptions,
    ) -> Result<GenerationReport, GenerateError> {
        self.generate_with(semester, options, &CancelFlag::new()).await
    }

    /// Requests cancellation of the semester's run in progress. Returns false if none is.
    pub fn cancel(&self, semester: &str) -> bool {
        match self.runs.get(semester) {
            Some(flag) => {
                flag.cancel();
                info!(semester = %semester, "Generation run cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Generation with a caller-supplied cancel flag.
    ///
    /// Holds the semester's write lock for the whole run. The flag is registered for
    /// [`Self::cancel`] only once the lock is held, so a run still waiting for it cannot
    /// be cancelled in place of the one running. A store failure aborts the run; sections
    /// already persisted stay placed.
    pub async fn generate_with(
        &self,
        semester: &str,
        options: &GenerateOptions,
        cancel: &CancelFlag,
    ) -> Result<GenerationReport, GenerateError> {
        if !is_valid_semester(semester) {
            return Err(GenerateError::InvalidSemester {
                semester: semester.to_string(),
            });
        }

        let correlation_id = generate_correlation_id();
        let start = Instant::now();
        info!(
            correlation_id = %correlation_id,
            semester = %semester,
            overwrite_existing = options.overwrite_existing,
            preferred = ?options.preferred_time_slot,
            "Starting timetable generation"
        );

        let lock = self.locks.semester(semester);
        let _guard = lock.write().await;
        self.runs.insert(semester.to_string(), cancel.clone());

        let outcome = self.place_all(semester, options, cancel, &correlation_id).await;
        // Whatever happened, students' index entries must match the persisted schedules
        let resync = self.resync(semester);
        self.runs.remove_if(semester, |_, current| current.same_run(cancel));

        match &outcome {
            Ok(report) => info!(
                correlation_id = %correlation_id,
                semester = %semester,
                placed = report.assignment_count,
                unplaced = report.unassigned_count,
                cancelled = report.cancelled,
                duration_ms = start.elapsed().as_millis() as u64,
                "Timetable generation finished"
            ),
            Err(e) => error!(
                correlation_id = %correlation_id,
                semester = %semester,
                error = %e,
                duration_ms = start.elapsed().as_millis() as u64,
                "Timetable generation failed"
            ),
        }

        let report = outcome?;
        resync?;
        Ok(report)
    }

    async fn place_all(
        &self,
        semester: &str,
        options: &GenerateOptions,
        cancel: &CancelFlag,
        correlation_id: &str,
    ) -> Result<GenerationReport, GenerateError> {
        let mut sections = self.store.sections_for_semester(semester)?;
        if sections.is_empty() {
            return Err(GenerateError::NoSections {
                semester: semester.to_string(),
            });
        }
        let rooms = self.store.classrooms()?;
        if rooms.is_empty() && !options.allow_roomless {
            return Err(GenerateError::NoClassrooms);
        }
        let courses = self.store.courses_for_semester(semester)?;

        if options.overwrite_existing {
            let cleared = self.store.clear_semester_schedules(semester)?;
            debug!(correlation_id = %correlation_id, cleared, "Cleared existing schedules");
            for section in &mut sections {
                section.schedule.clear();
            }
        }

        // Instructors and rooms of sections that keep their schedule
        self.index.rebuild_schedules(semester, &sections);

        let mut targets: Vec<Section> = sections
            .into_iter()
            .filter(|section| section.schedule.is_empty())
            .collect();
        targets.sort_by(|a, b| {
            weekly_hours(&courses, b)
                .cmp(&weekly_hours(&courses, a))
                .then(a.id.cmp(&b.id))
        });

        let candidates = candidate_blocks(&self.config.calendar, options.preferred_time_slot);
        let total_sections = targets.len();
        let mut unplaced = Vec::new();
        let mut assignment_count = 0;
        let mut slot_count = 0;
        let mut cancelled = false;

        for (position, mut section) in targets.into_iter().enumerate() {
            // Each section is a checkpoint: let a cancel request in
            tokio::task::yield_now().await;
            if !cancelled && cancel.is_cancelled() {
                cancelled = true;
                warn!(
                    correlation_id = %correlation_id,
                    attempted = position,
                    remaining = total_sections - position,
                    "Generation run cancelled"
                );
            }
            if cancelled {
                unplaced.push(UnplacedSection {
                    section_id: section.id,
                    reason: UnplacedReason::Cancelled,
                });
                continue;
            }

            let Some(course) = courses.get(&section.course_id) else {
                unplaced.push(UnplacedSection {
                    section_id: section.id,
                    reason: UnplacedReason::CourseMissing,
                });
                continue;
            };
            let required = course.required_blocks(self.config.calendar.block_minutes);
            if required == 0 {
                unplaced.push(UnplacedSection {
                    section_id: section.id,
                    reason: UnplacedReason::NoWeeklyHours,
                });
                continue;
            }

            match plan_section(
                &self.index,
                &section,
                required,
                &candidates,
                &rooms,
                options.allow_roomless,
            ) {
                Ok(slots) => {
                    self.store.replace_section_schedule(section.id, &slots)?;
                    slot_count += slots.len();
                    section.schedule = slots;
                    self.index.commit_section(&section);
                    assignment_count += 1;
                }
                Err(reason) => {
                    debug!(
                        correlation_id = %correlation_id,
                        section_id = section.id,
                        reason = ?reason,
                        "Section left unplaced"
                    );
                    unplaced.push(UnplacedSection {
                        section_id: section.id,
                        reason,
                    });
                }
            }
        }

        let unassigned_count = unplaced.len();
        let mut message = format!(
            "Scheduled {assignment_count} of {total_sections} sections for {semester}"
        );
        if unassigned_count > 0 {
            message.push_str(&format!("; {unassigned_count} could not be placed"));
        }
        if cancelled {
            message.push_str(" (cancelled)");
        }

        Ok(GenerationReport {
            semester: semester.to_string(),
            success: !(options.strict && unassigned_count > 0),
            assignment_count,
            total_sections,
            unassigned_count,
            slot_count,
            message,
            unplaced,
            cancelled,
        })
    }

    /// Rebuilds the semester's index entries from persisted sections and seat holders.
    pub fn resync(&self, semester: &str) -> Result<RebuildStats, StoreError> {
        let sections = self.store.sections_for_semester(semester)?;
        let holders = self.store.seat_holders_for_semester(semester)?;
        let stats = self.index.rebuild_semester(semester, &sections, &holders);
        if stats.collisions > 0 {
            warn!(
                semester = %semester,
                collisions = stats.collisions,
                "Persisted schedules overlap; index kept the first of each pair"
            );
        }
        Ok(stats)
    }

    /// Every section of the semester with its schedule and course code.
    pub async fn semester_timetable(
        &self,
        semester: &str,
    ) -> Result<Vec<TimetableEntry>, GenerateError> {
        if !is_valid_semester(semester) {
            return Err(GenerateError::InvalidSemester {
                semester: semester.to_string(),
            });
        }
        let lock = self.locks.semester(semester);
        let _guard = lock.read().await;
        self.entries(semester)
    }

    /// The semester's timetable as an iCalendar document.
    pub async fn export_timetable(&self, semester: &str) -> Result<String, GenerateError> {
        let invalid = || GenerateError::InvalidSemester {
            semester: semester.to_string(),
        };
        if !is_valid_semester(semester) {
            return Err(invalid());
        }
        let dates = self.config.semester_dates(semester).ok_or_else(invalid)?;

        let lock = self.locks.semester(semester);
        let _guard = lock.read().await;
        let entries = self.entries(semester)?;
        let room_names: HashMap<_, _> = self
            .store
            .classrooms()?
            .into_iter()
            .map(|room| (room.id, room.name))
            .collect();

        Ok(render_calendar(
            semester,
            &entries,
            &dates,
            &room_names,
            Utc::now(),
        ))
    }

    fn entries(&self, semester: &str) -> Result<Vec<TimetableEntry>, GenerateError> {
        let courses = self.store.courses_for_semester(semester)?;
        let entries = self
            .store
            .sections_for_semester(semester)?
            .into_iter()
            .map(|section| TimetableEntry {
                course_code: courses
                    .get(&section.course_id)
                    .map(|c| c.code.clone())
                    .unwrap_or_default(),
                available_seats: section.available_seats(),
                section,
            })
            .collect();
        Ok(entries)
    }
}

fn weekly_hours(courses: &HashMap<CourseId, Course>, section: &Section) -> u32 {
    courses
        .get(&section.course_id)
        .map_or(0, |course| course.weekly_hours)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::Owner;
    use crate::model::Classroom;
    use crate::schedule::{Day, TimeSlot, WeeklyInterval};
    use crate::timetable::PreferredTimeSlot;
    use std::collections::BTreeSet;

    const SEM: &str = "2025-SPRING";

    struct Fixture {
        store: Arc<Store>,
        index: Arc<ConflictIndex>,
        locks: Arc<LockRegistry>,
        service: TimetableService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let index = Arc::new(ConflictIndex::new());
        let locks = Arc::new(LockRegistry::new());
        let service = TimetableService::new(
            store.clone(),
            index.clone(),
            locks.clone(),
            Arc::new(AppConfig::default()),
        );
        Fixture {
            store,
            index,
            locks,
            service,
        }
    }

    fn add_course(store: &Store, id: i64, weekly_hours: u32) {
        store
            .upsert_course(&Course {
                id,
                code: format!("CSE {id}"),
                credits: 4,
                weekly_hours,
                prerequisite_course_ids: BTreeSet::new(),
            })
            .unwrap();
    }

    fn add_room(store: &Store, id: i64, capacity: u32) {
        store
            .upsert_classroom(&Classroom {
                id,
                name: format!("Room {id}"),
                capacity,
            })
            .unwrap();
    }

    fn add_section(store: &Store, id: i64, course_id: i64, capacity: u32, instructor: Option<i64>) {
        store
            .insert_section(&Section {
                id,
                course_id,
                semester: SEM.to_string(),
                section_number: id as u32,
                instructor_id: instructor,
                capacity,
                enrolled_count: 0,
                schedule: Vec::new(),
            })
            .unwrap();
    }

    /// No two slots of the same instructor or room overlap.
    fn assert_no_double_booking(sections: &[Section]) {
        let slots: Vec<(&Section, &TimeSlot)> = sections
            .iter()
            .flat_map(|s| s.schedule.iter().map(move |slot| (s, slot)))
            .collect();
        for (i, (sa, a)) in slots.iter().enumerate() {
            for (sb, b) in &slots[i + 1..] {
                if !a.interval().overlaps(&b.interval()) {
                    continue;
                }
                assert!(
                    sa.instructor_id.is_none() || sa.instructor_id != sb.instructor_id,
                    "instructor double-booked: {} and {}",
                    sa.id,
                    sb.id
                );
                assert!(
                    a.room_id.is_none() || a.room_id != b.room_id,
                    "room double-booked: {} and {}",
                    sa.id,
                    sb.id
                );
            }
        }
    }

    #[tokio::test]
    async fn test_same_instructor_sections_do_not_overlap() {
        let f = fixture();
        add_course(&f.store, 1, 3);
        add_room(&f.store, 1, 40);
        add_section(&f.store, 1, 1, 30, Some(5));
        add_section(&f.store, 2, 1, 30, Some(5));

        let report = f
            .service
            .generate(SEM, &GenerateOptions::default())
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.assignment_count, 2);
        assert_eq!(report.unassigned_count, 0);
        assert_eq!(report.slot_count, 6);

        let sections = f.store.sections_for_semester(SEM).unwrap();
        assert_eq!(sections[0].schedule.len(), 3);
        assert_eq!(sections[1].schedule.len(), 3);
        assert_eq!(sections[0].schedule[0].start.to_string(), "09:00");
        assert_eq!(sections[1].schedule[0].start.to_string(), "10:00");
        assert_no_double_booking(&sections);
    }

    #[tokio::test]
    async fn test_unplaceable_section_is_reported_not_fatal() {
        let f = fixture();
        add_course(&f.store, 1, 3);
        add_course(&f.store, 2, 40);
        add_room(&f.store, 1, 40);
        add_section(&f.store, 1, 1, 30, None);
        // 40 blocks cannot fit in a 35-block week
        add_section(&f.store, 2, 2, 30, None);
        add_section(&f.store, 3, 1, 90, None);

        let report = f
            .service
            .generate(SEM, &GenerateOptions::default())
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.total_sections, 3);
        assert_eq!(report.assignment_count, 1);
        assert_eq!(
            report.unplaced,
            vec![
                UnplacedSection {
                    section_id: 2,
                    reason: UnplacedReason::NoFeasibleSlot
                },
                UnplacedSection {
                    section_id: 3,
                    reason: UnplacedReason::NoRoomLargeEnough
                },
            ]
        );
        assert!(report.message.contains("2 could not be placed"));
        // Nothing partial was written for the failed section
        assert!(f.store.section(2).unwrap().unwrap().schedule.is_empty());

        let strict = GenerateOptions {
            strict: true,
            ..GenerateOptions::default()
        };
        let report = f.service.generate(SEM, &strict).await.unwrap();
        assert!(!report.success);
    }

    #[tokio::test]
    async fn test_regeneration_is_deterministic() {
        let f = fixture();
        add_course(&f.store, 1, 3);
        add_course(&f.store, 2, 2);
        add_course(&f.store, 3, 4);
        add_room(&f.store, 1, 40);
        add_room(&f.store, 2, 120);
        for (id, course, capacity, instructor) in [
            (1, 1, 30, Some(1)),
            (2, 2, 100, Some(1)),
            (3, 3, 35, Some(2)),
            (4, 1, 40, Some(2)),
            (5, 2, 25, None),
        ] {
            add_section(&f.store, id, course, capacity, instructor);
        }

        let options = GenerateOptions {
            preferred_time_slot: PreferredTimeSlot::Morning,
            ..GenerateOptions::default()
        };
        let first_report = f.service.generate(SEM, &options).await.unwrap();
        let first = f.store.sections_for_semester(SEM).unwrap();
        let second_report = f.service.generate(SEM, &options).await.unwrap();
        let second = f.store.sections_for_semester(SEM).unwrap();

        assert_eq!(first, second);
        assert_eq!(first_report, second_report);
        assert_no_double_booking(&second);
        // Course 3 needs the most blocks and is placed first, in the morning
        assert_eq!(second[2].schedule.len(), 4);
        assert!(second[2].schedule.iter().all(|s| s.start.hour() < 12));
    }

    #[tokio::test]
    async fn test_keep_existing_only_places_unscheduled() {
        let f = fixture();
        add_course(&f.store, 1, 1);
        add_room(&f.store, 1, 40);
        add_section(&f.store, 1, 1, 30, Some(3));
        add_section(&f.store, 2, 1, 30, Some(3));

        let fixed = TimeSlot::new(
            WeeklyInterval::new(Day::Monday, "09:00".parse().unwrap(), "10:00".parse().unwrap())
                .unwrap(),
            Some(1),
        );
        f.store.replace_section_schedule(1, &[fixed]).unwrap();

        let keep = GenerateOptions {
            overwrite_existing: false,
            ..GenerateOptions::default()
        };
        let report = f.service.generate(SEM, &keep).await.unwrap();
        assert_eq!(report.total_sections, 1);
        assert_eq!(f.store.section(1).unwrap().unwrap().schedule, vec![fixed]);
        let placed = f.store.section(2).unwrap().unwrap();
        assert_eq!(placed.schedule[0].start.to_string(), "10:00");
    }

    #[tokio::test]
    async fn test_cancelled_run_reports_remaining_sections() {
        let f = fixture();
        add_course(&f.store, 1, 2);
        add_room(&f.store, 1, 40);
        add_section(&f.store, 1, 1, 30, None);
        add_section(&f.store, 2, 1, 30, None);

        let flag = CancelFlag::new();
        flag.cancel();
        let report = f
            .service
            .generate_with(SEM, &GenerateOptions::default(), &flag)
            .await
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.assignment_count, 0);
        assert_eq!(report.unassigned_count, 2);
        assert!(report
            .unplaced
            .iter()
            .all(|u| u.reason == UnplacedReason::Cancelled));
        assert!(!f.service.cancel(SEM), "no run is in progress");
    }

    #[tokio::test]
    async fn test_cancel_does_not_reach_run_waiting_for_lock() {
        let f = fixture();
        add_course(&f.store, 1, 2);
        add_room(&f.store, 1, 40);
        add_section(&f.store, 1, 1, 30, None);

        let lock = f.locks.semester(SEM);
        let held = lock.write().await;
        let options = GenerateOptions::default();
        let run = f.service.generate(SEM, &options);
        tokio::pin!(run);
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(20), &mut run)
                .await
                .is_err(),
            "run must wait for the semester lock"
        );
        assert!(!f.service.cancel(SEM), "a waiting run is not cancellable yet");

        drop(held);
        let report = run.await.unwrap();
        assert!(!report.cancelled);
        assert_eq!(report.assignment_count, 1);
        assert!(!f.service.cancel(SEM));
    }

    #[tokio::test]
    async fn test_course_without_hours_is_reported_unplaced() {
        let f = fixture();
        add_course(&f.store, 1, 0);
        add_course(&f.store, 2, 1);
        add_room(&f.store, 1, 40);
        add_section(&f.store, 1, 1, 30, None);
        add_section(&f.store, 2, 2, 30, None);

        let report = f
            .service
            .generate(SEM, &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(report.assignment_count, 1);
        assert_eq!(
            report.unplaced,
            vec![UnplacedSection {
                section_id: 1,
                reason: UnplacedReason::NoWeeklyHours
            }]
        );
        assert!(f.store.section(1).unwrap().unwrap().schedule.is_empty());
        assert_eq!(
            serde_json::to_value(UnplacedReason::NoWeeklyHours).unwrap(),
            "NO_WEEKLY_HOURS"
        );
    }

    #[tokio::test]
    async fn test_generation_resyncs_student_entries() {
        let f = fixture();
        add_course(&f.store, 1, 1);
        add_room(&f.store, 1, 40);
        add_section(&f.store, 1, 1, 30, None);
        f.service
            .generate(SEM, &GenerateOptions::default())
            .await
            .unwrap();
        f.store.insert_pending_enrollment(77, 1, Utc::now()).unwrap();

        f.service
            .generate(SEM, &GenerateOptions::default())
            .await
            .unwrap();
        let held = f.index.occupancies(SEM, Owner::Student(77));
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].section_id, 1);
    }

    #[tokio::test]
    async fn test_input_errors() {
        let f = fixture();
        assert!(matches!(
            f.service.generate("2025-spring", &GenerateOptions::default()).await,
            Err(GenerateError::InvalidSemester { .. })
        ));
        assert!(matches!(
            f.service.generate(SEM, &GenerateOptions::default()).await,
            Err(GenerateError::NoSections { .. })
        ));
        add_course(&f.store, 1, 1);
        add_section(&f.store, 1, 1, 30, None);
        assert!(matches!(
            f.service.generate(SEM, &GenerateOptions::default()).await,
            Err(GenerateError::NoClassrooms)
        ));
    }

    #[tokio::test]
    async fn test_export_lists_every_slot() {
        let f = fixture();
        add_course(&f.store, 1, 2);
        add_room(&f.store, 1, 40);
        add_section(&f.store, 1, 1, 30, None);
        f.service
            .generate(SEM, &GenerateOptions::default())
            .await
            .unwrap();

        let ical = f.service.export_timetable(SEM).await.unwrap();
        assert_eq!(ical.matches("BEGIN:VEVENT").count(), 2);
        assert!(ical.contains("LOCATION:Room 1"));
        assert!(ical.contains("SUMMARY:CSE 1 section 1"));

        let listed = f.service.semester_timetable(SEM).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].course_code, "CSE 1");
        assert_eq!(listed[0].available_seats, 30);
    }
}
