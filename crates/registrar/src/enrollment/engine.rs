//! The admission engine.
//!
//! Every operation on a student's enrollments runs under that student's lock, and under
//! the read side of the section's semester lock, so a timetable run never changes a
//! schedule between the conflict check and the reservation that depends on it.

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{
    CourseRef, Decision, EnrollmentStatus, ScheduleConflict, SettingsSource, StudentRecords,
};
use crate::conflict::{ConflictIndex, Owner};
use crate::db::{StatusChange, Store};
use crate::error::{AdmissionError, StoreError};
use crate::locks::LockRegistry;
use crate::model::{
    AcademicSettings, AdvisorId, Enrollment, EnrollmentId, Section, SectionId, StudentId,
};
use crate::schedule::WeeklyInterval;
use crate::util::generate_correlation_id;

pub struct AdmissionEngine {
    store: Arc<Store>,
    records: Arc<dyn StudentRecords>,
    settings: Arc<dyn SettingsSource>,
    index: Arc<ConflictIndex>,
    locks: Arc<LockRegistry>,
    lookup_timeout: Duration,
}

impl AdmissionEngine {
    pub fn new(
        store: Arc<Store>,
        records: Arc<dyn StudentRecords>,
        settings: Arc<dyn SettingsSource>,
        index: Arc<ConflictIndex>,
        locks: Arc<LockRegistry>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            store,
            records,
            settings,
            index,
            locks,
            lookup_timeout,
        }
    }

    /// Admits a student to a section as PENDING.
    ///
    /// Checks run in a fixed order: open enrollment and semester, duplicate request,
    /// capacity, prerequisites, then time conflicts. On success the seat is taken and the
    /// section's meetings are reserved for the student in the conflict index.
    pub async fn request(
        &self,
        student_id: StudentId,
        section_id: SectionId,
    ) -> Result<Enrollment, AdmissionError> {
        let correlation_id = generate_correlation_id();
        let start = Instant::now();
        info!(
            correlation_id = %correlation_id,
            student_id,
            section_id,
            "Enrollment requested"
        );

        let student_lock = self.locks.student(student_id);
        let _student = student_lock.lock().await;

        let result = self.admit(student_id, section_id).await;
        match &result {
            Ok(enrollment) => info!(
                correlation_id = %correlation_id,
                enrollment_id = enrollment.id,
                duration_ms = start.elapsed().as_millis() as u64,
                "Enrollment admitted as pending"
            ),
            Err(e) => info!(
                correlation_id = %correlation_id,
                code = e.code(),
                error = %e,
                duration_ms = start.elapsed().as_millis() as u64,
                "Enrollment refused"
            ),
        }
        result
    }

    async fn admit(
        &self,
        student_id: StudentId,
        section_id: SectionId,
    ) -> Result<Enrollment, AdmissionError> {
        let settings = self.load_settings().await?;
        if !settings.enrollment_open {
            return Err(AdmissionError::EnrollmentClosed);
        }
        let section = self.find_section(section_id)?;
        if let Some(current) = &settings.current_semester {
            if *current != section.semester {
                return Err(AdmissionError::SemesterNotOpen {
                    section_id,
                    semester: section.semester,
                });
            }
        }

        let semester_lock = self.locks.semester(&section.semester);
        let _semester = semester_lock.read().await;
        // A timetable run may have finished while we waited
        let section = self.find_section(section_id)?;

        if let Some(existing) = self.store.seat_holding_enrollment(student_id, section_id)? {
            return Err(match existing.status {
                EnrollmentStatus::Active => AdmissionError::AlreadyEnrolled { section_id },
                _ => AdmissionError::AlreadyPending { section_id },
            });
        }

        if section.is_full() {
            return Err(AdmissionError::CapacityFull { section_id });
        }

        self.check_prerequisites(student_id, &section).await?;

        let intervals: Vec<WeeklyInterval> =
            section.schedule.iter().map(|slot| slot.interval()).collect();
        let owner = Owner::Student(student_id);
        let conflicts = self.schedule_conflicts(&section.semester, owner, &intervals);
        if !conflicts.is_empty() {
            return Err(AdmissionError::ScheduleConflict { conflicts });
        }

        self.index
            .reserve_all(&section.semester, owner, section_id, &intervals)
            .map_err(|(requested, existing)| AdmissionError::ScheduleConflict {
                conflicts: vec![ScheduleConflict {
                    section_id: existing.section_id,
                    existing: existing.interval,
                    requested,
                }],
            })?;

        match self
            .store
            .insert_pending_enrollment(student_id, section_id, Utc::now())
        {
            Ok(Some(enrollment)) => Ok(enrollment),
            Ok(None) => {
                // Lost the last seat to a concurrent request from another student
                self.index.release(&section.semester, owner, section_id);
                Err(AdmissionError::CapacityFull { section_id })
            }
            Err(e) => {
                self.index.release(&section.semester, owner, section_id);
                Err(e.into())
            }
        }
    }

    /// Applies an advisor's decision to a PENDING enrollment.
    pub async fn decide(
        &self,
        enrollment_id: EnrollmentId,
        advisor_id: AdvisorId,
        decision: Decision,
        reason: Option<String>,
    ) -> Result<Enrollment, AdmissionError> {
        let found = self.find_enrollment(enrollment_id)?;
        let student_lock = self.locks.student(found.student_id);
        let _student = student_lock.lock().await;

        let enrollment = self.find_enrollment(enrollment_id)?;
        if enrollment.status != EnrollmentStatus::Pending {
            return Err(AdmissionError::NotPending {
                status: enrollment.status,
            });
        }

        let student_id = enrollment.student_id;
        let records = self.records.clone();
        let advisor = self
            .lookup("advisor mapping", move || records.advisor_of(student_id))
            .await?;
        if advisor != Some(advisor_id) {
            warn!(
                enrollment_id,
                student_id,
                advisor_id,
                assigned_advisor = ?advisor,
                "Decision refused: caller is not the student's advisor"
            );
            return Err(AdmissionError::Unauthorized);
        }

        let (to, reason) = match decision {
            Decision::Approve => (EnrollmentStatus::Active, None),
            Decision::Reject => {
                let reason = reason
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty())
                    .ok_or(AdmissionError::ReasonRequired)?;
                (EnrollmentStatus::Rejected, Some(reason))
            }
        };
        enrollment.status.transition(to)?;

        let section = self.find_section(enrollment.section_id)?;
        let semester_lock = self.locks.semester(&section.semester);
        let _semester = semester_lock.read().await;

        let change = StatusChange {
            enrollment_id,
            from: EnrollmentStatus::Pending,
            to,
            decided_by: Some(advisor_id),
            reason: reason.as_deref(),
            at: Utc::now(),
        };
        let Some(updated) = self.store.transition_enrollment(&change)? else {
            let current = self.find_enrollment(enrollment_id)?;
            return Err(AdmissionError::NotPending {
                status: current.status,
            });
        };

        if !to.holds_seat() {
            self.index
                .release(&section.semester, Owner::Student(student_id), section.id);
        }
        info!(
            enrollment_id,
            student_id,
            advisor_id,
            status = %updated.status,
            "Enrollment decided"
        );
        Ok(updated)
    }

    /// Drops a PENDING or ACTIVE enrollment. Dropping a REJECTED or DROPPED enrollment
    /// returns it unchanged.
    pub async fn drop_enrollment(
        &self,
        enrollment_id: EnrollmentId,
    ) -> Result<Enrollment, AdmissionError> {
        let found = self.find_enrollment(enrollment_id)?;
        let student_lock = self.locks.student(found.student_id);
        let _student = student_lock.lock().await;

        let enrollment = self.find_enrollment(enrollment_id)?;
        if enrollment.status.is_terminal() {
            debug!(enrollment_id, status = %enrollment.status, "Drop on terminal enrollment");
            return Ok(enrollment);
        }
        enrollment.status.transition(EnrollmentStatus::Dropped)?;

        let section = self.find_section(enrollment.section_id)?;
        let semester_lock = self.locks.semester(&section.semester);
        let _semester = semester_lock.read().await;

        let change = StatusChange {
            enrollment_id,
            from: enrollment.status,
            to: EnrollmentStatus::Dropped,
            decided_by: None,
            reason: None,
            at: Utc::now(),
        };
        let updated = match self.store.transition_enrollment(&change)? {
            Some(updated) => updated,
            // Status moved on without the student lock; only a terminal state is acceptable
            None => {
                let current = self.find_enrollment(enrollment_id)?;
                if current.status.is_terminal() {
                    return Ok(current);
                }
                return Err(AdmissionError::NotPending {
                    status: current.status,
                });
            }
        };

        self.index.release(
            &section.semester,
            Owner::Student(enrollment.student_id),
            section.id,
        );
        info!(
            enrollment_id,
            student_id = enrollment.student_id,
            from = %enrollment.status,
            "Enrollment dropped"
        );
        Ok(updated)
    }

    /// PENDING enrollments awaiting this advisor, newest first.
    pub fn pending_for_advisor(
        &self,
        advisor_id: AdvisorId,
    ) -> Result<Vec<Enrollment>, AdmissionError> {
        Ok(self.store.pending_for_advisor(advisor_id)?)
    }

    pub fn enrollments_for_student(
        &self,
        student_id: StudentId,
        semester: Option<&str>,
    ) -> Result<Vec<Enrollment>, AdmissionError> {
        Ok(self.store.enrollments_for_student(student_id, semester)?)
    }

    fn find_section(&self, section_id: SectionId) -> Result<Section, AdmissionError> {
        self.store
            .section(section_id)?
            .ok_or(AdmissionError::SectionNotFound { section_id })
    }

    fn find_enrollment(&self, enrollment_id: EnrollmentId) -> Result<Enrollment, AdmissionError> {
        self.store
            .enrollment(enrollment_id)?
            .ok_or(AdmissionError::EnrollmentNotFound { enrollment_id })
    }

    async fn load_settings(&self) -> Result<AcademicSettings, AdmissionError> {
        let source = self.settings.clone();
        self.lookup("academic settings", move || source.academic_settings())
            .await
    }

    async fn check_prerequisites(
        &self,
        student_id: StudentId,
        section: &Section,
    ) -> Result<(), AdmissionError> {
        let course = self
            .store
            .course(section.course_id)?
            .ok_or_else(|| StoreError::Corrupt {
                message: format!(
                    "section {} references missing course {}",
                    section.id, section.course_id
                ),
            })?;
        if course.prerequisite_course_ids.is_empty() {
            return Ok(());
        }

        let records = self.records.clone();
        let completed = self
            .lookup("completed courses", move || {
                records.completed_courses(student_id)
            })
            .await?;
        let missing: BTreeSet<_> = course
            .prerequisite_course_ids
            .iter()
            .filter(|id| !completed.contains(*id))
            .copied()
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let known = self.store.courses_by_ids(&missing)?;
        let missing = missing
            .into_iter()
            .map(|id| CourseRef {
                id,
                code: known
                    .iter()
                    .find(|c| c.id == id)
                    .map(|c| c.code.clone())
                    .unwrap_or_else(|| format!("#{id}")),
            })
            .collect();
        Err(AdmissionError::MissingPrerequisites { missing })
    }

    fn schedule_conflicts(
        &self,
        semester: &str,
        owner: Owner,
        intervals: &[WeeklyInterval],
    ) -> Vec<ScheduleConflict> {
        intervals
            .iter()
            .flat_map(|requested| {
                self.index
                    .conflicts(semester, owner, requested)
                    .into_iter()
                    .map(|existing| ScheduleConflict {
                        section_id: existing.section_id,
                        existing: existing.interval,
                        requested: *requested,
                    })
            })
            .collect()
    }

    /// Runs a blocking collaborator lookup with a deadline. Failures and timeouts come
    /// back as `Unavailable`, which callers may retry.
    async fn lookup<T, F>(&self, what: &'static str, f: F) -> Result<T, AdmissionError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    {
        match tokio::time::timeout(self.lookup_timeout, tokio::task::spawn_blocking(f)).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(AdmissionError::Unavailable {
                message: format!("{what}: {e}"),
            }),
            Ok(Err(join)) => Err(AdmissionError::Unavailable {
                message: format!("{what}: {join}"),
            }),
            Err(_) => {
                warn!(
                    lookup = what,
                    timeout_ms = self.lookup_timeout.as_millis() as u64,
                    "Collaborator lookup timed out"
                );
                Err(AdmissionError::Unavailable {
                    message: format!(
                        "{what} timed out after {}ms",
                        self.lookup_timeout.as_millis()
                    ),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Classroom, Course};
    use crate::schedule::{ClockTime, Day, TimeSlot};
    use std::collections::HashSet;

    const SEM: &str = "2025-SPRING";

    fn t(s: &str) -> ClockTime {
        s.parse().unwrap()
    }

    fn slot(day: Day, start: &str, end: &str) -> TimeSlot {
        TimeSlot::new(WeeklyInterval::new(day, t(start), t(end)).unwrap(), Some(1))
    }

    struct Fixture {
        store: Arc<Store>,
        engine: Arc<AdmissionEngine>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .upsert_classroom(&Classroom {
                id: 1,
                name: "PCYNH 106".to_string(),
                capacity: 200,
            })
            .unwrap();
        for (id, code, prereqs) in [
            (1, "CSE 11", vec![]),
            (2, "CSE 12", vec![1]),
            (3, "MATH 18", vec![]),
        ] {
            store
                .upsert_course(&Course {
                    id,
                    code: code.to_string(),
                    credits: 4,
                    weekly_hours: 3,
                    prerequisite_course_ids: prereqs.into_iter().collect(),
                })
                .unwrap();
        }
        let engine = engine_for(store.clone(), store.clone());
        Fixture { store, engine }
    }

    fn engine_for(store: Arc<Store>, records: Arc<dyn StudentRecords>) -> Arc<AdmissionEngine> {
        Arc::new(AdmissionEngine::new(
            store.clone(),
            records,
            store,
            Arc::new(ConflictIndex::new()),
            Arc::new(LockRegistry::new()),
            Duration::from_millis(500),
        ))
    }

    fn add_section(
        store: &Store,
        id: SectionId,
        course_id: i64,
        capacity: u32,
        schedule: Vec<TimeSlot>,
    ) {
        store
            .insert_section(&Section {
                id,
                course_id,
                semester: SEM.to_string(),
                section_number: id as u32,
                instructor_id: None,
                capacity,
                enrolled_count: 0,
                schedule,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_overlapping_section_conflicts() {
        let f = fixture();
        add_section(&f.store, 10, 1, 30, vec![slot(Day::Monday, "09:00", "10:00")]);
        add_section(&f.store, 11, 3, 30, vec![slot(Day::Monday, "09:30", "10:30")]);
        f.store.assign_advisor(100, 9).unwrap();

        let first = f.engine.request(100, 10).await.unwrap();
        f.engine
            .decide(first.id, 9, Decision::Approve, None)
            .await
            .unwrap();

        let err = f.engine.request(100, 11).await.unwrap_err();
        let AdmissionError::ScheduleConflict { conflicts } = err else {
            panic!("expected SCHEDULE_CONFLICT, got {err:?}");
        };
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].section_id, 10);
        assert_eq!(conflicts[0].requested.start, t("09:30"));
        assert_eq!(conflicts[0].existing.end, t("10:00"));
        // No row, no seat
        assert_eq!(f.store.section(11).unwrap().unwrap().enrolled_count, 0);
    }

    #[tokio::test]
    async fn test_missing_prerequisite_listed() {
        let f = fixture();
        add_section(&f.store, 20, 2, 30, vec![slot(Day::Tuesday, "10:00", "11:00")]);

        let err = f.engine.request(100, 20).await.unwrap_err();
        match err {
            AdmissionError::MissingPrerequisites { missing } => {
                assert_eq!(
                    missing,
                    vec![CourseRef {
                        id: 1,
                        code: "CSE 11".to_string()
                    }]
                );
            }
            other => panic!("expected MISSING_PREREQUISITES, got {other:?}"),
        }

        f.store.record_completed_course(100, 1).unwrap();
        f.engine.request(100, 20).await.unwrap();
    }

    #[tokio::test]
    async fn test_last_seat_goes_to_exactly_one_student() {
        let f = fixture();
        add_section(&f.store, 30, 3, 1, vec![slot(Day::Friday, "13:00", "14:00")]);

        let a = tokio::spawn({
            let engine = f.engine.clone();
            async move { engine.request(200, 30).await }
        });
        let b = tokio::spawn({
            let engine = f.engine.clone();
            async move { engine.request(201, 30).await }
        });
        let results = [a.await.unwrap(), b.await.unwrap()];

        let admitted = results.iter().filter(|r| r.is_ok()).count();
        let full = results
            .iter()
            .filter(|r| matches!(r, Err(AdmissionError::CapacityFull { section_id: 30 })))
            .count();
        assert_eq!((admitted, full), (1, 1));

        let section = f.store.section(30).unwrap().unwrap();
        assert_eq!(section.enrolled_count, 1);
        assert!(section.enrolled_count <= section.capacity);
    }

    #[tokio::test]
    async fn test_approve_keeps_count_reject_frees_seat_and_slot() {
        let f = fixture();
        add_section(&f.store, 40, 3, 2, vec![slot(Day::Wednesday, "11:00", "12:00")]);
        add_section(&f.store, 41, 1, 30, vec![slot(Day::Wednesday, "11:00", "12:00")]);
        f.store.assign_advisor(300, 9).unwrap();
        f.store.assign_advisor(301, 9).unwrap();

        let e1 = f.engine.request(300, 40).await.unwrap();
        let e2 = f.engine.request(301, 40).await.unwrap();
        assert_eq!(f.store.section(40).unwrap().unwrap().enrolled_count, 2);

        let approved = f
            .engine
            .decide(e1.id, 9, Decision::Approve, None)
            .await
            .unwrap();
        assert_eq!(approved.status, EnrollmentStatus::Active);
        assert_eq!(approved.decided_by, Some(9));
        assert_eq!(f.store.section(40).unwrap().unwrap().enrolled_count, 2);

        let rejected = f
            .engine
            .decide(e2.id, 9, Decision::Reject, Some("Schedule overload".to_string()))
            .await
            .unwrap();
        assert_eq!(rejected.status, EnrollmentStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("Schedule overload"));
        assert_eq!(f.store.section(40).unwrap().unwrap().enrolled_count, 1);

        // The rejected student's Wednesday slot is free again
        f.engine.request(301, 41).await.unwrap();
    }

    #[tokio::test]
    async fn test_decision_guards() {
        let f = fixture();
        add_section(&f.store, 50, 3, 5, vec![slot(Day::Thursday, "14:00", "15:00")]);
        f.store.assign_advisor(400, 9).unwrap();
        let e = f.engine.request(400, 50).await.unwrap();

        assert!(matches!(
            f.engine.decide(e.id, 8, Decision::Approve, None).await,
            Err(AdmissionError::Unauthorized)
        ));
        assert!(matches!(
            f.engine
                .decide(e.id, 9, Decision::Reject, Some("  ".to_string()))
                .await,
            Err(AdmissionError::ReasonRequired)
        ));
        // Refused decisions change nothing
        assert_eq!(
            f.store.enrollment(e.id).unwrap().unwrap().status,
            EnrollmentStatus::Pending
        );

        f.engine.decide(e.id, 9, Decision::Approve, None).await.unwrap();
        assert!(matches!(
            f.engine.decide(e.id, 9, Decision::Approve, None).await,
            Err(AdmissionError::NotPending {
                status: EnrollmentStatus::Active
            })
        ));
        assert!(matches!(
            f.engine.decide(999, 9, Decision::Approve, None).await,
            Err(AdmissionError::EnrollmentNotFound { enrollment_id: 999 })
        ));
    }

    #[tokio::test]
    async fn test_drop_is_idempotent() {
        let f = fixture();
        add_section(&f.store, 60, 3, 5, vec![slot(Day::Monday, "13:00", "14:00")]);
        let e = f.engine.request(500, 60).await.unwrap();

        let first = f.engine.drop_enrollment(e.id).await.unwrap();
        let second = f.engine.drop_enrollment(e.id).await.unwrap();
        assert_eq!(first.status, EnrollmentStatus::Dropped);
        assert_eq!(second, first);
        assert_eq!(f.store.section(60).unwrap().unwrap().enrolled_count, 0);

        // A new request creates a new row
        let again = f.engine.request(500, 60).await.unwrap();
        assert_ne!(again.id, e.id);
        assert_eq!(f.engine.enrollments_for_student(500, Some(SEM)).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_drop_of_rejected_enrollment_changes_nothing() {
        let f = fixture();
        add_section(&f.store, 61, 3, 5, vec![slot(Day::Monday, "15:00", "16:00")]);
        f.store.assign_advisor(510, 9).unwrap();
        let e = f.engine.request(510, 61).await.unwrap();
        let rejected = f
            .engine
            .decide(e.id, 9, Decision::Reject, Some("Missing placement test".to_string()))
            .await
            .unwrap();

        let dropped = f.engine.drop_enrollment(e.id).await.unwrap();
        assert_eq!(dropped, rejected);
        assert_eq!(dropped.status, EnrollmentStatus::Rejected);
        assert_eq!(
            f.store.enrollment(e.id).unwrap().unwrap().status,
            EnrollmentStatus::Rejected
        );
        assert_eq!(f.store.section(61).unwrap().unwrap().enrolled_count, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_overlapping_requests_admit_one() {
        let f = fixture();
        add_section(&f.store, 62, 1, 30, vec![slot(Day::Tuesday, "13:00", "14:00")]);
        add_section(&f.store, 63, 3, 30, vec![slot(Day::Tuesday, "13:30", "14:30")]);

        let a = tokio::spawn({
            let engine = f.engine.clone();
            async move { engine.request(5, 62).await }
        });
        let b = tokio::spawn({
            let engine = f.engine.clone();
            async move { engine.request(5, 63).await }
        });
        let results = [a.await.unwrap(), b.await.unwrap()];

        let admitted: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(admitted.len(), 1);
        let refused = results
            .iter()
            .filter(|r| matches!(r, Err(AdmissionError::ScheduleConflict { .. })))
            .count();
        assert_eq!(refused, 1);

        let counts: u32 = [62, 63]
            .iter()
            .map(|id| f.store.section(*id).unwrap().unwrap().enrolled_count)
            .sum();
        assert_eq!(counts, 1);
        assert_eq!(f.engine.enrollments_for_student(5, Some(SEM)).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_self_overlapping_section_names_refused_meeting() {
        let f = fixture();
        add_section(
            &f.store,
            64,
            3,
            30,
            vec![
                slot(Day::Thursday, "09:00", "10:00"),
                slot(Day::Thursday, "09:30", "10:30"),
            ],
        );

        let err = f.engine.request(520, 64).await.unwrap_err();
        let AdmissionError::ScheduleConflict { conflicts } = err else {
            panic!("expected SCHEDULE_CONFLICT, got {err:?}");
        };
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].existing.start, t("09:00"));
        assert_eq!(conflicts[0].requested.start, t("09:30"));
        assert_eq!(f.store.section(64).unwrap().unwrap().enrolled_count, 0);
    }

    #[tokio::test]
    async fn test_duplicate_and_gate_checks() {
        let f = fixture();
        add_section(&f.store, 70, 3, 5, vec![slot(Day::Tuesday, "09:00", "10:00")]);
        f.store.assign_advisor(600, 9).unwrap();

        let e = f.engine.request(600, 70).await.unwrap();
        assert!(matches!(
            f.engine.request(600, 70).await,
            Err(AdmissionError::AlreadyPending { section_id: 70 })
        ));
        f.engine.decide(e.id, 9, Decision::Approve, None).await.unwrap();
        assert!(matches!(
            f.engine.request(600, 70).await,
            Err(AdmissionError::AlreadyEnrolled { section_id: 70 })
        ));
        assert!(matches!(
            f.engine.request(600, 999).await,
            Err(AdmissionError::SectionNotFound { section_id: 999 })
        ));

        f.store
            .update_settings(&AcademicSettings {
                enrollment_open: true,
                current_semester: Some("2025-FALL".to_string()),
            })
            .unwrap();
        assert!(matches!(
            f.engine.request(601, 70).await,
            Err(AdmissionError::SemesterNotOpen { .. })
        ));

        f.store
            .update_settings(&AcademicSettings {
                enrollment_open: false,
                current_semester: None,
            })
            .unwrap();
        assert!(matches!(
            f.engine.request(601, 70).await,
            Err(AdmissionError::EnrollmentClosed)
        ));
    }

    #[tokio::test]
    async fn test_full_section_reported_before_prerequisites() {
        let f = fixture();
        add_section(&f.store, 80, 2, 1, vec![slot(Day::Friday, "09:00", "10:00")]);
        f.store.record_completed_course(700, 1).unwrap();
        f.engine.request(700, 80).await.unwrap();

        // Student 701 lacks the prerequisite too, but capacity is checked first
        assert!(matches!(
            f.engine.request(701, 80).await,
            Err(AdmissionError::CapacityFull { section_id: 80 })
        ));
    }

    struct SlowRecords;

    impl StudentRecords for SlowRecords {
        fn completed_courses(&self, _: StudentId) -> Result<HashSet<i64>, StoreError> {
            std::thread::sleep(Duration::from_millis(1_000));
            Ok(HashSet::new())
        }

        fn advisor_of(&self, _: StudentId) -> Result<Option<AdvisorId>, StoreError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_slow_collaborator_is_retryable_and_leaves_no_state() {
        let f = fixture();
        add_section(&f.store, 90, 2, 5, vec![slot(Day::Monday, "15:00", "16:00")]);
        let engine = engine_for(f.store.clone(), Arc::new(SlowRecords));

        let err = engine.request(800, 90).await.unwrap_err();
        assert!(matches!(err, AdmissionError::Unavailable { .. }));
        assert!(err.is_retryable());
        assert_eq!(f.store.section(90).unwrap().unwrap().enrolled_count, 0);
        assert!(engine.enrollments_for_student(800, None).unwrap().is_empty());
    }
}
