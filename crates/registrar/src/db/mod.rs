/// SQLite persistence for the catalog, schedules, enrollments, settings and reservations.
///
/// Persisted rows are the source of truth. The conflict index is derived from them.
mod types;

pub use types::{DbEnrollment, DbReservation, DbSlot};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::enrollment::{EnrollmentStatus, SettingsSource, StudentRecords};
use crate::error::StoreError;
use crate::model::{
    AcademicSettings, AdvisorId, Classroom, ClassroomId, Course, CourseId, Enrollment,
    EnrollmentId, ReservationId, Section, SectionId, StudentId,
};
use crate::reservation::{Reservation, ReservationRequest, ReservationStatus};
use crate::schedule::TimeSlot;

const SCHEMA_SQL: &str = include_str!("../../sql/init.sql");

const SECTION_COLUMNS: &str =
    "section_id, course_id, semester, section_number, instructor_id, capacity, enrolled_count";

/// A compare-and-set status change on one enrollment.
#[derive(Debug, Clone)]
pub struct StatusChange<'a> {
    pub enrollment_id: EnrollmentId,
    /// The change only applies while the row still has this status
    pub from: EnrollmentStatus,
    pub to: EnrollmentStatus,
    pub decided_by: Option<AdvisorId>,
    pub reason: Option<&'a str>,
    pub at: DateTime<Utc>,
}

pub struct Store {
    db: Mutex<Connection>,
}

impl Store {
    /// Opens (or creates) the database file and initializes the schema
    pub fn open(db_path: &str) -> Result<Self, StoreError> {
        Self::init(Connection::open(db_path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }

    // ---- catalog -------------------------------------------------------------------

    /// Inserts or replaces a course and its prerequisite set
    pub fn upsert_course(&self, course: &Course) -> Result<(), StoreError> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO courses (course_id, code, credits, weekly_hours)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(course_id) DO UPDATE SET
                code = excluded.code,
                credits = excluded.credits,
                weekly_hours = excluded.weekly_hours",
            params![course.id, course.code, course.credits, course.weekly_hours],
        )?;
        tx.execute(
            "DELETE FROM course_prerequisites WHERE course_id = ?1",
            [course.id],
        )?;
        for prerequisite in &course.prerequisite_course_ids {
            tx.execute(
                "INSERT INTO course_prerequisites (course_id, prerequisite_id) VALUES (?1, ?2)",
                [course.id, *prerequisite],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn upsert_classroom(&self, classroom: &Classroom) -> Result<(), StoreError> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO classrooms (classroom_id, name, capacity) VALUES (?1, ?2, ?3)
             ON CONFLICT(classroom_id) DO UPDATE SET
                name = excluded.name,
                capacity = excluded.capacity",
            params![classroom.id, classroom.name, classroom.capacity],
        )?;
        Ok(())
    }

    /// Inserts a section together with whatever schedule it already carries
    pub fn insert_section(&self, section: &Section) -> Result<(), StoreError> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO sections
                (section_id, course_id, semester, section_number, instructor_id, capacity, enrolled_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                section.id,
                section.course_id,
                section.semester,
                section.section_number,
                section.instructor_id,
                section.capacity,
                section.enrolled_count,
            ],
        )?;
        insert_slots(&tx, section.id, &section.schedule)?;
        tx.commit()?;
        Ok(())
    }

    pub fn record_completed_course(
        &self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<(), StoreError> {
        let db = self.conn()?;
        db.execute(
            "INSERT OR IGNORE INTO completed_courses (student_id, course_id) VALUES (?1, ?2)",
            [student_id, course_id],
        )?;
        Ok(())
    }

    pub fn assign_advisor(
        &self,
        student_id: StudentId,
        advisor_id: AdvisorId,
    ) -> Result<(), StoreError> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO advisors (student_id, advisor_id) VALUES (?1, ?2)
             ON CONFLICT(student_id) DO UPDATE SET advisor_id = excluded.advisor_id",
            [student_id, advisor_id],
        )?;
        Ok(())
    }

    pub fn course(&self, course_id: CourseId) -> Result<Option<Course>, StoreError> {
        let db = self.conn()?;
        load_course(&db, course_id)
    }

    /// Courses for the given ids, in id order. Unknown ids are skipped.
    pub fn courses_by_ids(&self, ids: &BTreeSet<CourseId>) -> Result<Vec<Course>, StoreError> {
        let db = self.conn()?;
        let mut courses = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(course) = load_course(&db, *id)? {
                courses.push(course);
            }
        }
        Ok(courses)
    }

    /// Every course offered by a section in `semester`
    pub fn courses_for_semester(
        &self,
        semester: &str,
    ) -> Result<HashMap<CourseId, Course>, StoreError> {
        let db = self.conn()?;
        let mut stmt =
            db.prepare("SELECT DISTINCT course_id FROM sections WHERE semester = ?1")?;
        let ids = stmt
            .query_map([semester], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut courses = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(course) = load_course(&db, id)? {
                courses.insert(id, course);
            }
        }
        Ok(courses)
    }

    /// All classrooms, smallest first
    pub fn classrooms(&self) -> Result<Vec<Classroom>, StoreError> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT classroom_id, name, capacity FROM classrooms ORDER BY capacity, classroom_id",
        )?;
        let rooms = stmt
            .query_map([], |row| {
                Ok(Classroom {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    capacity: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rooms)
    }

    pub fn classroom(&self, classroom_id: ClassroomId) -> Result<Option<Classroom>, StoreError> {
        let db = self.conn()?;
        let room = db
            .query_row(
                "SELECT classroom_id, name, capacity FROM classrooms WHERE classroom_id = ?1",
                [classroom_id],
                |row| {
                    Ok(Classroom {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        capacity: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(room)
    }

    pub fn section(&self, section_id: SectionId) -> Result<Option<Section>, StoreError> {
        let db = self.conn()?;
        load_section(&db, section_id)
    }

    /// Sections of a semester with their schedules, in id order
    pub fn sections_for_semester(&self, semester: &str) -> Result<Vec<Section>, StoreError> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {SECTION_COLUMNS} FROM sections WHERE semester = ?1 ORDER BY section_id"
        ))?;
        let sections = stmt
            .query_map([semester], section_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        sections
            .into_iter()
            .map(|mut section| {
                section.schedule = load_slots(&db, section.id)?;
                Ok(section)
            })
            .collect()
    }

    /// `(student, section)` pairs of every PENDING or ACTIVE enrollment in a semester
    pub fn seat_holders_for_semester(
        &self,
        semester: &str,
    ) -> Result<Vec<(StudentId, SectionId)>, StoreError> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT e.student_id, e.section_id
             FROM enrollments e
             JOIN sections s ON s.section_id = e.section_id
             WHERE s.semester = ?1 AND e.status IN ('PENDING', 'ACTIVE')
             ORDER BY e.enrollment_id",
        )?;
        let pairs = stmt
            .query_map([semester], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pairs)
    }

    /// Every semester that has at least one section
    pub fn semesters(&self) -> Result<Vec<String>, StoreError> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT DISTINCT semester FROM sections ORDER BY semester")?;
        let semesters = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(semesters)
    }

    // ---- schedules -----------------------------------------------------------------

    /// Removes every slot of every section in `semester`, returning the number removed
    pub fn clear_semester_schedules(&self, semester: &str) -> Result<usize, StoreError> {
        let db = self.conn()?;
        let removed = db.execute(
            "DELETE FROM section_slots
             WHERE section_id IN (SELECT section_id FROM sections WHERE semester = ?1)",
            [semester],
        )?;
        Ok(removed)
    }

    /// Replaces one section's schedule wholesale, or leaves it untouched on error
    pub fn replace_section_schedule(
        &self,
        section_id: SectionId,
        slots: &[TimeSlot],
    ) -> Result<(), StoreError> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        tx.execute("DELETE FROM section_slots WHERE section_id = ?1", [section_id])?;
        insert_slots(&tx, section_id, slots)?;
        tx.commit()?;
        Ok(())
    }

    // ---- enrollments ---------------------------------------------------------------

    pub fn enrollment(&self, enrollment_id: EnrollmentId) -> Result<Option<Enrollment>, StoreError> {
        let db = self.conn()?;
        load_enrollment(&db, enrollment_id)
    }

    /// A student's enrollments, oldest first, optionally limited to one semester
    pub fn enrollments_for_student(
        &self,
        student_id: StudentId,
        semester: Option<&str>,
    ) -> Result<Vec<Enrollment>, StoreError> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM enrollments
             WHERE student_id = ?1
               AND (?2 IS NULL OR section_id IN (SELECT section_id FROM sections WHERE semester = ?2))
             ORDER BY enrollment_id",
            DbEnrollment::COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![student_id, semester], DbEnrollment::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Enrollment::try_from).collect()
    }

    /// The PENDING or ACTIVE enrollment a student holds in a section, if any
    pub fn seat_holding_enrollment(
        &self,
        student_id: StudentId,
        section_id: SectionId,
    ) -> Result<Option<Enrollment>, StoreError> {
        let db = self.conn()?;
        let row = db
            .query_row(
                &format!(
                    "SELECT {} FROM enrollments
                     WHERE student_id = ?1 AND section_id = ?2 AND status IN ('PENDING', 'ACTIVE')",
                    DbEnrollment::COLUMNS
                ),
                [student_id, section_id],
                DbEnrollment::from_row,
            )
            .optional()?;
        row.map(Enrollment::try_from).transpose()
    }

    /// Takes a seat and creates a PENDING enrollment in one transaction.
    ///
    /// The seat is taken with a conditional increment, so two requests racing for the
    /// last seat cannot both succeed. Returns `None` when the section is full.
    pub fn insert_pending_enrollment(
        &self,
        student_id: StudentId,
        section_id: SectionId,
        at: DateTime<Utc>,
    ) -> Result<Option<Enrollment>, StoreError> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        let taken = tx.execute(
            "UPDATE sections SET enrolled_count = enrolled_count + 1
             WHERE section_id = ?1 AND enrolled_count < capacity",
            [section_id],
        )?;
        if taken == 0 {
            return Ok(None);
        }
        tx.execute(
            "INSERT INTO enrollments (student_id, section_id, status, requested_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                student_id,
                section_id,
                EnrollmentStatus::Pending.as_str(),
                at
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(Some(Enrollment {
            id,
            student_id,
            section_id,
            status: EnrollmentStatus::Pending,
            requested_at: at,
            decided_at: None,
            decided_by: None,
            rejection_reason: None,
        }))
    }

    /// Applies a status change if the row still has `change.from`, releasing the seat when
    /// the new status no longer holds one. Returns `None` if the row had moved on.
    pub fn transition_enrollment(
        &self,
        change: &StatusChange<'_>,
    ) -> Result<Option<Enrollment>, StoreError> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        let updated = tx.execute(
            "UPDATE enrollments SET
                status = ?1,
                decided_at = ?2,
                decided_by = COALESCE(?3, decided_by),
                rejection_reason = COALESCE(?4, rejection_reason)
             WHERE enrollment_id = ?5 AND status = ?6",
            params![
                change.to.as_str(),
                change.at,
                change.decided_by,
                change.reason,
                change.enrollment_id,
                change.from.as_str(),
            ],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        if change.from.holds_seat() && !change.to.holds_seat() {
            tx.execute(
                "UPDATE sections SET enrolled_count = enrolled_count - 1
                 WHERE section_id = (SELECT section_id FROM enrollments WHERE enrollment_id = ?1)
                   AND enrolled_count > 0",
                [change.enrollment_id],
            )?;
        }
        tx.commit()?;
        load_enrollment(&db, change.enrollment_id)
    }

    /// PENDING enrollments of the advisor's students, newest first
    pub fn pending_for_advisor(&self, advisor_id: AdvisorId) -> Result<Vec<Enrollment>, StoreError> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM enrollments
             WHERE status = 'PENDING'
               AND student_id IN (SELECT student_id FROM advisors WHERE advisor_id = ?1)
             ORDER BY requested_at DESC, enrollment_id DESC",
            DbEnrollment::COLUMNS
        ))?;
        let rows = stmt
            .query_map([advisor_id], DbEnrollment::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Enrollment::try_from).collect()
    }

    // ---- settings ------------------------------------------------------------------

    /// Current settings. Unset keys fall back to open enrollment and no semester filter.
    pub fn settings(&self) -> Result<AcademicSettings, StoreError> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT key, value FROM settings")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut settings = AcademicSettings::default();
        for (key, value) in rows {
            match key.as_str() {
                "enrollment_open" => {
                    settings.enrollment_open = match value.as_str() {
                        "true" | "1" => true,
                        "false" | "0" => false,
                        other => {
                            return Err(StoreError::Corrupt {
                                message: format!("enrollment_open = {other}"),
                            })
                        }
                    }
                }
                "current_semester" => settings.current_semester = Some(value),
                _ => {}
            }
        }
        Ok(settings)
    }

    pub fn update_settings(&self, settings: &AcademicSettings) -> Result<(), StoreError> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO settings (key, value) VALUES ('enrollment_open', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [settings.enrollment_open.to_string()],
        )?;
        match &settings.current_semester {
            Some(semester) => tx.execute(
                "INSERT INTO settings (key, value) VALUES ('current_semester', ?1)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                [semester],
            )?,
            None => tx.execute("DELETE FROM settings WHERE key = 'current_semester'", [])?,
        };
        tx.commit()?;
        Ok(())
    }

    // ---- reservations --------------------------------------------------------------

    pub fn insert_reservation(
        &self,
        request: &ReservationRequest,
        at: DateTime<Utc>,
    ) -> Result<Reservation, StoreError> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO reservations
                (classroom_id, requested_by, semester, date, start_minute, end_minute,
                 purpose, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                request.classroom_id,
                request.requested_by,
                request.semester,
                request.date,
                request.start.minutes(),
                request.end.minutes(),
                request.purpose.trim(),
                ReservationStatus::Pending.as_str(),
                at,
            ],
        )?;
        let id = db.last_insert_rowid();
        load_reservation(&db, id)?.ok_or_else(|| StoreError::Corrupt {
            message: format!("reservation {id} vanished after insert"),
        })
    }

    pub fn reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<Reservation>, StoreError> {
        let db = self.conn()?;
        load_reservation(&db, reservation_id)
    }

    /// APPROVED reservations of one room on one date
    pub fn approved_reservations(
        &self,
        classroom_id: ClassroomId,
        date: NaiveDate,
    ) -> Result<Vec<Reservation>, StoreError> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM reservations
             WHERE classroom_id = ?1 AND date = ?2 AND status = 'APPROVED'
             ORDER BY start_minute",
            DbReservation::COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![classroom_id, date], DbReservation::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Reservation::try_from).collect()
    }

    /// Compare-and-set on a reservation's status. Returns `None` if it had moved on.
    pub fn set_reservation_status(
        &self,
        reservation_id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
        decided_by: Option<i64>,
    ) -> Result<Option<Reservation>, StoreError> {
        let db = self.conn()?;
        let updated = db.execute(
            "UPDATE reservations SET status = ?1, decided_by = COALESCE(?2, decided_by)
             WHERE reservation_id = ?3 AND status = ?4",
            params![to.as_str(), decided_by, reservation_id, from.as_str()],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        load_reservation(&db, reservation_id)
    }
}

impl StudentRecords for Store {
    fn completed_courses(&self, student_id: StudentId) -> Result<HashSet<CourseId>, StoreError> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT course_id FROM completed_courses WHERE student_id = ?1")?;
        let ids = stmt
            .query_map([student_id], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(ids)
    }

    fn advisor_of(&self, student_id: StudentId) -> Result<Option<AdvisorId>, StoreError> {
        let db = self.conn()?;
        let advisor = db
            .query_row(
                "SELECT advisor_id FROM advisors WHERE student_id = ?1",
                [student_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(advisor)
    }
}

impl SettingsSource for Store {
    fn academic_settings(&self) -> Result<AcademicSettings, StoreError> {
        self.settings()
    }
}

fn insert_slots(
    conn: &Connection,
    section_id: SectionId,
    slots: &[TimeSlot],
) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(
        "INSERT INTO section_slots (section_id, day, start_minute, end_minute, classroom_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for slot in slots {
        stmt.execute(params![
            section_id,
            slot.day.number(),
            slot.start.minutes(),
            slot.end.minutes(),
            slot.room_id,
        ])?;
    }
    Ok(())
}

fn section_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Section> {
    Ok(Section {
        id: row.get(0)?,
        course_id: row.get(1)?,
        semester: row.get(2)?,
        section_number: row.get(3)?,
        instructor_id: row.get(4)?,
        capacity: row.get(5)?,
        enrolled_count: row.get(6)?,
        schedule: Vec::new(),
    })
}

fn load_slots(conn: &Connection, section_id: SectionId) -> Result<Vec<TimeSlot>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT day, start_minute, end_minute, classroom_id FROM section_slots
         WHERE section_id = ?1 ORDER BY day, start_minute",
    )?;
    let rows = stmt
        .query_map([section_id], DbSlot::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(TimeSlot::try_from).collect()
}

fn load_section(conn: &Connection, section_id: SectionId) -> Result<Option<Section>, StoreError> {
    let section = conn
        .query_row(
            &format!("SELECT {SECTION_COLUMNS} FROM sections WHERE section_id = ?1"),
            [section_id],
            section_from_row,
        )
        .optional()?;
    match section {
        Some(mut section) => {
            section.schedule = load_slots(conn, section.id)?;
            Ok(Some(section))
        }
        None => Ok(None),
    }
}

fn load_course(conn: &Connection, course_id: CourseId) -> Result<Option<Course>, StoreError> {
    let course = conn
        .query_row(
            "SELECT course_id, code, credits, weekly_hours FROM courses WHERE course_id = ?1",
            [course_id],
            |row| {
                Ok(Course {
                    id: row.get(0)?,
                    code: row.get(1)?,
                    credits: row.get(2)?,
                    weekly_hours: row.get(3)?,
                    prerequisite_course_ids: BTreeSet::new(),
                })
            },
        )
        .optional()?;
    let Some(mut course) = course else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT prerequisite_id FROM course_prerequisites WHERE course_id = ?1",
    )?;
    course.prerequisite_course_ids = stmt
        .query_map([course_id], |row| row.get(0))?
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;
    Ok(Some(course))
}

fn load_enrollment(
    conn: &Connection,
    enrollment_id: EnrollmentId,
) -> Result<Option<Enrollment>, StoreError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM enrollments WHERE enrollment_id = ?1",
                DbEnrollment::COLUMNS
            ),
            [enrollment_id],
            DbEnrollment::from_row,
        )
        .optional()?;
    row.map(Enrollment::try_from).transpose()
}

fn load_reservation(
    conn: &Connection,
    reservation_id: ReservationId,
) -> Result<Option<Reservation>, StoreError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM reservations WHERE reservation_id = ?1",
                DbReservation::COLUMNS
            ),
            [reservation_id],
            DbReservation::from_row,
        )
        .optional()?;
    row.map(Reservation::try_from).transpose()
}
