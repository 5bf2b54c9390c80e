//! Lock registries that serialize work on shared schedule data.
//!
//! - A semester lock is held exclusively by a timetable run and shared by admission
//!   checks, so an enrollment never observes a half-generated timetable.
//! - A student lock makes each student's check-and-reserve sequence atomic with respect
//!   to that student's other requests. Different students proceed in parallel.
//! - A classroom lock serializes reservation decisions for one room.
//!
//! Lock order is student, then classroom, then semester.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::model::{ClassroomId, StudentId};

#[derive(Debug, Default)]
pub struct LockRegistry {
    semesters: DashMap<String, Arc<RwLock<()>>>,
    students: DashMap<StudentId, Arc<Mutex<()>>>,
    classrooms: DashMap<ClassroomId, Arc<Mutex<()>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets or creates the lock guarding a semester's schedule data.
    pub fn semester(&self, semester: &str) -> Arc<RwLock<()>> {
        if let Some(lock) = self.semesters.get(semester) {
            return lock.clone();
        }
        self.semesters
            .entry(semester.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Gets or creates the lock for the given student.
    pub fn student(&self, student_id: StudentId) -> Arc<Mutex<()>> {
        self.students
            .entry(student_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Gets or creates the lock for the given classroom.
    pub fn classroom(&self, classroom_id: ClassroomId) -> Arc<Mutex<()>> {
        self.classrooms
            .entry(classroom_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_same_key_shares_lock() {
        let locks = LockRegistry::new();
        assert!(Arc::ptr_eq(&locks.student(1), &locks.student(1)));
        assert!(!Arc::ptr_eq(&locks.student(1), &locks.student(2)));
        assert!(Arc::ptr_eq(
            &locks.semester("2025-SPRING"),
            &locks.semester("2025-SPRING")
        ));
    }

    #[tokio::test]
    async fn test_generation_excludes_readers() {
        let locks = LockRegistry::new();
        let lock = locks.semester("2025-SPRING");
        let _writer = lock.write().await;

        let other = locks.semester("2025-SPRING");
        let read = tokio::time::timeout(Duration::from_millis(20), other.read()).await;
        assert!(read.is_err(), "reader must wait for the generation run");

        let fall = locks.semester("2025-FALL");
        let read = tokio::time::timeout(Duration::from_millis(20), fall.read()).await;
        assert!(read.is_ok(), "other semesters are independent");
    }
}
