use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::conflict::ConflictIndex;
use crate::db::Store;
use crate::enrollment::AdmissionEngine;
use crate::error::StoreError;
use crate::locks::LockRegistry;
use crate::reservation::ReservationDesk;
use crate::timetable::TimetableService;

/// Shared state handed to every request handler.
pub struct AppState {
    pub store: Arc<Store>,
    pub timetable: TimetableService,
    pub admissions: AdmissionEngine,
    pub reservations: ReservationDesk,
}

impl AppState {
    /// Wires the services around one store. The conflict index starts empty; call
    /// [`AppState::rebuild_index`] before serving requests.
    pub fn new(config: AppConfig, store: Store) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(store);
        let index = Arc::new(ConflictIndex::new());
        let locks = Arc::new(LockRegistry::new());

        let timetable =
            TimetableService::new(store.clone(), index.clone(), locks.clone(), config.clone());
        let admissions = AdmissionEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            index.clone(),
            locks.clone(),
            config.collaborator_timeout(),
        );
        let reservations =
            ReservationDesk::new(store.clone(), index.clone(), locks.clone(), config.clone());

        Self {
            store,
            timetable,
            admissions,
            reservations,
        }
    }

    /// Rebuilds the conflict index of every semester from the persisted sections and
    /// seat-holding enrollments.
    pub fn rebuild_index(&self) -> Result<(), StoreError> {
        for semester in self.store.semesters()? {
            let stats = self.timetable.resync(&semester)?;
            info!(
                semester = %semester,
                intervals = stats.intervals,
                collisions = stats.collisions,
                "Conflict index rebuilt"
            );
        }
        Ok(())
    }
}
