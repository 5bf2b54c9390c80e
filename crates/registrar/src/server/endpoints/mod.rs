pub mod enrollment;
pub mod reservation;
pub mod scheduling;
pub mod settings;
pub mod status;
