pub mod backup;
pub mod core;
pub mod courses;
pub mod enrollments;
pub mod import;
pub mod offerings;
pub mod setup;
pub mod staff;
pub mod students;
