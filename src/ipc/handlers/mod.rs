pub mod attendance;
pub mod backup;
pub mod classrooms;
pub mod core;
pub mod courses;
pub mod enrollments;
pub mod holidays;
pub mod schedules;
pub mod sessions;
pub mod setup;
pub mod students;
