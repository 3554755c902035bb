pub mod attendance;
pub mod backup;
pub mod classes;
pub mod core;
pub mod grades;
pub mod schedule;
pub mod schools;
pub mod seasons;
pub mod students;
pub mod teachers;
