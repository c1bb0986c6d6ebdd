pub mod attendance;
pub mod backup;
pub mod chapters;
pub mod core;
pub mod dashboard;
pub mod notifications;
pub mod questions;
pub mod results;
pub mod salary;
pub mod setup;
pub mod staff;
pub mod statements;
pub mod students;
