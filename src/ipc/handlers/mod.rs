pub mod attendance;
pub mod catalog;
pub mod classes;
pub mod core;
pub mod dashboard;
pub mod enrollment;
pub mod users;
