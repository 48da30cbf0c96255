pub mod activity;
pub mod classes;
pub mod core;
pub mod courses;
pub mod enrollment;
pub mod grading;
pub mod guidelines;
pub mod notifications;
pub mod reports;
pub mod transmutation;
pub mod users;
