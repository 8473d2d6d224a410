pub mod academics;
pub mod admissions;
pub mod attendance;
pub mod backup;
pub mod committee;
pub mod core;
pub mod exams;
pub mod institutions;
pub mod notifications;
pub mod payments;
pub mod reports;
pub mod sponsorship;
