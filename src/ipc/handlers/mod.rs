pub mod backup;
pub mod blocked;
pub mod core;
pub mod courses;
pub mod instances;
pub mod institutions;
pub mod instructors;
pub mod lessons;
pub mod scheduling;
pub mod setup;
pub mod tasks;
