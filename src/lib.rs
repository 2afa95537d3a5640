pub mod config;
pub mod db;
pub mod model;
pub mod ops;
pub mod output;
pub mod recurrence;
pub mod report;
pub mod topic_notes;
pub mod trash;
