//! Background tasks and their scheduler

pub mod fetch_wanted;
pub mod scheduler;
pub mod update_metadata;

pub use fetch_wanted::FetchWantedTask;
pub use scheduler::{Task, TaskRecord, TaskScheduler, TaskStatus};
pub use update_metadata::UpdateMetadataTask;
