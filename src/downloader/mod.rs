//! Download Engine Module
//!
//! Bounded download queue with ranged multi-worker transfers.

pub mod engine;
pub mod events;
pub mod finalizer;
pub mod progress;
pub mod queue;

pub use engine::RangedDownloadEngine;
pub use events::{DownloadEvent, EpisodeRef};
pub use finalizer::Finalizer;
pub use queue::{DownloadQueue, EnqueueRequest, QueueItem, QueueSnapshot, QueueStatus};
