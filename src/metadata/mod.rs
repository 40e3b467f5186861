//! External anime databases and the metadata synchroniser

pub mod anilist;
pub mod jikan;
pub mod media;
pub mod ratelimit;
pub mod sync;

pub use anilist::AnilistClient;
pub use jikan::JikanClient;
pub use sync::MetadataSync;
