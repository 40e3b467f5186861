//! Source-site (AnimeWorld) scraping client

pub mod client;
pub mod titles;

pub use client::{AnimeWorldClient, FilterHit, FilterQuery, SearchHit, SiteError};
