//! Library-manager (Sonarr) integration

pub mod client;
pub mod types;

pub use client::{SeasonAirDateInfo, SonarrClient};
