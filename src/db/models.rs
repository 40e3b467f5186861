//! Domain models persisted in the local store.
//!
//! JSON columns (`alternate_titles`, `genres`, `download_urls`) are decoded
//! into typed values at the storage boundary and encoded on write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Airing status of a series, as reported by Sonarr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesStatus {
    Ongoing,
    Completed,
    Cancelled,
}

impl SeriesStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ongoing => "ongoing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed" | "ended" => Self::Completed,
            "cancelled" | "deleted" => Self::Cancelled,
            _ => Self::Ongoing,
        }
    }
}

/// Download progress of a season.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeasonStatus {
    NotStarted,
    Downloading,
    Completed,
}

impl SeasonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "downloading" => Self::Downloading,
            "completed" => Self::Completed,
            _ => Self::NotStarted,
        }
    }
}

/// Audio language preference when matching releases on the source site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguagePreference {
    Dub,
    Sub,
    DubFallbackSub,
}

impl LanguagePreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dub => "dub",
            Self::Sub => "sub",
            Self::DubFallbackSub => "dub_fallback_sub",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "dub" => Self::Dub,
            "dub_fallback_sub" => Self::DubFallbackSub,
            _ => Self::Sub,
        }
    }
}

/// An alternate title from Sonarr, optionally scoped to one season.
///
/// `scene_season_number` < 0 means the title applies to every season.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlternateTitle {
    pub title: String,
    #[serde(rename = "sceneSeasonNumber", default)]
    pub scene_season_number: Option<i32>,
}

/// A monitored series mirrored from Sonarr.
#[derive(Debug, Clone, Serialize)]
pub struct Series {
    pub id: i64,
    /// Sonarr's series id.
    pub sonarr_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: SeriesStatus,
    pub total_seasons: i32,
    pub poster_url: Option<String>,
    pub poster_path: Option<String>,
    pub poster_downloaded_at: Option<DateTime<Utc>>,
    pub alternate_titles: Vec<AlternateTitle>,
    pub genres: Vec<String>,
    pub year: Option<i32>,
    pub network: Option<String>,
    /// Per-series override of the global preference.
    pub preferred_language: Option<LanguagePreference>,
    /// Series uses absolute episode numbering; only season 1 is tracked.
    pub absolute: bool,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One season of a series. For absolute-numbered series only season 1 exists.
#[derive(Debug, Clone, Serialize)]
pub struct Season {
    pub id: i64,
    pub series_id: i64,
    pub season_number: i32,
    pub title: Option<String>,
    pub total_episodes: i32,
    pub missing_episodes: i32,
    pub status: SeasonStatus,
    /// Source-site identifiers in air-date order, one per part of the season.
    /// `None` and an empty list both mean "no identifier known yet".
    pub download_urls: Option<Vec<String>>,
    pub release_date: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Season {
    /// Identifiers usable by the download pipeline, in part order.
    pub fn identifiers(&self) -> &[String] {
        self.download_urls.as_deref().unwrap_or(&[])
    }
}

/// A Sonarr root folder with its process-local path mapping.
#[derive(Debug, Clone, Serialize)]
pub struct RootFolder {
    pub id: i64,
    pub sonarr_id: i64,
    /// The path as Sonarr sees it.
    pub path: String,
    /// The same folder from this process's point of view, if it differs.
    pub mapped_path: Option<String>,
    pub accessible: bool,
    pub free_space: Option<i64>,
    pub total_space: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RootFolder {
    /// Resolve a Sonarr-side path into the process-local equivalent.
    ///
    /// Picks the longest-prefix folder whose `path` is a prefix of `remote`;
    /// returns `None` when no folder matches or the match has no mapping.
    pub fn remap<'a>(folders: &'a [RootFolder], remote: &str) -> Option<(String, &'a RootFolder)> {
        let mut best: Option<&RootFolder> = None;
        for folder in folders {
            let prefix = folder.path.trim_end_matches('/');
            let boundary_ok = remote.strip_prefix(prefix).map_or(false, |rest| {
                rest.is_empty() || rest.starts_with('/')
            });
            if boundary_ok {
                match best {
                    Some(b) if b.path.len() >= folder.path.len() => {}
                    _ => best = Some(folder),
                }
            }
        }
        let folder = best?;
        let mapped = folder.mapped_path.as_deref()?;
        let prefix = folder.path.trim_end_matches('/');
        let suffix = &remote[prefix.len()..];
        Some((format!("{}{}", mapped.trim_end_matches('/'), suffix), folder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(id: i64, path: &str, mapped: Option<&str>) -> RootFolder {
        RootFolder {
            id,
            sonarr_id: id,
            path: path.to_string(),
            mapped_path: mapped.map(String::from),
            accessible: true,
            free_space: None,
            total_space: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn remap_picks_longest_prefix() {
        let folders = vec![
            folder(1, "/data", Some("/mnt/data")),
            folder(2, "/data/anime", Some("/mnt/anime")),
        ];
        let (mapped, hit) = RootFolder::remap(&folders, "/data/anime/One Piece").unwrap();
        assert_eq!(hit.id, 2);
        assert_eq!(mapped, "/mnt/anime/One Piece");
    }

    #[test]
    fn remap_returns_none_without_match() {
        let folders = vec![folder(1, "/data", Some("/mnt/data"))];
        assert!(RootFolder::remap(&folders, "/other/show").is_none());
        // Prefix must end on a path boundary.
        assert!(RootFolder::remap(&folders, "/database/show").is_none());
    }

    #[test]
    fn remap_requires_mapping() {
        let folders = vec![folder(1, "/data", None)];
        assert!(RootFolder::remap(&folders, "/data/show").is_none());
    }

    #[test]
    fn language_round_trip() {
        for lang in [
            LanguagePreference::Dub,
            LanguagePreference::Sub,
            LanguagePreference::DubFallbackSub,
        ] {
            assert_eq!(LanguagePreference::parse(lang.as_str()), lang);
        }
    }
}
