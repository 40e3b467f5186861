//! Download lifecycle events
//!
//! Broadcast to interested subsystems; the notification dispatcher fans them
//! out to the providers configured in Sonarr.

use serde::Serialize;

/// Identifies the episode an event is about.
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeRef {
    pub series_title: String,
    pub season_number: i32,
    pub episode_number: i32,
    pub episode_title: Option<String>,
}

impl EpisodeRef {
    /// `Series - S01E05 - Title` style label used in notification bodies.
    pub fn label(&self) -> String {
        match &self.episode_title {
            Some(title) => format!(
                "{} - S{:02}E{:02} - {}",
                self.series_title, self.season_number, self.episode_number, title
            ),
            None => format!(
                "{} - S{:02}E{:02}",
                self.series_title, self.season_number, self.episode_number
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum DownloadEvent {
    Success { episode: EpisodeRef },
    Error { episode: EpisodeRef, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_includes_padded_numbers() {
        let episode = EpisodeRef {
            series_title: "Sakamoto Days".to_string(),
            season_number: 1,
            episode_number: 5,
            episode_title: Some("Hard Mode".to_string()),
        };
        assert_eq!(episode.label(), "Sakamoto Days - S01E05 - Hard Mode");

        let bare = EpisodeRef {
            episode_title: None,
            ..episode
        };
        assert_eq!(bare.label(), "Sakamoto Days - S01E05");
    }
}
