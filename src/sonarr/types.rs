//! Sonarr v3 API wire types.

use serde::{Deserialize, Serialize};

use crate::db::models::AlternateTitle;

#[derive(Debug, Clone, Deserialize)]
pub struct SystemStatus {
    pub version: Option<String>,
    #[serde(rename = "appName")]
    pub app_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaImage {
    #[serde(rename = "coverType")]
    pub cover_type: String,
    pub url: Option<String>,
    #[serde(rename = "remoteUrl")]
    pub remote_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeasonStatistics {
    #[serde(rename = "episodeCount", default)]
    pub episode_count: Option<i32>,
    #[serde(rename = "episodeFileCount", default)]
    pub episode_file_count: Option<i32>,
    #[serde(rename = "totalEpisodeCount", default)]
    pub total_episode_count: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeasonResource {
    #[serde(rename = "seasonNumber")]
    pub season_number: i32,
    pub monitored: bool,
    pub statistics: Option<SeasonStatistics>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SonarrSeries {
    pub id: i64,
    pub title: String,
    #[serde(rename = "alternateTitles", default)]
    pub alternate_titles: Vec<AlternateTitle>,
    pub overview: Option<String>,
    pub status: Option<String>,
    pub year: Option<i32>,
    pub network: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(rename = "seriesType")]
    pub series_type: Option<String>,
    pub monitored: Option<bool>,
    #[serde(default)]
    pub tags: Vec<i64>,
    #[serde(default)]
    pub images: Vec<MediaImage>,
    #[serde(default)]
    pub seasons: Vec<SeasonResource>,
    pub path: Option<String>,
}

impl SonarrSeries {
    pub fn is_anime(&self) -> bool {
        self.series_type.as_deref() == Some("anime")
    }

    pub fn poster_url(&self) -> Option<String> {
        self.images
            .iter()
            .find(|i| i.cover_type == "poster")
            .and_then(|i| i.remote_url.clone().or_else(|| i.url.clone()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SonarrEpisode {
    pub id: i64,
    #[serde(rename = "seriesId")]
    pub series_id: i64,
    pub title: Option<String>,
    #[serde(rename = "seasonNumber")]
    pub season_number: i32,
    #[serde(rename = "episodeNumber")]
    pub episode_number: i32,
    #[serde(rename = "absoluteEpisodeNumber")]
    pub absolute_episode_number: Option<i32>,
    #[serde(rename = "hasFile")]
    pub has_file: bool,
    pub monitored: bool,
    #[serde(rename = "airDateUtc")]
    pub air_date_utc: Option<String>,
    #[serde(rename = "episodeFileId")]
    pub episode_file_id: Option<i64>,
}

/// One record of `wanted/missing` with `includeSeries=true`.
#[derive(Debug, Clone, Deserialize)]
pub struct WantedRecord {
    pub id: i64,
    #[serde(rename = "seriesId")]
    pub series_id: i64,
    pub title: Option<String>,
    #[serde(rename = "seasonNumber")]
    pub season_number: i32,
    #[serde(rename = "episodeNumber")]
    pub episode_number: i32,
    #[serde(rename = "absoluteEpisodeNumber")]
    pub absolute_episode_number: Option<i32>,
    #[serde(rename = "airDateUtc")]
    pub air_date_utc: Option<String>,
    pub series: Option<SonarrSeries>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WantedPage {
    pub page: i32,
    #[serde(rename = "pageSize")]
    pub page_size: i32,
    #[serde(rename = "totalRecords")]
    pub total_records: i64,
    #[serde(default)]
    pub records: Vec<WantedRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RootFolderResource {
    pub id: i64,
    pub path: String,
    #[serde(default)]
    pub accessible: bool,
    #[serde(rename = "freeSpace")]
    pub free_space: Option<i64>,
    #[serde(rename = "totalSpace")]
    pub total_space: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Tag {
    pub id: i64,
    pub label: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationField {
    pub name: String,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

/// A notification provider configured in Sonarr. The `fields` array carries
/// heterogeneous per-implementation keys (`webHookUrl`, `url`, `method`, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    pub id: i64,
    pub name: String,
    pub implementation: String,
    #[serde(rename = "onDownload", default)]
    pub on_download: bool,
    #[serde(default)]
    pub fields: Vec<NotificationField>,
}

impl NotificationConfig {
    /// Look up a field by name, returning its value as a string when present.
    pub fn field_str(&self, name: &str) -> Option<String> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .and_then(|f| f.value.as_ref())
            .and_then(|v| match v {
                serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }

    /// Look up an array-of-strings field by name.
    pub fn field_str_list(&self, name: &str) -> Vec<String> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .and_then(|f| f.value.as_ref())
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_field_extraction() {
        let json = serde_json::json!({
            "id": 1,
            "name": "chat",
            "implementation": "Discord",
            "onDownload": true,
            "fields": [
                {"name": "webHookUrl", "value": "https://discord.com/api/webhooks/x"},
                {"name": "grabFields", "value": 0},
                {"name": "statelessUrls", "value": ["https://a", "https://b"]},
                {"name": "empty", "value": ""}
            ]
        });
        let config: NotificationConfig = serde_json::from_value(json).unwrap();
        assert!(config.on_download);
        assert_eq!(
            config.field_str("webHookUrl").unwrap(),
            "https://discord.com/api/webhooks/x"
        );
        assert_eq!(config.field_str("grabFields").unwrap(), "0");
        assert_eq!(config.field_str("empty"), None);
        assert_eq!(config.field_str("missing"), None);
        assert_eq!(config.field_str_list("statelessUrls").len(), 2);
    }

    #[test]
    fn wanted_page_parses_sonarr_shape() {
        let json = serde_json::json!({
            "page": 1,
            "pageSize": 100,
            "totalRecords": 1,
            "records": [{
                "id": 7, "seriesId": 3, "title": "Ep",
                "seasonNumber": 1, "episodeNumber": 15,
                "absoluteEpisodeNumber": 15,
                "airDateUtc": "2025-01-11T15:00:00Z",
                "series": {"id": 3, "title": "One Piece", "seriesType": "anime", "tags": [2]}
            }]
        });
        let page: WantedPage = serde_json::from_value(json).unwrap();
        assert_eq!(page.records.len(), 1);
        let rec = &page.records[0];
        assert_eq!(rec.absolute_episode_number, Some(15));
        assert!(rec.series.as_ref().unwrap().is_anime());
    }
}
