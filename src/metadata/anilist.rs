//! AniList GraphQL client (C4)
//!
//! Rate limited to ~90 requests per minute. A 429 pauses the whole client
//! for the advertised `Retry-After` and retries once.

use std::time::Duration;

use anyhow::Result;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::media::{fuzzy_date, AnimeMedia};
use super::ratelimit::{RateLimiter, TokenBucket};

const ANILIST_API: &str = "https://graphql.anilist.co";

const MEDIA_FIELDS: &str = r#"
    id
    idMal
    title { romaji english native }
    startDate { year month day }
    endDate { year month day }
    episodes
    seasonYear
    season
    format
    status
"#;

#[derive(Serialize)]
struct GraphQLRequest<'a, V: Serialize> {
    query: &'a str,
    variables: V,
}

#[derive(Deserialize)]
struct FuzzyDate {
    year: Option<i32>,
    month: Option<u32>,
    day: Option<u32>,
}

#[derive(Deserialize)]
struct Title {
    romaji: Option<String>,
    english: Option<String>,
    native: Option<String>,
}

#[derive(Deserialize)]
struct Media {
    id: i64,
    #[serde(rename = "idMal")]
    id_mal: Option<i64>,
    title: Title,
    #[serde(rename = "startDate")]
    start_date: Option<FuzzyDate>,
    #[serde(rename = "endDate")]
    end_date: Option<FuzzyDate>,
    episodes: Option<i32>,
    #[serde(rename = "seasonYear")]
    season_year: Option<i32>,
    season: Option<String>,
    format: Option<String>,
    status: Option<String>,
}

impl Media {
    fn into_media(self) -> AnimeMedia {
        let mut titles = Vec::new();
        for title in [self.title.romaji, self.title.english, self.title.native]
            .into_iter()
            .flatten()
        {
            if !titles.contains(&title) {
                titles.push(title);
            }
        }
        AnimeMedia {
            anilist_id: Some(self.id),
            mal_id: self.id_mal,
            titles,
            start_date: self
                .start_date
                .and_then(|d| fuzzy_date(d.year, d.month, d.day)),
            end_date: self.end_date.and_then(|d| fuzzy_date(d.year, d.month, d.day)),
            episodes: self.episodes,
            season_year: self.season_year,
            season: self.season,
            format: self.format,
            airing: self.status.as_deref() == Some("RELEASING"),
        }
    }
}

pub struct AnilistClient {
    http: Client,
    limiter: RateLimiter,
}

impl AnilistClient {
    pub fn new() -> Self {
        Self {
            http: Client::builder()
                .user_agent("Awarr/1.0")
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            limiter: RateLimiter::new(vec![TokenBucket::new(90, Duration::from_secs(60))]),
        }
    }

    /// Paginated media search by title.
    pub async fn search(&self, query: &str) -> Result<Vec<AnimeMedia>> {
        let gql = format!(
            r#"query ($search: String) {{
                Page(page: 1, perPage: 10) {{
                    media(search: $search, type: ANIME) {{ {} }}
                }}
            }}"#,
            MEDIA_FIELDS
        );

        #[derive(Serialize)]
        struct Vars<'a> {
            search: &'a str,
        }

        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "Page")]
            page: Page,
        }

        #[derive(Deserialize)]
        struct Page {
            media: Vec<Media>,
        }

        #[derive(Deserialize)]
        struct Response {
            data: Option<Data>,
        }

        let response: Response = self
            .execute(&GraphQLRequest {
                query: &gql,
                variables: Vars { search: query },
            })
            .await?;

        Ok(response
            .data
            .map(|d| d.page.media.into_iter().map(Media::into_media).collect())
            .unwrap_or_default())
    }

    /// Lookup by AniList id.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<AnimeMedia>> {
        let gql = format!(
            r#"query ($id: Int) {{
                Media(id: $id, type: ANIME) {{ {} }}
            }}"#,
            MEDIA_FIELDS
        );

        #[derive(Serialize)]
        struct Vars {
            id: i64,
        }

        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "Media")]
            media: Option<Media>,
        }

        #[derive(Deserialize)]
        struct Response {
            data: Option<Data>,
        }

        let response: Response = self
            .execute(&GraphQLRequest {
                query: &gql,
                variables: Vars { id },
            })
            .await?;

        Ok(response
            .data
            .and_then(|d| d.media)
            .map(Media::into_media))
    }

    async fn execute<V: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        body: &GraphQLRequest<'_, V>,
    ) -> Result<T> {
        let mut retried = false;
        loop {
            self.limiter.acquire().await;
            let response = self.http.post(ANILIST_API).json(body).send().await?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                let wait = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                self.limiter.penalize(Duration::from_secs(wait));
                if !retried {
                    retried = true;
                    tracing::warn!("AniList rate limited, retrying after {}s", wait);
                    continue;
                }
                anyhow::bail!("AniList rate limited twice, giving up");
            }

            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                anyhow::bail!("AniList error: {} - {}", status, text);
            }

            return Ok(response.json().await?);
        }
    }
}

impl Default for AnilistClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_mapping_normalizes_titles_and_dates() {
        let media: Media = serde_json::from_value(serde_json::json!({
            "id": 170942,
            "idMal": 58172,
            "title": {
                "romaji": "Sakamoto Days",
                "english": "Sakamoto Days",
                "native": "サカモトデイズ"
            },
            "startDate": {"year": 2025, "month": 1, "day": 11},
            "endDate": {"year": 2025, "month": 4, "day": 5},
            "episodes": 11,
            "seasonYear": 2025,
            "season": "WINTER",
            "format": "TV",
            "status": "FINISHED"
        }))
        .unwrap();

        let media = media.into_media();
        // Duplicate romaji/english collapsed.
        assert_eq!(media.titles, vec!["Sakamoto Days", "サカモトデイズ"]);
        assert_eq!(
            media.start_date.unwrap().to_rfc3339(),
            "2025-01-11T00:00:00+00:00"
        );
        assert!(!media.airing);
        assert_eq!(media.mal_id, Some(58172));
    }

    #[test]
    fn releasing_status_marks_airing() {
        let media: Media = serde_json::from_value(serde_json::json!({
            "id": 1,
            "title": {"romaji": "X"},
            "startDate": {"year": 2025, "month": 7},
            "status": "RELEASING"
        }))
        .unwrap();
        let media = media.into_media();
        assert!(media.airing);
        assert!(media.end_date.is_none());
    }
}
