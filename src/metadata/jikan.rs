//! Jikan (MyAnimeList) REST client (C4)
//!
//! Two stacked buckets: 3 requests/second and 60/minute. Both must admit
//! before a request goes out. 404 maps to `None`.

use std::time::Duration;

use anyhow::Result;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::media::{fuzzy_date, AnimeMedia};
use super::ratelimit::{RateLimiter, TokenBucket};

const JIKAN_API: &str = "https://api.jikan.moe/v4";

#[derive(Deserialize)]
struct JikanResponse<T> {
    data: T,
}

#[derive(Deserialize)]
struct MalAnime {
    mal_id: i64,
    title: String,
    title_english: Option<String>,
    title_japanese: Option<String>,
    episodes: Option<i32>,
    status: Option<String>,
    #[serde(rename = "type")]
    anime_type: Option<String>,
    year: Option<i32>,
    aired: Option<Aired>,
}

#[derive(Deserialize)]
struct Aired {
    prop: Option<AiredProp>,
}

#[derive(Deserialize)]
struct AiredProp {
    from: Option<AiredDate>,
    to: Option<AiredDate>,
}

#[derive(Deserialize)]
struct AiredDate {
    day: Option<u32>,
    month: Option<u32>,
    year: Option<i32>,
}

impl MalAnime {
    fn into_media(self) -> AnimeMedia {
        let mut titles = vec![self.title];
        for title in [self.title_english, self.title_japanese].into_iter().flatten() {
            if !titles.contains(&title) {
                titles.push(title);
            }
        }
        let prop = self.aired.and_then(|a| a.prop);
        let start_date = prop
            .as_ref()
            .and_then(|p| p.from.as_ref())
            .and_then(|d| fuzzy_date(d.year, d.month, d.day));
        let end_date = prop
            .as_ref()
            .and_then(|p| p.to.as_ref())
            .and_then(|d| fuzzy_date(d.year, d.month, d.day));

        AnimeMedia {
            anilist_id: None,
            mal_id: Some(self.mal_id),
            titles,
            start_date,
            end_date,
            episodes: self.episodes,
            season_year: self.year.or_else(|| start_date.map(|d| {
                use chrono::Datelike;
                d.year()
            })),
            season: None,
            format: self.anime_type.map(|t| t.to_uppercase()),
            airing: self.status.as_deref() == Some("Currently Airing"),
        }
    }
}

pub struct JikanClient {
    http: Client,
    limiter: RateLimiter,
}

impl JikanClient {
    pub fn new() -> Self {
        Self {
            http: Client::builder()
                .user_agent("Awarr/1.0")
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            limiter: RateLimiter::new(vec![
                TokenBucket::new(3, Duration::from_secs(1)),
                TokenBucket::new(60, Duration::from_secs(60)),
            ]),
        }
    }

    /// Lookup by MyAnimeList id. Returns `None` on 404.
    pub async fn get_by_id(&self, mal_id: i64) -> Result<Option<AnimeMedia>> {
        let url = format!("{}/anime/{}", JIKAN_API, mal_id);

        let mut retried = false;
        loop {
            self.limiter.acquire().await;
            let response = self.http.get(&url).send().await?;
            let status = response.status();

            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if status == StatusCode::TOO_MANY_REQUESTS {
                let wait = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(2);
                self.limiter.penalize(Duration::from_secs(wait));
                if !retried {
                    retried = true;
                    tracing::warn!("Jikan rate limited, retrying after {}s", wait);
                    continue;
                }
                anyhow::bail!("Jikan rate limited twice, giving up");
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("Jikan API error: {} - {}", status, body);
            }

            let body: JikanResponse<MalAnime> = response.json().await?;
            return Ok(Some(body.data.into_media()));
        }
    }
}

impl Default for JikanClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mal_mapping_uses_aired_prop() {
        let anime: MalAnime = serde_json::from_value(serde_json::json!({
            "mal_id": 58172,
            "title": "Sakamoto Days",
            "title_english": "SAKAMOTO DAYS",
            "title_japanese": "SAKAMOTO DAYS",
            "episodes": 11,
            "status": "Finished Airing",
            "type": "TV",
            "year": 2025,
            "aired": {
                "prop": {
                    "from": {"day": 11, "month": 1, "year": 2025},
                    "to": {"day": 5, "month": 4, "year": 2025}
                }
            }
        }))
        .unwrap();

        let media = anime.into_media();
        assert_eq!(media.mal_id, Some(58172));
        assert_eq!(
            media.start_date.unwrap().to_rfc3339(),
            "2025-01-11T00:00:00+00:00"
        );
        assert_eq!(
            media.end_date.unwrap().to_rfc3339(),
            "2025-04-05T00:00:00+00:00"
        );
        assert_eq!(media.format.as_deref(), Some("TV"));
        assert!(!media.airing);
    }

    #[test]
    fn season_year_falls_back_to_start_date() {
        let anime: MalAnime = serde_json::from_value(serde_json::json!({
            "mal_id": 1,
            "title": "X",
            "status": "Currently Airing",
            "aired": {"prop": {"from": {"year": 2024, "month": 10}}}
        }))
        .unwrap();
        let media = anime.into_media();
        assert_eq!(media.season_year, Some(2024));
        assert!(media.airing);
    }
}
