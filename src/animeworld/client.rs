//! AnimeWorld client (C5)
//!
//! Session-bootstrapped scraper for the source site. The landing page
//! alternates between a JavaScript-set challenge cookie and a CSRF meta tag;
//! bootstrap tolerates either order over up to two fetches and keeps the
//! cookie jar for every later request.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::cookie::Jar;
use reqwest::Client;
use scraper::{Html, Selector};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::settings::Settings;

#[derive(Debug, Error)]
pub enum SiteError {
    #[error("session bootstrap failed: {0}")]
    Session(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("parse error: {0}")]
    Parse(String),
}

/// A hit from the JSON search endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchHit {
    pub id: i64,
    pub name: String,
    pub jtitle: String,
    pub link: String,
    /// Trailing slug after `/play/`, e.g. `one-piece.12345`.
    pub identifier: String,
    pub anilist_id: Option<i64>,
    pub dub: bool,
}

/// A hit from the HTML filter page, enriched with external-DB ids scraped
/// from the anime page.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FilterHit {
    pub title: String,
    pub jtitle: Option<String>,
    pub identifier: String,
    pub dub: bool,
    pub mal_id: Option<i64>,
    pub anilist_id: Option<i64>,
}

/// Parameters of a filtered search.
#[derive(Debug, Clone)]
pub struct FilterQuery {
    pub keyword: String,
    /// Site type filters, e.g. `["Anime", "ONA"]` or `["Movie"]`.
    pub types: Vec<String>,
    pub dub: bool,
    pub season_years: Vec<i32>,
    /// WINTER / SPRING / SUMMER / FALL, when known.
    pub season: Option<String>,
}

static JS_COOKIE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"document\.cookie\s*=\s*["']([^=]+)=([^;"']+)"#).unwrap());
static MAL_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:myanimelist\.net/anime/(\d+)|data-mal-id\s*=\s*["'](\d+)["'])"#).unwrap()
});
static ANILIST_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:anilist\.co/anime/(\d+)|data-anilist-id\s*=\s*["'](\d+)["'])"#).unwrap()
});

#[derive(Clone)]
struct SessionData {
    csrf_token: String,
}

pub struct AnimeWorldClient {
    http: Client,
    jar: Arc<Jar>,
    settings: Arc<Settings>,
    session: Mutex<Option<SessionData>>,
}

impl AnimeWorldClient {
    pub fn new(settings: Arc<Settings>) -> Self {
        let jar = Arc::new(Jar::default());
        let http = Client::builder()
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .cookie_provider(Arc::clone(&jar))
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            jar,
            settings,
            session: Mutex::new(None),
        }
    }

    fn base_url(&self) -> String {
        self.settings.animeworld_base_url()
    }

    /// Drop the session so the next call re-bootstraps (base URL changed).
    pub async fn reset_session(&self) {
        *self.session.lock().await = None;
    }

    async fn ensure_session(&self) -> Result<SessionData, SiteError> {
        {
            let session = self.session.lock().await;
            if let Some(data) = session.as_ref() {
                return Ok(data.clone());
            }
        }

        let base = self.base_url();
        let base_parsed: reqwest::Url = base
            .parse()
            .map_err(|_| SiteError::Session(format!("invalid base url: {}", base)))?;

        // The first response may only carry the challenge cookie; the second
        // fetch (now with the cookie) serves the real page with the CSRF tag.
        for attempt in 1..=2 {
            let text = self.http.get(&base).send().await?.text().await?;

            if let Some((name, value)) = extract_js_cookie(&text) {
                tracing::debug!("AnimeWorld set challenge cookie '{}'", name);
                self.jar
                    .add_cookie_str(&format!("{}={}", name, value), &base_parsed);
            }

            if let Some(csrf_token) = extract_csrf_token(&text) {
                let data = SessionData { csrf_token };
                *self.session.lock().await = Some(data.clone());
                tracing::info!("AnimeWorld session established (attempt {})", attempt);
                return Ok(data);
            }
        }

        Err(SiteError::Session(
            "no CSRF token after two attempts".to_string(),
        ))
    }

    // ============================================================================
    // Search
    // ============================================================================

    /// POST `/api/search/v2?keyword=…` with the CSRF header.
    pub async fn search_anime(&self, keyword: &str) -> Result<Vec<SearchHit>, SiteError> {
        let session = self.ensure_session().await?;
        let url = format!(
            "{}/api/search/v2?keyword={}",
            self.base_url(),
            urlencoding::encode(keyword)
        );

        let response = self
            .http
            .post(&url)
            .header("csrf-token", &session.csrf_token)
            .header("x-requested-with", "XMLHttpRequest")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SiteError::Parse(format!(
                "search returned HTTP {}",
                response.status()
            )));
        }

        let body: Value = response.json().await?;
        Ok(parse_search_response(&body))
    }

    /// GET `/filter?…` and enrich each hit with external-DB ids scraped from
    /// its anime page.
    pub async fn search_with_filter(
        &self,
        query: &FilterQuery,
    ) -> Result<Vec<FilterHit>, SiteError> {
        self.ensure_session().await?;

        let mut url = format!(
            "{}/filter?dub={}&sort=0&keyword={}",
            self.base_url(),
            if query.dub { 1 } else { 0 },
            urlencoding::encode(&query.keyword)
        );
        for t in &query.types {
            url.push_str(&format!("&type={}", urlencoding::encode(t)));
        }
        for year in &query.season_years {
            url.push_str(&format!("&year={}", year));
        }
        if let Some(season) = &query.season {
            url.push_str(&format!("&season={}", urlencoding::encode(season)));
        }

        let html = self.http.get(&url).send().await?.text().await?;
        let mut hits = parse_filter_results(&html, query.dub);

        for hit in &mut hits {
            match self.fetch_db_ids(&hit.identifier).await {
                Ok((mal_id, anilist_id)) => {
                    hit.mal_id = mal_id;
                    hit.anilist_id = anilist_id;
                }
                Err(e) => {
                    tracing::debug!(
                        "Failed to fetch DB ids for '{}': {}",
                        hit.identifier,
                        e
                    );
                }
            }
        }

        Ok(hits)
    }

    async fn fetch_db_ids(
        &self,
        identifier: &str,
    ) -> Result<(Option<i64>, Option<i64>), SiteError> {
        let url = format!("{}/play/{}", self.base_url(), identifier);
        let html = self.http.get(&url).send().await?.text().await?;
        Ok(extract_db_ids(&html))
    }

    // ============================================================================
    // Episodes
    // ============================================================================

    /// Episode number → episode page URL for one identifier.
    pub async fn episodes_from_identifier(
        &self,
        identifier: &str,
    ) -> Result<BTreeMap<i32, String>, SiteError> {
        self.ensure_session().await?;
        let base = self.base_url();
        let url = format!("{}/play/{}", base, identifier);
        let html = self.http.get(&url).send().await?.text().await?;
        Ok(parse_episode_list(&html, &base))
    }

    /// Concatenate the episode maps of all parts with sequential renumbering.
    pub async fn episodes_from_identifiers(
        &self,
        identifiers: &[String],
    ) -> Result<BTreeMap<i32, String>, SiteError> {
        let mut parts = Vec::with_capacity(identifiers.len());
        for identifier in identifiers {
            parts.push(self.episodes_from_identifier(identifier).await?);
        }
        Ok(renumber_parts(parts))
    }

    /// Direct download URL from an episode page, when the site offers one.
    pub async fn download_link_for_episode(
        &self,
        episode_url: &str,
    ) -> Result<Option<String>, SiteError> {
        self.ensure_session().await?;
        let html = self.http.get(episode_url).send().await?.text().await?;
        Ok(parse_download_link(&html))
    }

    /// Composite: resolve an episode number against one or more parts and
    /// pull the direct download URL.
    pub async fn find_episode_download_link(
        &self,
        identifiers: &[String],
        episode_number: i32,
    ) -> Result<Option<String>, SiteError> {
        let episodes = self.episodes_from_identifiers(identifiers).await?;
        match episodes.get(&episode_number) {
            Some(episode_url) => self.download_link_for_episode(episode_url).await,
            None => Ok(None),
        }
    }
}

// ============================================================================
// Pure parsers
// ============================================================================

fn extract_js_cookie(html: &str) -> Option<(String, String)> {
    JS_COOKIE_RE.captures(html).map(|caps| {
        (
            caps[1].trim().to_string(),
            caps[2].trim().to_string(),
        )
    })
}

fn extract_csrf_token(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let selector = Selector::parse("meta[name=\"csrf-token\"]").unwrap();
    doc.select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(String::from)
}

/// The search endpoint answers either a bare array or `{"animes": [...]}`.
fn parse_search_response(body: &Value) -> Vec<SearchHit> {
    let items = body
        .as_array()
        .or_else(|| body.get("animes").and_then(|v| v.as_array()));
    let Some(items) = items else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let link = item.get("link")?.as_str()?.to_string();
            let identifier = item
                .get("identifier")
                .and_then(|v| v.as_str())
                .map(String::from)
                .or_else(|| identifier_from_link(&link))?;
            Some(SearchHit {
                id: item.get("id").and_then(|v| v.as_i64()).unwrap_or(0),
                name: item
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                jtitle: item
                    .get("jtitle")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                link,
                identifier,
                anilist_id: item.get("anilistId").and_then(|v| v.as_i64()),
                dub: item.get("dub").and_then(|v| v.as_i64()).unwrap_or(0) == 1,
            })
        })
        .collect()
}

/// Trailing slug after `/play/`.
fn identifier_from_link(link: &str) -> Option<String> {
    link.split("/play/")
        .nth(1)
        .map(|s| s.trim_matches('/').to_string())
        .filter(|s| !s.is_empty())
}

fn parse_filter_results(html: &str, dub: bool) -> Vec<FilterHit> {
    let doc = Html::parse_document(html);
    let selector = Selector::parse(".film-list .item .name").unwrap();

    doc.select(&selector)
        .filter_map(|el| {
            let href = el.value().attr("href")?;
            let identifier = identifier_from_link(href)?;
            let title = el.text().collect::<String>().trim().to_string();
            if title.is_empty() {
                return None;
            }
            Some(FilterHit {
                title,
                jtitle: el.value().attr("data-jtitle").map(String::from),
                identifier,
                dub,
                mal_id: None,
                anilist_id: None,
            })
        })
        .collect()
}

fn parse_episode_list(html: &str, base: &str) -> BTreeMap<i32, String> {
    let doc = Html::parse_document(html);
    let selector = Selector::parse("ul.episodes li.episode [data-episode-num]").unwrap();

    let mut episodes = BTreeMap::new();
    for el in doc.select(&selector) {
        let Some(num) = el
            .value()
            .attr("data-episode-num")
            .and_then(|n| n.split('-').next())
            .and_then(|n| n.trim().parse::<i32>().ok())
        else {
            continue;
        };
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let url = if href.starts_with("http") {
            href.to_string()
        } else {
            format!("{}{}", base.trim_end_matches('/'), href)
        };
        episodes.insert(num, url);
    }
    episodes
}

fn parse_download_link(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let selector = Selector::parse("#download center a[download]").unwrap();
    doc.select(&selector)
        .next()
        .and_then(|el| el.value().attr("href"))
        .map(String::from)
}

fn extract_db_ids(html: &str) -> (Option<i64>, Option<i64>) {
    let mal_id = MAL_LINK_RE.captures(html).and_then(|caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .and_then(|m| m.as_str().parse().ok())
    });
    let anilist_id = ANILIST_LINK_RE.captures(html).and_then(|caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .and_then(|m| m.as_str().parse().ok())
    });
    (mal_id, anilist_id)
}

/// Merge per-part episode maps into one sequence: episode `n` of part `p`
/// becomes `Σ max(episodes of parts 1…p−1) + n`.
pub fn renumber_parts(parts: Vec<BTreeMap<i32, String>>) -> BTreeMap<i32, String> {
    let mut merged = BTreeMap::new();
    let mut offset = 0;
    for part in parts {
        let max = part.keys().max().copied().unwrap_or(0);
        for (num, url) in part {
            merged.insert(offset + num, url);
        }
        offset += max;
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_cookie_extraction() {
        let html = r#"<script>document.cookie = "SecurityAW-xY=abc123 ; path=/";</script>"#;
        let (name, value) = extract_js_cookie(html).unwrap();
        assert_eq!(name, "SecurityAW-xY");
        assert_eq!(value, "abc123");
    }

    #[test]
    fn csrf_extraction() {
        let html = r#"<html><head><meta name="csrf-token" content="tok-42"></head></html>"#;
        assert_eq!(extract_csrf_token(html).unwrap(), "tok-42");
        assert!(extract_csrf_token("<html></html>").is_none());
    }

    #[test]
    fn search_response_accepts_both_shapes() {
        let wrapped = serde_json::json!({"animes": [
            {"id": 5, "name": "One Piece", "jtitle": "ONE PIECE",
             "link": "/play/one-piece.12345", "dub": 0, "anilistId": 21}
        ]});
        let hits = parse_search_response(&wrapped);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].identifier, "one-piece.12345");
        assert_eq!(hits[0].anilist_id, Some(21));
        assert!(!hits[0].dub);

        let bare = serde_json::json!([
            {"id": 6, "name": "One Piece (ITA)", "jtitle": "",
             "link": "https://site/play/one-piece-ita.67890", "dub": 1}
        ]);
        let hits = parse_search_response(&bare);
        assert_eq!(hits[0].identifier, "one-piece-ita.67890");
        assert!(hits[0].dub);
    }

    #[test]
    fn filter_results_parse_names_and_identifiers() {
        let html = r#"
            <div class="film-list">
                <div class="item">
                    <a class="name" href="/play/sakamoto-days.ABC12" data-jtitle="SAKAMOTO DAYS">Sakamoto Days</a>
                </div>
                <div class="item">
                    <a class="name" href="/play/other.XY">Other Show</a>
                </div>
            </div>"#;
        let hits = parse_filter_results(html, false);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].identifier, "sakamoto-days.ABC12");
        assert_eq!(hits[0].jtitle.as_deref(), Some("SAKAMOTO DAYS"));
        assert_eq!(hits[1].title, "Other Show");
    }

    #[test]
    fn episode_list_parse() {
        let html = r#"
            <ul class="episodes">
                <li class="episode"><a data-episode-num="1" href="/play/x.1/ep-1">1</a></li>
                <li class="episode"><a data-episode-num="2" href="/play/x.1/ep-2">2</a></li>
                <li class="episode"><a data-episode-num="bad" href="/play/x.1/ep-x">?</a></li>
            </ul>"#;
        let episodes = parse_episode_list(html, "https://site/");
        assert_eq!(episodes.len(), 2);
        assert_eq!(episodes[&1], "https://site/play/x.1/ep-1");
        assert_eq!(episodes[&2], "https://site/play/x.1/ep-2");
    }

    #[test]
    fn download_link_parse() {
        let html = r#"
            <div id="download">
                <center>
                    <a download href="https://cdn.example/ep01.mp4">Download</a>
                </center>
            </div>"#;
        assert_eq!(
            parse_download_link(html).unwrap(),
            "https://cdn.example/ep01.mp4"
        );
        assert!(parse_download_link("<div id=\"download\"></div>").is_none());
    }

    #[test]
    fn db_id_extraction_from_links_and_attributes() {
        let html = r#"<a href="https://myanimelist.net/anime/58172/">MAL</a>
                      <div data-anilist-id="170942"></div>"#;
        let (mal, anilist) = extract_db_ids(html);
        assert_eq!(mal, Some(58172));
        assert_eq!(anilist, Some(170942));
    }

    #[test]
    fn renumber_offsets_by_max_episode_of_prior_parts() {
        let part1: BTreeMap<i32, String> =
            (1..=13).map(|n| (n, format!("p1/{}", n))).collect();
        let part2: BTreeMap<i32, String> =
            (1..=12).map(|n| (n, format!("p2/{}", n))).collect();
        let merged = renumber_parts(vec![part1, part2]);

        assert_eq!(merged.len(), 25);
        assert_eq!(merged[&13], "p1/13");
        // Episode 15 overall is episode 2 of part 2.
        assert_eq!(merged[&15], "p2/2");
        assert_eq!(merged[&25], "p2/12");
    }

    #[test]
    fn renumber_is_injective() {
        let counts = [3usize, 5, 4];
        let parts: Vec<BTreeMap<i32, String>> = counts
            .iter()
            .enumerate()
            .map(|(p, count)| {
                (1..=*count as i32)
                    .map(|n| (n, format!("p{}/{}", p, n)))
                    .collect()
            })
            .collect();
        let merged = renumber_parts(parts);
        assert_eq!(merged.len(), counts.iter().sum::<usize>());
        let keys: Vec<i32> = merged.keys().copied().collect();
        assert_eq!(keys, (1..=12).collect::<Vec<_>>());
    }
}
