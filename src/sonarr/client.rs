//! Sonarr API Client (C3)
//!
//! HTTP client for the library manager's v3 API. Carries the shared health
//! state written by the background prober; every call is gated on it so a
//! dead backend fails fast instead of timing out per request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use super::types::{
    NotificationConfig, RootFolderResource, SonarrEpisode, SonarrSeries, SystemStatus, Tag,
    WantedPage,
};
use crate::error::{AwarrError, AwarrResult};
use crate::settings::Settings;

const CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Air-date window of one season, derived from its episode list.
#[derive(Debug, Clone)]
pub struct SeasonAirDateInfo {
    /// At least one episode airs no later than two weeks from now.
    pub has_valid_air_date: bool,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

pub struct SonarrClient {
    http: Client,
    settings: Arc<Settings>,
    healthy: AtomicBool,
    last_check: RwLock<Option<DateTime<Utc>>>,
    episode_cache: Cache<i64, Arc<Vec<SonarrEpisode>>>,
    airdate_cache: Cache<(i64, i32), SeasonAirDateInfo>,
}

impl SonarrClient {
    pub fn new(settings: Arc<Settings>) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            settings,
            healthy: AtomicBool::new(false),
            last_check: RwLock::new(None),
            episode_cache: Cache::builder()
                .max_capacity(500)
                .time_to_live(CACHE_TTL)
                .build(),
            airdate_cache: Cache::builder()
                .max_capacity(2000)
                .time_to_live(CACHE_TTL)
                .build(),
        }
    }

    // ============================================================================
    // Health
    // ============================================================================

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub fn last_check(&self) -> Option<DateTime<Utc>> {
        *self.last_check.read().unwrap()
    }

    /// Drop the cached health verdict (after a URL/token change) so calls
    /// fail fast until the next probe succeeds.
    pub fn invalidate_health(&self) {
        self.healthy.store(false, Ordering::SeqCst);
        *self.last_check.write().unwrap() = None;
        self.episode_cache.invalidate_all();
        self.airdate_cache.invalidate_all();
    }

    /// Hit `system/status` and record the outcome. Returns the new verdict.
    pub async fn probe(&self) -> bool {
        let healthy = match self.credentials() {
            Ok((base, token)) => {
                let url = format!("{}/api/v3/system/status", base);
                match self.http.get(&url).header("X-Api-Key", &token).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        match resp.json::<SystemStatus>().await {
                            Ok(status) => {
                                tracing::debug!(
                                    "Sonarr probe ok: {} v{}",
                                    status.app_name.as_deref().unwrap_or("Sonarr"),
                                    status.version.as_deref().unwrap_or("?")
                                );
                                true
                            }
                            Err(e) => {
                                tracing::warn!("Sonarr probe returned invalid body: {}", e);
                                false
                            }
                        }
                    }
                    Ok(resp) => {
                        tracing::warn!("Sonarr probe failed: HTTP {}", resp.status());
                        false
                    }
                    Err(e) => {
                        tracing::warn!("Sonarr probe failed: {}", e);
                        false
                    }
                }
            }
            Err(_) => false,
        };

        self.healthy.store(healthy, Ordering::SeqCst);
        *self.last_check.write().unwrap() = Some(Utc::now());
        healthy
    }

    fn credentials(&self) -> AwarrResult<(String, String)> {
        let url = self
            .settings
            .sonarr_url()
            .ok_or(AwarrError::ConfigMissing("sonarr_url"))?;
        let token = self
            .settings
            .sonarr_token()
            .ok_or(AwarrError::ConfigMissing("sonarr_token"))?;
        Ok((url, token))
    }

    fn ensure_healthy(&self) -> AwarrResult<()> {
        if self.is_healthy() {
            Ok(())
        } else {
            Err(AwarrError::BackendUnavailable)
        }
    }

    // ============================================================================
    // Transport
    // ============================================================================

    async fn get_json<T: DeserializeOwned>(&self, path_and_query: &str) -> AwarrResult<T> {
        self.ensure_healthy()?;
        let (base, token) = self.credentials()?;
        let url = format!("{}/api/v3/{}", base, path_and_query);

        let mut network_retried = false;
        let mut rate_retried = false;
        loop {
            let result = self.http.get(&url).header("X-Api-Key", &token).send().await;
            let response = match result {
                Ok(resp) => resp,
                Err(e) => {
                    if !network_retried {
                        network_retried = true;
                        tracing::debug!("Sonarr request failed, retrying once: {}", e);
                        continue;
                    }
                    self.healthy.store(false, Ordering::SeqCst);
                    return Err(AwarrError::BackendUnavailable);
                }
            };

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = parse_retry_after(&response);
                if !rate_retried {
                    rate_retried = true;
                    let wait = retry_after.unwrap_or(1);
                    tracing::warn!("Sonarr rate limited, waiting {}s", wait);
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                    continue;
                }
                return Err(AwarrError::RateLimited {
                    service: "Sonarr".to_string(),
                    retry_after,
                });
            }
            if status == StatusCode::NOT_FOUND {
                return Err(AwarrError::NotFound(url));
            }
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(AwarrError::SonarrError {
                    status: status.as_u16(),
                    message,
                });
            }

            return response.json::<T>().await.map_err(|e| AwarrError::SonarrError {
                status: status.as_u16(),
                message: format!("invalid body: {}", e),
            });
        }
    }

    async fn post_command(&self, body: serde_json::Value) -> AwarrResult<()> {
        self.ensure_healthy()?;
        let (base, token) = self.credentials()?;
        let url = format!("{}/api/v3/command", base);

        let response = self
            .http
            .post(&url)
            .header("X-Api-Key", &token)
            .json(&body)
            .send()
            .await
            .map_err(|_| {
                self.healthy.store(false, Ordering::SeqCst);
                AwarrError::BackendUnavailable
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AwarrError::SonarrError {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    // ============================================================================
    // Endpoints
    // ============================================================================

    pub async fn get_all_series(&self) -> AwarrResult<Vec<SonarrSeries>> {
        self.get_json("series").await
    }

    pub async fn get_series(&self, id: i64) -> AwarrResult<SonarrSeries> {
        self.get_json(&format!("series/{}", id)).await
    }

    /// Episodes of a series, cached for five minutes. Concurrent callers for
    /// the same series share one in-flight fetch.
    pub async fn get_series_episodes(&self, series_id: i64) -> AwarrResult<Arc<Vec<SonarrEpisode>>> {
        self.episode_cache
            .try_get_with(series_id, async {
                let episodes: Vec<SonarrEpisode> =
                    self.get_json(&format!("episode?seriesId={}", series_id)).await?;
                Ok::<_, AwarrError>(Arc::new(episodes))
            })
            .await
            .map_err(unwrap_shared_error)
    }

    /// Drop the cached episode list of one series (after an import changed it).
    pub async fn invalidate_episodes(&self, series_id: i64) {
        self.episode_cache.invalidate(&series_id).await;
    }

    /// Air-date window of one season, cached for five minutes.
    ///
    /// An episode counts toward `has_valid_air_date` when its air date is at
    /// most two weeks in the future.
    pub async fn get_season_air_dates(
        &self,
        series_id: i64,
        season_number: i32,
    ) -> AwarrResult<SeasonAirDateInfo> {
        self.airdate_cache
            .try_get_with((series_id, season_number), async {
                let episodes = self.get_series_episodes(series_id).await?;
                Ok::<_, AwarrError>(season_air_dates(&episodes, season_number, Utc::now()))
            })
            .await
            .map_err(unwrap_shared_error)
    }

    pub async fn get_wanted_missing(&self, page_size: i32, page: i32) -> AwarrResult<WantedPage> {
        self.get_json(&format!(
            "wanted/missing?pageSize={}&sortKey=airDateUtc&sortDirection=ascending&page={}&includeSeries=true&monitored=true",
            page_size, page
        ))
        .await
    }

    pub async fn get_root_folders(&self) -> AwarrResult<Vec<RootFolderResource>> {
        self.get_json("rootfolder").await
    }

    pub async fn get_tags(&self) -> AwarrResult<Vec<Tag>> {
        self.get_json("tag").await
    }

    pub async fn get_notifications(&self) -> AwarrResult<Vec<NotificationConfig>> {
        self.get_json("notification").await
    }

    /// Ask Sonarr to rescan a series folder for new files.
    pub async fn rescan_series(&self, series_id: i64) -> AwarrResult<()> {
        self.post_command(serde_json::json!({
            "name": "RescanSeries",
            "seriesId": series_id,
        }))
        .await
    }

    /// Ask Sonarr to rename an imported episode file.
    pub async fn rename_episode_file(&self, series_id: i64, file_id: i64) -> AwarrResult<()> {
        self.post_command(serde_json::json!({
            "name": "RenameFiles",
            "seriesId": series_id,
            "files": [file_id],
        }))
        .await
    }
}

/// Compute the air-date window of a season from its episode list.
fn season_air_dates(
    episodes: &[SonarrEpisode],
    season_number: i32,
    now: DateTime<Utc>,
) -> SeasonAirDateInfo {
    let horizon = now + chrono::Duration::weeks(2);
    let mut dates: Vec<DateTime<Utc>> = episodes
        .iter()
        .filter(|e| e.season_number == season_number)
        .filter_map(|e| e.air_date_utc.as_deref())
        .filter_map(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .collect();
    dates.sort();

    SeasonAirDateInfo {
        has_valid_air_date: dates.iter().any(|d| *d <= horizon),
        start_date: dates.first().copied(),
        end_date: dates.last().copied(),
    }
}

fn parse_retry_after(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn unwrap_shared_error(e: Arc<AwarrError>) -> AwarrError {
    match &*e {
        AwarrError::BackendUnavailable => AwarrError::BackendUnavailable,
        AwarrError::ConfigMissing(key) => AwarrError::ConfigMissing(*key),
        other => AwarrError::Internal(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn episode(season: i32, number: i32, air: Option<&str>) -> SonarrEpisode {
        SonarrEpisode {
            id: (season * 100 + number) as i64,
            series_id: 1,
            title: None,
            season_number: season,
            episode_number: number,
            absolute_episode_number: None,
            has_file: false,
            monitored: true,
            air_date_utc: air.map(String::from),
            episode_file_id: None,
        }
    }

    #[test]
    fn air_date_window_spans_first_to_last() {
        let now = "2025-02-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let episodes = vec![
            episode(1, 2, Some("2025-01-18T15:00:00Z")),
            episode(1, 1, Some("2025-01-11T15:00:00Z")),
            episode(1, 3, Some("2025-04-05T15:00:00Z")),
            episode(2, 1, Some("2026-01-01T15:00:00Z")),
        ];
        let info = season_air_dates(&episodes, 1, now);
        assert!(info.has_valid_air_date);
        assert_eq!(
            info.start_date.unwrap().to_rfc3339(),
            "2025-01-11T15:00:00+00:00"
        );
        assert_eq!(
            info.end_date.unwrap().to_rfc3339(),
            "2025-04-05T15:00:00+00:00"
        );
    }

    #[test]
    fn far_future_season_is_not_valid() {
        let now = "2025-02-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let episodes = vec![episode(1, 1, Some("2025-06-01T15:00:00Z"))];
        let info = season_air_dates(&episodes, 1, now);
        assert!(!info.has_valid_air_date);
        assert!(info.start_date.is_some());
    }

    #[test]
    fn episode_within_two_weeks_is_valid() {
        let now = "2025-02-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let episodes = vec![episode(1, 1, Some("2025-02-10T15:00:00Z"))];
        assert!(season_air_dates(&episodes, 1, now).has_valid_air_date);
    }

    #[test]
    fn season_without_air_dates() {
        let now = Utc::now();
        let episodes = vec![episode(1, 1, None)];
        let info = season_air_dates(&episodes, 1, now);
        assert!(!info.has_valid_air_date);
        assert!(info.start_date.is_none());
        assert!(info.end_date.is_none());
    }
}
