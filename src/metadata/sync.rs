//! Metadata synchroniser (C6)
//!
//! Reconciles Sonarr's series/season view into the local store and resolves
//! each season to its source-site identifier list. Matching goes through the
//! filtered search plus external-DB air-date validation; a simple
//! title-search fallback exists for releases the filter page cannot find.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, Months, Utc};
use reqwest::Client;

use super::anilist::AnilistClient;
use super::jikan::JikanClient;
use super::media::AnimeMedia;
use crate::animeworld::titles::{find_best_match_with_parts, normalize_title, sanitize_keyword};
use crate::animeworld::{AnimeWorldClient, FilterHit, FilterQuery};
use crate::db::models::{
    AlternateTitle, LanguagePreference, SeasonStatus, Series, SeriesStatus,
};
use crate::db::store::{SeasonUpsert, SeriesUpsert};
use crate::db::Store;
use crate::error::{AwarrError, AwarrResult};
use crate::settings::Settings;
use crate::sonarr::types::{SeasonResource, SonarrSeries};
use crate::sonarr::SonarrClient;

const POSTER_MAX_AGE_HOURS: i64 = 48;

/// Outcome counters of one full sync, surfaced in task status.
#[derive(Debug, Default, Clone)]
pub struct SyncSummary {
    pub series_synced: usize,
    pub series_deleted: usize,
    pub seasons_matched: usize,
    pub seasons_unmatched: usize,
    pub errors: usize,
}

pub struct MetadataSync {
    store: Arc<Store>,
    settings: Arc<Settings>,
    sonarr: Arc<SonarrClient>,
    site: Arc<AnimeWorldClient>,
    anilist: Arc<AnilistClient>,
    jikan: Arc<JikanClient>,
    http: Client,
    posters_dir: PathBuf,
}

impl MetadataSync {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        settings: Arc<Settings>,
        sonarr: Arc<SonarrClient>,
        site: Arc<AnimeWorldClient>,
        anilist: Arc<AnilistClient>,
        jikan: Arc<JikanClient>,
        posters_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            settings,
            sonarr,
            site,
            anilist,
            jikan,
            http: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            posters_dir,
        }
    }

    // ============================================================================
    // Full sync
    // ============================================================================

    /// Reconcile every monitored Sonarr series into the store, soft-delete
    /// the ones Sonarr no longer reports, refresh root folders, and run the
    /// matcher for seasons without identifiers.
    pub async fn full_sync(&self) -> AwarrResult<SyncSummary> {
        let mut summary = SyncSummary::default();

        self.sync_root_folders().await?;

        let all_series = self.sonarr.get_all_series().await?;
        let mut seen: Vec<i64> = Vec::new();

        for remote in &all_series {
            if !self.should_track(remote) {
                continue;
            }
            seen.push(remote.id);

            match self.sync_series(remote, false).await {
                Ok((matched, unmatched)) => {
                    summary.series_synced += 1;
                    summary.seasons_matched += matched;
                    summary.seasons_unmatched += unmatched;
                }
                Err(e) => {
                    summary.errors += 1;
                    tracing::warn!("Sync failed for '{}': {}", remote.title, e);
                }
            }
        }

        summary.series_deleted = self.store.mark_series_deleted_except(&seen)?;
        if summary.series_deleted > 0 {
            tracing::info!(
                "Soft-deleted {} series no longer reported by Sonarr",
                summary.series_deleted
            );
        }

        tracing::info!(
            "Metadata sync complete: {} series, {} seasons matched, {} unmatched, {} errors",
            summary.series_synced,
            summary.seasons_matched,
            summary.seasons_unmatched,
            summary.errors
        );
        Ok(summary)
    }

    /// One-shot sync of a single series by Sonarr id (used when a wanted
    /// episode references a series the store has not seen yet).
    pub async fn sync_one(&self, sonarr_id: i64, force_refresh: bool) -> AwarrResult<()> {
        let remote = self.sonarr.get_series(sonarr_id).await?;
        if !self.should_track(&remote) {
            return Err(AwarrError::NotFound(format!(
                "series {} is not tracked by current filters",
                sonarr_id
            )));
        }
        self.sync_series(&remote, force_refresh).await?;
        Ok(())
    }

    fn should_track(&self, remote: &SonarrSeries) -> bool {
        if remote.monitored != Some(true) {
            return false;
        }
        if self.settings.anime_only() && !remote.is_anime() {
            return false;
        }
        self.settings.tags_allow(&remote.tags)
    }

    async fn sync_root_folders(&self) -> AwarrResult<()> {
        let folders = self.sonarr.get_root_folders().await?;
        for folder in folders {
            self.store.upsert_root_folder(
                folder.id,
                &folder.path,
                folder.accessible,
                folder.free_space,
                folder.total_space,
            )?;
        }
        Ok(())
    }

    // ============================================================================
    // Per-series sync
    // ============================================================================

    /// Upsert one series and its seasons, refresh the poster, and run the
    /// matcher for every season whose identifier list is empty (or all of
    /// them when `force_refresh`). Returns (matched, unmatched) counts.
    async fn sync_series(
        &self,
        remote: &SonarrSeries,
        force_refresh: bool,
    ) -> AwarrResult<(usize, usize)> {
        let series_id = self.store.upsert_series(&SeriesUpsert {
            sonarr_id: remote.id,
            title: remote.title.clone(),
            description: remote.overview.clone(),
            status: SeriesStatus::parse(remote.status.as_deref().unwrap_or("")),
            total_seasons: remote
                .seasons
                .iter()
                .filter(|s| s.season_number > 0)
                .count() as i32,
            poster_url: remote.poster_url(),
            alternate_titles: remote.alternate_titles.clone(),
            genres: remote.genres.clone(),
            year: remote.year,
            network: remote.network.clone(),
            absolute: false,
        })?;

        let series = self
            .store
            .get_series(series_id)?
            .ok_or_else(|| AwarrError::Internal("series vanished after upsert".into()))?;

        self.refresh_poster(&series).await;

        let season_numbers = if series.absolute {
            self.sync_absolute_season(&series, remote).await?
        } else {
            self.sync_seasons(&series, remote).await?
        };
        self.store
            .mark_seasons_deleted_except(series.id, &season_numbers)?;

        // Resolve identifiers for seasons that still need them.
        let mut matched = 0;
        let mut unmatched = 0;
        for season in self.store.list_seasons(series.id)? {
            if !force_refresh && !season.identifiers().is_empty() {
                continue;
            }
            match self.match_season(&series, season.season_number).await {
                Ok(identifiers) => {
                    self.store.set_season_download_urls(season.id, &identifiers)?;
                    tracing::info!(
                        "Matched '{}' S{:02} -> {:?}",
                        series.title,
                        season.season_number,
                        identifiers
                    );
                    matched += 1;
                }
                Err(e @ AwarrError::MatchNotFound { .. }) => {
                    // The identifier list stays empty; the next sync retries.
                    tracing::warn!("{}", e);
                    unmatched += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "Matcher failed for '{}' S{:02}: {}",
                        series.title,
                        season.season_number,
                        e
                    );
                    unmatched += 1;
                }
            }
        }

        Ok((matched, unmatched))
    }

    /// Upsert every monitored, airing (≤ now+2 weeks) season. Returns the
    /// season numbers that exist remotely.
    async fn sync_seasons(
        &self,
        series: &Series,
        remote: &SonarrSeries,
    ) -> AwarrResult<Vec<i32>> {
        let mut numbers = Vec::new();
        for season in &remote.seasons {
            if season.season_number == 0 || !season.monitored {
                continue;
            }
            let air = self
                .sonarr
                .get_season_air_dates(remote.id, season.season_number)
                .await?;
            if !air.has_valid_air_date {
                continue;
            }

            let (total, missing, status) = season_counts(season);
            numbers.push(season.season_number);
            self.store.upsert_season(&SeasonUpsert {
                series_id: series.id,
                season_number: season.season_number,
                title: None,
                total_episodes: total,
                missing_episodes: missing,
                status,
                release_date: air.start_date,
            })?;
        }
        Ok(numbers)
    }

    /// Absolute-numbered series collapse into a single season 1 whose totals
    /// are the series-level aired counts.
    async fn sync_absolute_season(
        &self,
        series: &Series,
        remote: &SonarrSeries,
    ) -> AwarrResult<Vec<i32>> {
        let mut total = 0;
        let mut missing = 0;
        let mut release_date: Option<DateTime<Utc>> = None;
        for season in &remote.seasons {
            if season.season_number == 0 {
                continue;
            }
            let (season_total, season_missing, _) = season_counts(season);
            total += season_total;
            missing += season_missing;
            let air = self
                .sonarr
                .get_season_air_dates(remote.id, season.season_number)
                .await?;
            if let Some(start) = air.start_date {
                release_date = Some(release_date.map_or(start, |d: DateTime<Utc>| d.min(start)));
            }
        }

        let status = if total > 0 && missing == 0 {
            SeasonStatus::Completed
        } else if missing < total {
            SeasonStatus::Downloading
        } else {
            SeasonStatus::NotStarted
        };

        self.store.upsert_season(&SeasonUpsert {
            series_id: series.id,
            season_number: 1,
            title: None,
            total_episodes: total,
            missing_episodes: missing,
            status,
            release_date,
        })?;
        Ok(vec![1])
    }

    async fn refresh_poster(&self, series: &Series) {
        let Some(url) = series.poster_url.as_deref() else {
            return;
        };
        let fresh = series
            .poster_downloaded_at
            .map(|at| Utc::now() - at < chrono::Duration::hours(POSTER_MAX_AGE_HOURS))
            .unwrap_or(false);
        if fresh {
            return;
        }

        match self.download_poster(series.id, url).await {
            Ok(path) => {
                if let Err(e) = self.store.set_series_poster(series.id, &path, Utc::now()) {
                    tracing::warn!("Failed to record poster for '{}': {}", series.title, e);
                }
            }
            Err(e) => tracing::debug!("Poster download failed for '{}': {}", series.title, e),
        }
    }

    async fn download_poster(&self, series_id: i64, url: &str) -> anyhow::Result<String> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        let ext = url
            .rsplit('.')
            .next()
            .filter(|e| e.len() <= 4 && e.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or("jpg");
        let path = self.posters_dir.join(format!("{}.{}", series_id, ext));
        let bytes = response.bytes().await?;
        tokio::fs::create_dir_all(&self.posters_dir).await?;
        tokio::fs::write(&path, &bytes).await?;
        Ok(path.to_string_lossy().to_string())
    }

    // ============================================================================
    // Season matcher
    // ============================================================================

    /// Resolve one season to its ordered identifier list. `MatchNotFound`
    /// when neither the filtered path nor the fallback produced anything.
    pub async fn match_season(&self, series: &Series, season_number: i32) -> AwarrResult<Vec<String>> {
        let not_found = || AwarrError::MatchNotFound {
            series: series.title.clone(),
            season: season_number,
        };

        let air = self
            .sonarr
            .get_season_air_dates(series.sonarr_id, season_number)
            .await?;
        let (Some(window_start), Some(window_end)) = (air.start_date, air.end_date) else {
            tracing::debug!(
                "'{}' S{:02} has no air-date window, skipping matcher",
                series.title,
                season_number
            );
            return Err(not_found());
        };

        let language = series
            .preferred_language
            .unwrap_or_else(|| self.settings.preferred_language());
        let (candidates, is_movie) = self.candidate_titles(series, season_number).await;

        let mut survivors: Vec<(FilterHit, AnimeMedia)> = Vec::new();
        for dub in languages_for(language) {
            let hits = self
                .filtered_hits(&candidates, is_movie, dub, window_start, window_end)
                .await;
            for hit in hits {
                match self.validate_hit(&hit, window_start, window_end).await {
                    Some(media) => survivors.push((hit, media)),
                    None => tracing::debug!(
                        "Rejected '{}' ({}) outside air window",
                        hit.title,
                        hit.identifier
                    ),
                }
            }
        }

        let matches = apply_language_policy(survivors, language);
        if matches.is_empty() {
            let fallback = self.fallback_match(series, season_number, language).await?;
            return if fallback.is_empty() {
                Err(not_found())
            } else {
                Ok(fallback)
            };
        }

        Ok(identifiers_in_air_order(matches))
    }

    /// Series title, season-appropriate alternates, and AniList title
    /// variants, sanitised and deduplicated with order preserved. The second
    /// return says whether the best AniList candidate is a movie, which
    /// switches the site filter to the Movie type.
    async fn candidate_titles(&self, series: &Series, season_number: i32) -> (Vec<String>, bool) {
        let mut candidates = vec![series.title.clone()];
        for alt in alternates_for_season(&series.alternate_titles, season_number) {
            candidates.push(alt);
        }
        let mut is_movie = false;
        match self.anilist.search(&series.title).await {
            Ok(media) => {
                if let Some(first) = media.first() {
                    is_movie = first.format.as_deref() == Some("MOVIE");
                }
                for m in media.into_iter().take(3) {
                    candidates.extend(m.titles);
                }
            }
            Err(e) => tracing::debug!("AniList title lookup failed for '{}': {}", series.title, e),
        }

        let mut seen = Vec::new();
        for candidate in candidates {
            let sanitized = sanitize_keyword(&candidate);
            if sanitized.is_empty() {
                continue;
            }
            if !seen
                .iter()
                .any(|s: &String| normalize_title(s) == normalize_title(&sanitized))
            {
                seen.push(sanitized);
            }
        }
        (seen, is_movie)
    }

    /// First non-empty filtered result list across the candidate titles.
    async fn filtered_hits(
        &self,
        candidates: &[String],
        is_movie: bool,
        dub: bool,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Vec<FilterHit> {
        use chrono::Datelike;
        let years: Vec<i32> = (window_start.year()..=window_end.year()).collect();
        let types = if is_movie {
            vec!["Movie".to_string()]
        } else {
            vec!["Anime".to_string(), "ONA".to_string()]
        };

        for keyword in candidates {
            let query = FilterQuery {
                keyword: keyword.clone(),
                types: types.clone(),
                dub,
                season_years: years.clone(),
                season: None,
            };
            match self.site.search_with_filter(&query).await {
                Ok(hits) if !hits.is_empty() => return hits,
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!("Filter search failed for '{}': {}", keyword, e);
                    continue;
                }
            }
        }
        Vec::new()
    }

    /// External-DB date validation. Returns the media record when the hit's
    /// dates fall inside the broadened air window.
    async fn validate_hit(
        &self,
        hit: &FilterHit,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Option<AnimeMedia> {
        let media = if let Some(anilist_id) = hit.anilist_id {
            self.anilist.get_by_id(anilist_id).await.ok().flatten()
        } else if let Some(mal_id) = hit.mal_id {
            self.jikan.get_by_id(mal_id).await.ok().flatten()
        } else {
            None
        }?;

        if media_in_window(&media, window_start, window_end) {
            Some(media)
        } else {
            None
        }
    }

    /// Last-resort matcher: plain title search plus part expansion, no date
    /// validation.
    async fn fallback_match(
        &self,
        series: &Series,
        season_number: i32,
        language: LanguagePreference,
    ) -> AwarrResult<Vec<String>> {
        let mut keywords = Vec::new();
        if season_number <= 1 {
            keywords.push(series.title.clone());
        } else {
            // Season-specific alternates already carry the right name.
            for alt in &series.alternate_titles {
                if alt.scene_season_number == Some(season_number) {
                    keywords.push(alt.title.clone());
                }
            }
            keywords.push(format!("{} {}", series.title, season_number));
        }

        for keyword in keywords {
            let results = match self.site.search_anime(&keyword).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::debug!("Fallback search failed for '{}': {}", keyword, e);
                    continue;
                }
            };
            let matched = find_best_match_with_parts(&results, &keyword);
            let filtered = filter_hits_by_language(matched, language);
            if !filtered.is_empty() {
                tracing::info!(
                    "Fallback matcher resolved '{}' S{:02} via '{}'",
                    series.title,
                    season_number,
                    keyword
                );
                return Ok(filtered.into_iter().map(|h| h.identifier).collect());
            }
        }
        Ok(Vec::new())
    }
}

// ============================================================================
// Pure helpers
// ============================================================================

fn season_counts(season: &SeasonResource) -> (i32, i32, SeasonStatus) {
    let stats = season.statistics.as_ref();
    let aired = stats.and_then(|s| s.episode_count).unwrap_or(0);
    let downloaded = stats.and_then(|s| s.episode_file_count).unwrap_or(0);
    let total = stats
        .and_then(|s| s.total_episode_count)
        .unwrap_or(aired)
        .max(aired);
    let missing = (aired - downloaded).max(0);

    let status = if aired > 0 && missing == 0 {
        SeasonStatus::Completed
    } else if downloaded > 0 {
        SeasonStatus::Downloading
    } else {
        SeasonStatus::NotStarted
    };
    (total, missing, status)
}

/// Alternates usable for a season: global ones (negative scene number) and
/// the ones pinned to exactly this season.
fn alternates_for_season(alternates: &[AlternateTitle], season_number: i32) -> Vec<String> {
    alternates
        .iter()
        .filter(|alt| match alt.scene_season_number {
            Some(n) if n >= 0 => n == season_number,
            _ => true,
        })
        .map(|alt| alt.title.clone())
        .collect()
}

fn languages_for(preference: LanguagePreference) -> Vec<bool> {
    match preference {
        LanguagePreference::Dub => vec![true],
        LanguagePreference::Sub => vec![false],
        LanguagePreference::DubFallbackSub => vec![true, false],
    }
}

/// The broadened window check: start must fall inside
/// `[windowStart − 1 month − 10 days, windowEnd + 1 month + 10 days]`, and a
/// known end date must not exceed the upper bound. A missing end date is
/// acceptable only while the show is still airing.
fn media_in_window(
    media: &AnimeMedia,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> bool {
    let Some(start) = media.start_date else {
        return false;
    };
    if media.end_date.is_none() && !media.airing {
        return false;
    }

    let lower = window_start - Months::new(1) - Days::new(10);
    let upper = window_end + Months::new(1) + Days::new(10);

    if start < lower || start > upper {
        return false;
    }
    if let Some(end) = media.end_date {
        if end > upper {
            return false;
        }
    }
    true
}

/// Keep survivors according to the language preference. For
/// `dub_fallback_sub`, a dubbed variant shadows the subbed variant of the
/// same (normalised) title.
fn apply_language_policy(
    survivors: Vec<(FilterHit, AnimeMedia)>,
    preference: LanguagePreference,
) -> Vec<(FilterHit, AnimeMedia)> {
    match preference {
        LanguagePreference::Dub => survivors.into_iter().filter(|(h, _)| h.dub).collect(),
        LanguagePreference::Sub => survivors.into_iter().filter(|(h, _)| !h.dub).collect(),
        LanguagePreference::DubFallbackSub => {
            let mut dubbed_titles: HashMap<String, ()> = HashMap::new();
            for (hit, _) in survivors.iter().filter(|(h, _)| h.dub) {
                dubbed_titles.insert(normalize_title(&hit.title), ());
            }
            survivors
                .into_iter()
                .filter(|(hit, _)| {
                    hit.dub || !dubbed_titles.contains_key(&normalize_title(&hit.title))
                })
                .collect()
        }
    }
}

/// Order surviving matches by their external-DB start date so multi-part
/// seasons come out in air order, then deduplicate identifiers.
fn identifiers_in_air_order(mut matches: Vec<(FilterHit, AnimeMedia)>) -> Vec<String> {
    matches.sort_by_key(|(_, media)| media.start_date);
    let mut identifiers = Vec::new();
    for (hit, _) in matches {
        if !identifiers.contains(&hit.identifier) {
            identifiers.push(hit.identifier);
        }
    }
    identifiers
}

/// Language policy over plain search hits (fallback path).
fn filter_hits_by_language(
    hits: Vec<crate::animeworld::SearchHit>,
    preference: LanguagePreference,
) -> Vec<crate::animeworld::SearchHit> {
    match preference {
        LanguagePreference::Dub => hits.into_iter().filter(|h| h.dub).collect(),
        LanguagePreference::Sub => hits.into_iter().filter(|h| !h.dub).collect(),
        LanguagePreference::DubFallbackSub => {
            let dubbed: Vec<String> = hits
                .iter()
                .filter(|h| h.dub)
                .map(|h| normalize_title(&h.name))
                .collect();
            hits.into_iter()
                .filter(|h| h.dub || !dubbed.contains(&normalize_title(&h.name)))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(start: &str, end: Option<&str>, airing: bool) -> AnimeMedia {
        AnimeMedia {
            anilist_id: Some(1),
            mal_id: None,
            titles: vec!["X".to_string()],
            start_date: Some(start.parse().unwrap()),
            end_date: end.map(|e| e.parse().unwrap()),
            episodes: Some(12),
            season_year: Some(2025),
            season: Some("WINTER".to_string()),
            format: Some("TV".to_string()),
            airing,
        }
    }

    fn hit(identifier: &str, title: &str, dub: bool) -> FilterHit {
        FilterHit {
            title: title.to_string(),
            jtitle: None,
            identifier: identifier.to_string(),
            dub,
            mal_id: None,
            anilist_id: Some(1),
        }
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            "2025-01-11T00:00:00Z".parse().unwrap(),
            "2025-04-05T00:00:00Z".parse().unwrap(),
        )
    }

    #[test]
    fn window_accepts_dates_inside_margin() {
        let (start, end) = window();
        assert!(media_in_window(
            &media("2025-01-11T00:00:00Z", Some("2025-04-05T00:00:00Z"), false),
            start,
            end
        ));
        // A month earlier is still inside the 1 month + 10 day margin.
        assert!(media_in_window(
            &media("2024-12-15T00:00:00Z", Some("2025-03-01T00:00:00Z"), false),
            start,
            end
        ));
    }

    #[test]
    fn window_rejects_out_of_margin_dates() {
        let (start, end) = window();
        // Older than windowStart − 1 month − 10 days.
        assert!(!media_in_window(
            &media("2024-10-01T00:00:00Z", Some("2024-12-20T00:00:00Z"), false),
            start,
            end
        ));
        // Ends long after the window.
        assert!(!media_in_window(
            &media("2025-01-11T00:00:00Z", Some("2025-09-01T00:00:00Z"), false),
            start,
            end
        ));
        // Starts after the upper bound (a later season).
        assert!(!media_in_window(
            &media("2025-07-01T00:00:00Z", Some("2025-09-20T00:00:00Z"), false),
            start,
            end
        ));
    }

    #[test]
    fn window_requires_dates_unless_airing() {
        let (start, end) = window();
        let mut m = media("2025-01-11T00:00:00Z", None, false);
        assert!(!media_in_window(&m, start, end));
        m.airing = true;
        assert!(media_in_window(&m, start, end));
        m.start_date = None;
        assert!(!media_in_window(&m, start, end));
    }

    #[test]
    fn language_policy_sub_and_dub() {
        let survivors = vec![
            (hit("a.1", "My Show", true), media("2025-01-11T00:00:00Z", None, true)),
            (hit("b.2", "My Show", false), media("2025-01-11T00:00:00Z", None, true)),
        ];
        let subs = apply_language_policy(survivors.clone(), LanguagePreference::Sub);
        assert_eq!(subs.len(), 1);
        assert!(!subs[0].0.dub);

        let dubs = apply_language_policy(survivors, LanguagePreference::Dub);
        assert_eq!(dubs.len(), 1);
        assert!(dubs[0].0.dub);
    }

    #[test]
    fn dub_fallback_prefers_dub_per_title() {
        let survivors = vec![
            (hit("my-show.aa", "My Show", true), media("2025-01-11T00:00:00Z", None, true)),
            (hit("my-show.bb", "My Show", false), media("2025-01-11T00:00:00Z", None, true)),
            (hit("other.cc", "Other Show", false), media("2025-01-11T00:00:00Z", None, true)),
        ];
        let kept = apply_language_policy(survivors, LanguagePreference::DubFallbackSub);
        let ids: Vec<&str> = kept.iter().map(|(h, _)| h.identifier.as_str()).collect();
        // Dubbed variant shadows the sub of the same title; unrelated sub stays.
        assert_eq!(ids, vec!["my-show.aa", "other.cc"]);
    }

    #[test]
    fn parts_come_out_in_air_date_order() {
        let matches = vec![
            (
                hit("sakamoto-days-part-2.DEF34", "Sakamoto Days Part 2", false),
                media("2025-07-14T00:00:00Z", None, true),
            ),
            (
                hit("sakamoto-days.ABC12", "Sakamoto Days", false),
                media("2025-01-11T00:00:00Z", Some("2025-04-05T00:00:00Z"), false),
            ),
        ];
        assert_eq!(
            identifiers_in_air_order(matches),
            vec!["sakamoto-days.ABC12", "sakamoto-days-part-2.DEF34"]
        );
    }

    #[test]
    fn duplicate_identifiers_collapse() {
        let matches = vec![
            (hit("x.1", "X", false), media("2025-01-11T00:00:00Z", None, true)),
            (hit("x.1", "X (ITA)", false), media("2025-01-12T00:00:00Z", None, true)),
        ];
        assert_eq!(identifiers_in_air_order(matches), vec!["x.1"]);
    }

    #[test]
    fn alternates_respect_scene_season() {
        let alternates = vec![
            AlternateTitle { title: "Global".into(), scene_season_number: Some(-1) },
            AlternateTitle { title: "No Scene".into(), scene_season_number: None },
            AlternateTitle { title: "S2 Only".into(), scene_season_number: Some(2) },
        ];
        let for_s1 = alternates_for_season(&alternates, 1);
        assert_eq!(for_s1, vec!["Global", "No Scene"]);
        let for_s2 = alternates_for_season(&alternates, 2);
        assert_eq!(for_s2, vec!["Global", "No Scene", "S2 Only"]);
    }

    #[test]
    fn season_counts_derive_status() {
        use crate::sonarr::types::SeasonStatistics;
        let make = |aired, files, total| SeasonResource {
            season_number: 1,
            monitored: true,
            statistics: Some(SeasonStatistics {
                episode_count: Some(aired),
                episode_file_count: Some(files),
                total_episode_count: Some(total),
            }),
        };

        let (total, missing, status) = season_counts(&make(12, 12, 12));
        assert_eq!((total, missing), (12, 0));
        assert_eq!(status, SeasonStatus::Completed);

        let (_, missing, status) = season_counts(&make(12, 5, 24));
        assert_eq!(missing, 7);
        assert_eq!(status, SeasonStatus::Downloading);

        let (_, missing, status) = season_counts(&make(12, 0, 24));
        assert_eq!(missing, 12);
        assert_eq!(status, SeasonStatus::NotStarted);
    }
}
