//! The `fetch_wanted` task (C8)
//!
//! Pulls Sonarr's wanted-missing list, resolves each record to a direct
//! download URL on the source site, and enqueues it. Problems with a single
//! record never abort the run.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use super::scheduler::Task;
use crate::animeworld::AnimeWorldClient;
use crate::db::Store;
use crate::downloader::{DownloadQueue, EnqueueRequest};
use crate::error::AwarrError;
use crate::metadata::MetadataSync;
use crate::settings::Settings;
use crate::sonarr::types::WantedRecord;
use crate::sonarr::SonarrClient;

const PAGE_SIZE: i32 = 100;

pub struct FetchWantedTask {
    settings: Arc<Settings>,
    store: Arc<Store>,
    sonarr: Arc<SonarrClient>,
    site: Arc<AnimeWorldClient>,
    sync: Arc<MetadataSync>,
    queue: Arc<DownloadQueue>,
}

impl FetchWantedTask {
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<Store>,
        sonarr: Arc<SonarrClient>,
        site: Arc<AnimeWorldClient>,
        sync: Arc<MetadataSync>,
        queue: Arc<DownloadQueue>,
    ) -> Self {
        Self {
            settings,
            store,
            sonarr,
            site,
            sync,
            queue,
        }
    }

    /// All wanted records, air date ascending, across pages.
    async fn fetch_all_wanted(&self) -> anyhow::Result<Vec<WantedRecord>> {
        let mut records = Vec::new();
        let mut page = 1;
        loop {
            let batch = self.sonarr.get_wanted_missing(PAGE_SIZE, page).await?;
            let total = batch.total_records;
            let count = batch.records.len();
            records.extend(batch.records);
            if count == 0 || records.len() as i64 >= total {
                break;
            }
            page += 1;
        }
        Ok(records)
    }

    fn record_passes_filters(&self, record: &WantedRecord) -> bool {
        let Some(series) = &record.series else {
            return false;
        };
        if self.settings.anime_only() && !series.is_anime() {
            return false;
        }
        self.settings.tags_allow(&series.tags)
    }

    /// Resolve and enqueue one record. Returns true when enqueued.
    async fn process_record(&self, record: &WantedRecord) -> bool {
        let Some(series) = self
            .store
            .get_series_by_sonarr_id(record.series_id)
            .ok()
            .flatten()
            .filter(|s| !s.deleted)
        else {
            tracing::debug!("Wanted episode {} has no local series, skipping", record.id);
            return false;
        };

        let season_number = if series.absolute { 1 } else { record.season_number };
        let Some(season) = self
            .store
            .get_season(series.id, season_number)
            .ok()
            .flatten()
            .filter(|s| !s.deleted)
        else {
            tracing::debug!(
                "No local season {} for '{}', skipping wanted episode {}",
                season_number,
                series.title,
                record.id
            );
            return false;
        };

        if self.queue.has_active_for_episode(record.id) {
            tracing::debug!("Episode {} already queued, skipping", record.id);
            return false;
        }

        let lookup_number = if series.absolute {
            match record.absolute_episode_number {
                Some(n) => n,
                None => {
                    tracing::warn!(
                        "'{}' is absolute-numbered but episode {} has no absolute number",
                        series.title,
                        record.id
                    );
                    return false;
                }
            }
        } else {
            record.episode_number
        };

        let identifiers = season.identifiers();
        if identifiers.is_empty() {
            tracing::warn!(
                "'{}' S{:02} has no source-site identifiers yet, skipping episode {}",
                series.title,
                season.season_number,
                lookup_number
            );
            return false;
        }

        let link = match self
            .site
            .find_episode_download_link(identifiers, lookup_number)
            .await
        {
            Ok(Some(link)) => link,
            Ok(None) => {
                tracing::warn!(
                    "No download link for '{}' episode {} on the source site",
                    series.title,
                    lookup_number
                );
                return false;
            }
            Err(e) => {
                tracing::warn!(
                    "Resolving '{}' episode {} failed: {}",
                    series.title,
                    lookup_number,
                    e
                );
                return false;
            }
        };

        let request = EnqueueRequest {
            series_id: series.id,
            season_id: season.id,
            episode_id: record.id,
            series_title: series.title.clone(),
            season_number: record.season_number,
            episode_number: record.episode_number,
            episode_title: record.title.clone(),
            download_url: link,
        };
        match self.queue.enqueue(request) {
            Ok(id) => {
                tracing::info!(
                    "Queued '{}' S{:02}E{:02} as {}",
                    series.title,
                    record.season_number,
                    record.episode_number,
                    id
                );
                true
            }
            Err(AwarrError::InvalidRequest(_)) => false,
            Err(e) => {
                tracing::warn!("Enqueue failed for episode {}: {}", record.id, e);
                false
            }
        }
    }
}

#[async_trait]
impl Task for FetchWantedTask {
    fn id(&self) -> &'static str {
        "fetch_wanted"
    }

    fn name(&self) -> &'static str {
        "Fetch wanted episodes"
    }

    fn description(&self) -> &'static str {
        "Resolve Sonarr's missing episodes against the source site and queue downloads"
    }

    fn interval_minutes(&self) -> u64 {
        self.settings.fetch_wanted_interval()
    }

    async fn run(&self) -> anyhow::Result<String> {
        let records = self.fetch_all_wanted().await?;
        let wanted: Vec<&WantedRecord> = records
            .iter()
            .filter(|r| self.record_passes_filters(r))
            .collect();
        tracing::info!(
            "{} wanted episodes after filters ({} total)",
            wanted.len(),
            records.len()
        );

        // Series the store has not seen yet get a one-shot sync first.
        let mut unknown: HashSet<i64> = HashSet::new();
        for record in &wanted {
            let known = self
                .store
                .get_series_by_sonarr_id(record.series_id)
                .ok()
                .flatten()
                .map(|s| !s.deleted)
                .unwrap_or(false);
            if !known {
                unknown.insert(record.series_id);
            }
        }
        for series_id in unknown {
            if let Err(e) = self.sync.sync_one(series_id, false).await {
                tracing::warn!("One-shot sync of series {} failed: {}", series_id, e);
            }
        }

        let mut enqueued = 0;
        let mut skipped = 0;
        for record in &wanted {
            if self.process_record(record).await {
                enqueued += 1;
            } else {
                skipped += 1;
            }
        }

        Ok(format!("{} queued, {} skipped", enqueued, skipped))
    }
}
