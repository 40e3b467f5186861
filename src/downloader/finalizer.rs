//! Post-download finalizer (C10)
//!
//! Moves a merged download into the Sonarr-managed series folder (with
//! root-folder path remapping), triggers a rescan, optionally renames the
//! freshly imported file, and emits the success event. Failures here never
//! revert the download's completed state.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::events::DownloadEvent;
use super::queue::{CompletionHandler, QueueItem};
use crate::db::models::RootFolder;
use crate::db::Store;
use crate::error::{AwarrError, AwarrResult};
use crate::settings::Settings;
use crate::sonarr::SonarrClient;

/// Poll delays while waiting for Sonarr to index the imported file.
const RENAME_BACKOFF_MS: [u64; 4] = [500, 1000, 2000, 4000];

pub struct Finalizer {
    store: Arc<Store>,
    settings: Arc<Settings>,
    sonarr: Arc<SonarrClient>,
    events: broadcast::Sender<DownloadEvent>,
}

impl Finalizer {
    pub fn new(
        store: Arc<Store>,
        settings: Arc<Settings>,
        sonarr: Arc<SonarrClient>,
        events: broadcast::Sender<DownloadEvent>,
    ) -> Self {
        Self {
            store,
            settings,
            sonarr,
            events,
        }
    }

    async fn finalize(&self, item: &QueueItem, file: &Path) -> AwarrResult<()> {
        let series = self
            .store
            .get_series(item.series_id)?
            .ok_or_else(|| AwarrError::NotFound(format!("series {}", item.series_id)))?;

        let remote = self.sonarr.get_series(series.sonarr_id).await?;
        let remote_path = remote.path.ok_or_else(|| {
            AwarrError::FinalizationFailed(format!("series {} has no path", series.sonarr_id))
        })?;

        let folders = self.store.list_root_folders()?;
        let target_dir = match RootFolder::remap(&folders, &remote_path) {
            Some((mapped, folder)) => {
                tracing::debug!(
                    "Remapped '{}' via root folder '{}' -> '{}'",
                    remote_path,
                    folder.path,
                    mapped
                );
                PathBuf::from(mapped)
            }
            None => {
                tracing::warn!(
                    "No root-folder mapping covers '{}', using Sonarr's path as-is",
                    remote_path
                );
                PathBuf::from(&remote_path)
            }
        };

        let extension = file
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4");
        let destination = target_dir.join(format!(
            "{} - S{:02}E{:02}.{}",
            sanitize_filename(&item.series_title),
            item.season_number,
            item.episode_number,
            extension
        ));

        tokio::fs::create_dir_all(&target_dir)
            .await
            .map_err(|e| AwarrError::FinalizationFailed(e.to_string()))?;
        tokio::fs::copy(file, &destination)
            .await
            .map_err(|e| AwarrError::FinalizationFailed(e.to_string()))?;
        tracing::info!("Placed download at {:?}", destination);

        self.sonarr.rescan_series(series.sonarr_id).await?;

        if self.settings.auto_rename() {
            self.rename_when_indexed(series.sonarr_id, item.episode_id)
                .await;
        }

        let _ = self.events.send(DownloadEvent::Success {
            episode: item.episode_ref(),
        });
        Ok(())
    }

    /// Poll for the imported file's id with a short backoff, then ask Sonarr
    /// to rename it. Rename problems are logged, never propagated.
    async fn rename_when_indexed(&self, sonarr_series_id: i64, episode_id: i64) {
        for delay_ms in RENAME_BACKOFF_MS {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            self.sonarr.invalidate_episodes(sonarr_series_id).await;

            let episodes = match self.sonarr.get_series_episodes(sonarr_series_id).await {
                Ok(episodes) => episodes,
                Err(e) => {
                    tracing::debug!("Episode poll failed during rename: {}", e);
                    continue;
                }
            };

            let file_id = episodes
                .iter()
                .find(|e| e.id == episode_id)
                .and_then(|e| e.episode_file_id)
                .filter(|id| *id > 0);

            if let Some(file_id) = file_id {
                match self
                    .sonarr
                    .rename_episode_file(sonarr_series_id, file_id)
                    .await
                {
                    Ok(()) => tracing::info!("Requested rename of episode file {}", file_id),
                    Err(e) => tracing::warn!("Rename request failed: {}", e),
                }
                return;
            }
        }
        tracing::warn!(
            "Episode {} never showed a file id after import, skipping rename",
            episode_id
        );
    }
}

#[async_trait]
impl CompletionHandler for Finalizer {
    async fn handle(&self, item: QueueItem, file: PathBuf) {
        if let Err(e) = self.finalize(&item, &file).await {
            // The transfer itself succeeded; the item stays completed.
            tracing::warn!("Finalization failed for {}: {}", item.id, e);
        }
    }
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize_filename("Re:Zero"), "Re_Zero");
        assert_eq!(sanitize_filename("What/If?"), "What_If_");
        assert_eq!(sanitize_filename(" Plain Title "), "Plain Title");
    }
}
