//! The `update_metadata` task: full Sonarr → store reconciliation plus
//! season matching (C6 entry point).

use std::sync::Arc;

use async_trait::async_trait;

use super::scheduler::Task;
use crate::metadata::MetadataSync;
use crate::settings::Settings;

pub struct UpdateMetadataTask {
    sync: Arc<MetadataSync>,
    settings: Arc<Settings>,
}

impl UpdateMetadataTask {
    pub fn new(sync: Arc<MetadataSync>, settings: Arc<Settings>) -> Self {
        Self { sync, settings }
    }
}

#[async_trait]
impl Task for UpdateMetadataTask {
    fn id(&self) -> &'static str {
        "update_metadata"
    }

    fn name(&self) -> &'static str {
        "Update metadata"
    }

    fn description(&self) -> &'static str {
        "Sync monitored series and seasons from Sonarr and resolve source-site identifiers"
    }

    fn interval_minutes(&self) -> u64 {
        self.settings.update_metadata_interval()
    }

    async fn run(&self) -> anyhow::Result<String> {
        let summary = self.sync.full_sync().await?;
        Ok(format!(
            "{} series synced, {} deleted, {} seasons matched, {} unmatched, {} errors",
            summary.series_synced,
            summary.series_deleted,
            summary.seasons_matched,
            summary.seasons_unmatched,
            summary.errors
        ))
    }
}
