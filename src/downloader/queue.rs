//! Download Queue (C9)
//!
//! In-memory queue with bounded concurrency. Queue advancement is serial
//! (guarded by a `processing` flag); each started download runs on its own
//! task and drives the queue again when it finishes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::engine::RangedDownloadEngine;
use super::events::{DownloadEvent, EpisodeRef};
use super::progress::DownloadProgress;
use crate::error::{AwarrError, AwarrResult};
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    pub id: String,
    pub series_id: i64,
    pub season_id: i64,
    /// Sonarr's episode id.
    pub episode_id: i64,
    pub series_title: String,
    pub season_number: i32,
    pub episode_number: i32,
    pub episode_title: Option<String>,
    pub download_url: String,
    pub status: QueueStatus,
    /// 0..=100
    pub progress: f32,
    pub download_speed: Option<f64>,
    pub added_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    #[serde(skip)]
    pub cancel_token: CancellationToken,
}

impl QueueItem {
    pub fn episode_ref(&self) -> EpisodeRef {
        EpisodeRef {
            series_title: self.series_title.clone(),
            season_number: self.season_number,
            episode_number: self.episode_number,
            episode_title: self.episode_title.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub series_id: i64,
    pub season_id: i64,
    pub episode_id: i64,
    pub series_title: String,
    pub season_number: i32,
    pub episode_number: i32,
    pub episode_title: Option<String>,
    pub download_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub items: Vec<QueueItem>,
    pub max_workers: usize,
    pub queue_length: usize,
    pub active_downloads: usize,
}

/// The transfer mechanism, injected so tests can substitute a fake.
#[async_trait]
pub trait Transfer: Send + Sync {
    async fn run(
        &self,
        url: &str,
        tmp_dir: &Path,
        out_dir: &Path,
        workers: usize,
        cancel: &CancellationToken,
        progress: Box<dyn Fn(DownloadProgress) + Send + Sync>,
    ) -> anyhow::Result<PathBuf>;
}

#[async_trait]
impl Transfer for RangedDownloadEngine {
    async fn run(
        &self,
        url: &str,
        tmp_dir: &Path,
        out_dir: &Path,
        workers: usize,
        cancel: &CancellationToken,
        progress: Box<dyn Fn(DownloadProgress) + Send + Sync>,
    ) -> anyhow::Result<PathBuf> {
        self.download(url, tmp_dir, out_dir, workers, cancel, progress)
            .await
    }
}

/// Invoked with the merged file once a download completes.
#[async_trait]
pub trait CompletionHandler: Send + Sync {
    async fn handle(&self, item: QueueItem, file: PathBuf);
}

/// No-op handler for tests and degraded configurations.
pub struct NullCompletionHandler;

#[async_trait]
impl CompletionHandler for NullCompletionHandler {
    async fn handle(&self, _item: QueueItem, _file: PathBuf) {}
}

pub struct DownloadQueue {
    items: RwLock<HashMap<String, QueueItem>>,
    /// Serialises queue advancement; downloads themselves run concurrently.
    processing: AtomicBool,
    settings: Arc<Settings>,
    transfer: Arc<dyn Transfer>,
    completion: Arc<dyn CompletionHandler>,
    events: broadcast::Sender<DownloadEvent>,
    tmp_dir: PathBuf,
    out_dir: PathBuf,
    /// Self-handle so spawned transfers can drive the queue when they end.
    me: Weak<DownloadQueue>,
}

impl DownloadQueue {
    pub fn new(
        settings: Arc<Settings>,
        transfer: Arc<dyn Transfer>,
        completion: Arc<dyn CompletionHandler>,
        events: broadcast::Sender<DownloadEvent>,
        tmp_dir: PathBuf,
        out_dir: PathBuf,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            items: RwLock::new(HashMap::new()),
            processing: AtomicBool::new(false),
            settings,
            transfer,
            completion,
            events,
            tmp_dir,
            out_dir,
            me: me.clone(),
        })
    }

    fn strong(&self) -> Arc<Self> {
        self.me.upgrade().expect("queue dropped while in use")
    }

    // ============================================================================
    // Public operations
    // ============================================================================

    /// Add a download. Rejects when a non-terminal item already exists for
    /// the same (series, season, episode).
    pub fn enqueue(&self, request: EnqueueRequest) -> AwarrResult<String> {
        let id = Uuid::new_v4().to_string();
        {
            let mut items = self.items.write().unwrap();
            let duplicate = items.values().any(|item| {
                !item.status.is_terminal()
                    && item.series_id == request.series_id
                    && item.season_id == request.season_id
                    && item.episode_id == request.episode_id
            });
            if duplicate {
                return Err(AwarrError::InvalidRequest(format!(
                    "episode {} is already queued",
                    request.episode_id
                )));
            }

            items.insert(
                id.clone(),
                QueueItem {
                    id: id.clone(),
                    series_id: request.series_id,
                    season_id: request.season_id,
                    episode_id: request.episode_id,
                    series_title: request.series_title,
                    season_number: request.season_number,
                    episode_number: request.episode_number,
                    episode_title: request.episode_title,
                    download_url: request.download_url,
                    status: QueueStatus::Pending,
                    progress: 0.0,
                    download_speed: None,
                    added_at: Utc::now(),
                    started_at: None,
                    completed_at: None,
                    error: None,
                    cancel_token: CancellationToken::new(),
                },
            );
        }

        tracing::info!("Enqueued download {}", id);
        self.pump();
        Ok(id)
    }

    /// True when a non-terminal item exists for this Sonarr episode id.
    pub fn has_active_for_episode(&self, episode_id: i64) -> bool {
        let items = self.items.read().unwrap();
        items
            .values()
            .any(|item| item.episode_id == episode_id && !item.status.is_terminal())
    }

    /// Remove a pending item from the queue.
    pub fn remove(&self, id: &str) -> AwarrResult<()> {
        let mut items = self.items.write().unwrap();
        let item = items
            .get(id)
            .ok_or_else(|| AwarrError::DownloadNotFound(id.to_string()))?;
        if item.status != QueueStatus::Pending {
            return Err(AwarrError::DownloadInvalidState {
                id: id.to_string(),
                expected: "pending".to_string(),
                actual: format!("{:?}", item.status).to_lowercase(),
            });
        }
        items.remove(id);
        tracing::info!("Removed pending download {}", id);
        Ok(())
    }

    /// Cancel a downloading item: signal the transfer, mark the item failed,
    /// clean its chunk directory, and drive the queue forward.
    pub fn cancel(&self, id: &str) -> AwarrResult<()> {
        let token = {
            let items = self.items.read().unwrap();
            let item = items
                .get(id)
                .ok_or_else(|| AwarrError::DownloadNotFound(id.to_string()))?;
            if item.status != QueueStatus::Downloading {
                return Err(AwarrError::DownloadInvalidState {
                    id: id.to_string(),
                    expected: "downloading".to_string(),
                    actual: format!("{:?}", item.status).to_lowercase(),
                });
            }
            item.cancel_token.clone()
        };

        token.cancel();
        self.fail(id, AwarrError::Cancelled.to_string());

        let tmp = self.tmp_dir.join(id);
        tokio::spawn(async move {
            if let Err(e) = tokio::fs::remove_dir_all(&tmp).await {
                tracing::debug!("Chunk dir cleanup after cancel failed: {}", e);
            }
        });

        self.pump();
        Ok(())
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let items = self.items.read().unwrap();
        let mut list: Vec<QueueItem> = items.values().cloned().collect();
        list.sort_by_key(|item| item.added_at);
        let queue_length = list
            .iter()
            .filter(|i| i.status == QueueStatus::Pending)
            .count();
        let active_downloads = list
            .iter()
            .filter(|i| i.status == QueueStatus::Downloading)
            .count();
        QueueSnapshot {
            items: list,
            max_workers: self.settings.download_max_workers(),
            queue_length,
            active_downloads,
        }
    }

    pub fn get(&self, id: &str) -> Option<QueueItem> {
        self.items.read().unwrap().get(id).cloned()
    }

    // ============================================================================
    // Internal transitions
    // ============================================================================

    fn progress_update(&self, id: &str, percent: f32, speed: Option<f64>) {
        let mut items = self.items.write().unwrap();
        if let Some(item) = items.get_mut(id) {
            if item.status == QueueStatus::Downloading {
                // Progress never moves backwards.
                item.progress = item.progress.max(percent.clamp(0.0, 100.0));
                item.download_speed = speed;
            }
        }
    }

    fn complete(&self, id: &str) -> Option<QueueItem> {
        let mut items = self.items.write().unwrap();
        let item = items.get_mut(id)?;
        if item.status.is_terminal() {
            return None;
        }
        item.status = QueueStatus::Completed;
        item.progress = 100.0;
        item.download_speed = None;
        item.completed_at = Some(Utc::now());
        item.error = None;
        Some(item.clone())
    }

    fn fail(&self, id: &str, error: String) {
        let failed = {
            let mut items = self.items.write().unwrap();
            match items.get_mut(id) {
                Some(item) if !item.status.is_terminal() => {
                    item.status = QueueStatus::Failed;
                    item.download_speed = None;
                    item.completed_at = Some(Utc::now());
                    item.error = Some(error.clone());
                    Some(item.clone())
                }
                _ => None,
            }
        };

        if let Some(item) = failed {
            tracing::warn!("Download {} failed: {}", id, error);
            let _ = self.events.send(DownloadEvent::Error {
                episode: item.episode_ref(),
                error,
            });
        }
    }

    // ============================================================================
    // Processing loop
    // ============================================================================

    /// Fill free downloading slots with pending items. Serial by design: a
    /// second caller returns immediately while the first is still filling,
    /// and the filler re-checks after releasing the flag so a concurrent
    /// enqueue is never stranded.
    pub fn pump(&self) {
        loop {
            if self.processing.swap(true, Ordering::SeqCst) {
                return;
            }

            while let Some(item) = self.claim_next() {
                self.start_download(item);
            }

            self.processing.store(false, Ordering::SeqCst);

            if !self.has_startable() {
                return;
            }
        }
    }

    /// Atomically promote the oldest pending item into a free slot.
    fn claim_next(&self) -> Option<QueueItem> {
        let max = self.settings.concurrent_downloads();
        let mut items = self.items.write().unwrap();
        let active = items
            .values()
            .filter(|i| i.status == QueueStatus::Downloading)
            .count();
        if active >= max {
            return None;
        }
        let id = items
            .values()
            .filter(|i| i.status == QueueStatus::Pending)
            .min_by_key(|i| i.added_at)
            .map(|i| i.id.clone())?;
        let item = items.get_mut(&id).unwrap();
        item.status = QueueStatus::Downloading;
        item.started_at = Some(Utc::now());
        Some(item.clone())
    }

    fn has_startable(&self) -> bool {
        let max = self.settings.concurrent_downloads();
        let items = self.items.read().unwrap();
        let active = items
            .values()
            .filter(|i| i.status == QueueStatus::Downloading)
            .count();
        active < max && items.values().any(|i| i.status == QueueStatus::Pending)
    }

    /// Launch-and-forget: the transfer runs on its own task and drives the
    /// queue again when it resolves.
    fn start_download(&self, item: QueueItem) {
        let queue = self.strong();
        tokio::spawn(async move {
            let id = item.id.clone();
            tracing::info!(
                "Starting download {} ({} S{:02}E{:02})",
                id,
                item.series_title,
                item.season_number,
                item.episode_number
            );

            let workers = queue.settings.download_max_workers();
            let tmp = queue.tmp_dir.join(&id);
            let cancel = item.cancel_token.clone();

            let progress_queue = Arc::clone(&queue);
            let progress_id = id.clone();
            let progress = Box::new(move |p: DownloadProgress| {
                progress_queue.progress_update(
                    &progress_id,
                    p.percentage as f32,
                    Some(p.speed_bytes_per_sec),
                );
            });

            let result = queue
                .transfer
                .run(
                    &item.download_url,
                    &tmp,
                    &queue.out_dir,
                    workers,
                    &cancel,
                    progress,
                )
                .await;

            match result {
                Ok(file) => {
                    if let Some(completed) = queue.complete(&id) {
                        let completion = Arc::clone(&queue.completion);
                        tokio::spawn(async move {
                            completion.handle(completed, file).await;
                        });
                    }
                }
                Err(e) => {
                    if cancel.is_cancelled() {
                        // cancel() already failed the item; this is a no-op
                        // unless the transfer noticed the token first.
                        queue.fail(&id, AwarrError::Cancelled.to_string());
                    } else {
                        queue.fail(&id, e.to_string());
                    }
                }
            }

            queue.pump();
        });
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DownloadEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use std::time::Duration;

    /// Transfer stub that waits until told, then succeeds or fails.
    struct StubTransfer {
        delay_ms: u64,
        fail: bool,
    }

    #[async_trait]
    impl Transfer for StubTransfer {
        async fn run(
            &self,
            _url: &str,
            _tmp_dir: &Path,
            out_dir: &Path,
            _workers: usize,
            cancel: &CancellationToken,
            progress: Box<dyn Fn(DownloadProgress) + Send + Sync>,
        ) -> anyhow::Result<PathBuf> {
            let mut waited = 0;
            while waited < self.delay_ms {
                if cancel.is_cancelled() {
                    anyhow::bail!("Download cancelled");
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
                waited += 5;
            }
            if self.fail {
                anyhow::bail!("boom");
            }
            progress(DownloadProgress::new(100, 100, 1.0));
            Ok(out_dir.join("out.mp4"))
        }
    }

    fn queue_with(delay_ms: u64, fail: bool, concurrent: i64) -> Arc<DownloadQueue> {
        let settings = Arc::new(Settings::new(Arc::new(Store::in_memory().unwrap())));
        settings
            .set(crate::settings::CONCURRENT_DOWNLOADS, serde_json::json!(concurrent))
            .unwrap();
        let (events, _) = broadcast::channel(64);
        let dir = std::env::temp_dir().join("awarr-queue-tests");
        DownloadQueue::new(
            settings,
            Arc::new(StubTransfer { delay_ms, fail }),
            Arc::new(NullCompletionHandler),
            events,
            dir.join("tmp"),
            dir.join("out"),
        )
    }

    fn request(episode_id: i64) -> EnqueueRequest {
        EnqueueRequest {
            series_id: 1,
            season_id: 1,
            episode_id,
            series_title: "Test".to_string(),
            season_number: 1,
            episode_number: episode_id as i32,
            episode_title: None,
            download_url: "http://example/ep.mp4".to_string(),
        }
    }

    async fn wait_until(queue: &Arc<DownloadQueue>, pred: impl Fn(&QueueSnapshot) -> bool) {
        for _ in 0..200 {
            if pred(&queue.snapshot()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached; snapshot: {:?}", queue.snapshot());
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_rejected() {
        let queue = queue_with(200, false, 1);
        queue.enqueue(request(7)).unwrap();
        let err = queue.enqueue(request(7)).unwrap_err();
        assert!(matches!(err, AwarrError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let queue = queue_with(100, false, 2);
        for episode in 1..=5 {
            queue.enqueue(request(episode)).unwrap();
        }
        wait_until(&queue, |s| s.active_downloads > 0).await;
        // At no observable point may more than two items be downloading.
        for _ in 0..20 {
            assert!(queue.snapshot().active_downloads <= 2);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        wait_until(&queue, |s| {
            s.items.iter().all(|i| i.status == QueueStatus::Completed)
        })
        .await;
    }

    #[tokio::test]
    async fn failed_transfer_marks_item_and_emits_event() {
        let queue = queue_with(10, true, 1);
        let mut events = queue.subscribe_events();
        queue.enqueue(request(1)).unwrap();
        wait_until(&queue, |s| {
            s.items.iter().all(|i| i.status == QueueStatus::Failed)
        })
        .await;
        let item = &queue.snapshot().items[0];
        assert_eq!(item.error.as_deref(), Some("boom"));
        match events.try_recv().unwrap() {
            DownloadEvent::Error { error, .. } => assert_eq!(error, "boom"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn cancel_sets_the_canonical_error() {
        let queue = queue_with(10_000, false, 1);
        let id = queue.enqueue(request(1)).unwrap();
        wait_until(&queue, |s| s.active_downloads == 1).await;

        queue.cancel(&id).unwrap();
        let item = queue.get(&id).unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
        assert_eq!(item.error.as_deref(), Some("Download cancelled by user"));

        // Terminal states reject a second cancel.
        assert!(matches!(
            queue.cancel(&id),
            Err(AwarrError::DownloadInvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn remove_only_applies_to_pending() {
        let queue = queue_with(10_000, false, 1);
        let first = queue.enqueue(request(1)).unwrap();
        let second = queue.enqueue(request(2)).unwrap();
        wait_until(&queue, |s| s.active_downloads == 1).await;

        // First is downloading, second still pending.
        assert!(matches!(
            queue.remove(&first),
            Err(AwarrError::DownloadInvalidState { .. })
        ));
        queue.remove(&second).unwrap();
        assert!(queue.get(&second).is_none());
        queue.cancel(&first).unwrap();
    }

    #[tokio::test]
    async fn completed_items_free_their_slot() {
        let queue = queue_with(20, false, 1);
        queue.enqueue(request(1)).unwrap();
        queue.enqueue(request(2)).unwrap();
        wait_until(&queue, |s| {
            s.items.iter().all(|i| i.status == QueueStatus::Completed)
        })
        .await;
        let snapshot = queue.snapshot();
        assert!(snapshot.items.iter().all(|i| i.progress == 100.0));
        assert_eq!(snapshot.queue_length, 0);
        assert_eq!(snapshot.active_downloads, 0);
    }

    #[tokio::test]
    async fn terminal_item_allows_re_enqueue() {
        let queue = queue_with(10, true, 1);
        queue.enqueue(request(1)).unwrap();
        wait_until(&queue, |s| {
            s.items.iter().all(|i| i.status == QueueStatus::Failed)
        })
        .await;
        // Failed is terminal, so the same episode can be queued again.
        queue.enqueue(request(1)).unwrap();
    }
}
