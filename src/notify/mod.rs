//! Notification dispatcher (C11)
//!
//! Listens to download events and fans them out to every Sonarr-configured
//! provider with `onDownload` enabled. One provider failing never stops the
//! others.

pub mod providers;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::broadcast;

use crate::downloader::DownloadEvent;
use crate::sonarr::SonarrClient;
use providers::{AppriseProvider, DiscordProvider, NotificationProvider, WebhookProvider};

pub struct NotificationDispatcher {
    sonarr: Arc<SonarrClient>,
    providers: Vec<Arc<dyn NotificationProvider>>,
    me: std::sync::Weak<NotificationDispatcher>,
}

impl NotificationDispatcher {
    pub fn new(sonarr: Arc<SonarrClient>) -> Arc<Self> {
        let http = Arc::new(
            Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        );
        let providers: Vec<Arc<dyn NotificationProvider>> = vec![
            Arc::new(DiscordProvider::new(Arc::clone(&http))),
            Arc::new(WebhookProvider::new(Arc::clone(&http))),
            Arc::new(AppriseProvider::new(http)),
        ];
        Arc::new_cyclic(|me| Self {
            sonarr,
            providers,
            me: me.clone(),
        })
    }

    /// Consume download events until the sender side closes.
    pub fn start(&self, mut events: broadcast::Receiver<DownloadEvent>) {
        let dispatcher = self.me.upgrade().expect("dispatcher dropped while in use");
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => dispatcher.dispatch(&event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!("Notification dispatcher lagged, {} events lost", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    pub async fn dispatch(&self, event: &DownloadEvent) {
        let (title, body) = match event {
            DownloadEvent::Success { episode } => {
                ("Download complete".to_string(), episode.label())
            }
            DownloadEvent::Error { episode, error } => (
                "Download failed".to_string(),
                format!("{}\n{}", episode.label(), error),
            ),
        };

        let configs = match self.sonarr.get_notifications().await {
            Ok(configs) => configs,
            Err(e) => {
                tracing::warn!("Cannot load notification configs from Sonarr: {}", e);
                return;
            }
        };

        for config in configs.into_iter().filter(|c| c.on_download) {
            let Some(provider) = self
                .providers
                .iter()
                .find(|p| p.implementation().eq_ignore_ascii_case(&config.implementation))
            else {
                tracing::warn!(
                    "Unknown notification implementation '{}' ({})",
                    config.implementation,
                    config.name
                );
                continue;
            };

            if let Err(e) = provider.send(&config, &title, &body).await {
                tracing::warn!("Notification '{}' failed: {}", config.name, e);
            } else {
                tracing::debug!("Notification '{}' delivered", config.name);
            }
        }
    }
}
