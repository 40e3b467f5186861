use axum::{routing::get, Json, Router};
use figment::providers::Format;
use rand::RngCore;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod animeworld;
mod api;
mod config;
mod db;
mod downloader;
mod error;
mod logring;
mod metadata;
mod notify;
mod settings;
mod sonarr;
mod tasks;

use animeworld::AnimeWorldClient;
use db::Store;
use downloader::{DownloadEvent, DownloadQueue, Finalizer, RangedDownloadEngine};
use logring::{LogRing, LogRingLayer};
use metadata::{AnilistClient, JikanClient, MetadataSync};
use notify::NotificationDispatcher;
use settings::Settings;
use sonarr::SonarrClient;
use tasks::{FetchWantedTask, TaskScheduler, UpdateMetadataTask};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Arc<Store>,
    pub sonarr: Arc<SonarrClient>,
    pub queue: Arc<DownloadQueue>,
    pub scheduler: Arc<TaskScheduler>,
    pub log_ring: Arc<LogRing>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `awarr keygen` prints a fresh app secret and exits.
fn run_keygen() {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    println!("{}", hex::encode(bytes));
}

#[tokio::main]
async fn main() {
    if std::env::args().nth(1).as_deref() == Some("keygen") {
        run_keygen();
        return;
    }

    let log_ring = LogRing::new();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .or_else(|_| std::env::var("LOG_LEVEL"))
                .unwrap_or_else(|_| "awarr=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(LogRingLayer::new(Arc::clone(&log_ring)))
        .init();

    tracing::info!("Starting Awarr v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config::ensure_appdata_dirs() {
        tracing::warn!("Failed to create appData directories: {}. Continuing with legacy paths.", e);
    }

    let config_path = config::get_config_path();
    let db_path = config::get_db_path();

    tracing::info!("Loading config from: {}", config_path.display());
    tracing::info!("Using database at: {}", db_path.display());

    // Load Config
    let app_config: config::Config = figment::Figment::new()
        .merge(figment::providers::Serialized::defaults(config::Config::default()))
        .merge(figment::providers::Toml::file(config_path))
        .merge(figment::providers::Env::prefixed("AWARR_"))
        .extract()
        .expect("Failed to load configuration");

    // First boot writes the effective defaults so operators have a file to
    // edit.
    if !config::get_appdata_dir().join("config/config.toml").exists() {
        if let Err(e) = config::save_config(&app_config) {
            tracing::warn!("Could not write initial config file: {}", e);
        }
    }

    // Abandoned downloads leave chunk dirs behind; clear them before the
    // queue starts writing new ones.
    config::clean_tmp_dir(&app_config.paths.tmp_dir);

    // Initialize Database + runtime settings
    let store = Arc::new(Store::new(&db_path).expect("Failed to initialize database"));
    let settings = Arc::new(Settings::new(Arc::clone(&store)));

    // Clients
    let sonarr = Arc::new(SonarrClient::new(Arc::clone(&settings)));
    let site = Arc::new(AnimeWorldClient::new(Arc::clone(&settings)));
    let anilist = Arc::new(AnilistClient::new());
    let jikan = Arc::new(JikanClient::new());

    // Settings changes with side effects: new Sonarr credentials force a
    // re-probe, a new source-site URL drops the scraping session.
    {
        let sonarr_hook = Arc::clone(&sonarr);
        let site_hook = Arc::clone(&site);
        settings.on_change(move |key| match key {
            settings::SONARR_URL | settings::SONARR_TOKEN => {
                sonarr_hook.invalidate_health();
                let sonarr = Arc::clone(&sonarr_hook);
                tokio::spawn(async move {
                    sonarr.probe().await;
                });
            }
            settings::ANIMEWORLD_BASE_URL => {
                let site = Arc::clone(&site_hook);
                tokio::spawn(async move {
                    site.reset_session().await;
                });
            }
            _ => {}
        });
    }

    // Event bus feeding the notification dispatcher
    let (events_tx, _) = tokio::sync::broadcast::channel::<DownloadEvent>(100);

    let sync = Arc::new(MetadataSync::new(
        Arc::clone(&store),
        Arc::clone(&settings),
        Arc::clone(&sonarr),
        Arc::clone(&site),
        Arc::clone(&anilist),
        Arc::clone(&jikan),
        app_config.paths.posters_dir.clone(),
    ));

    let finalizer = Arc::new(Finalizer::new(
        Arc::clone(&store),
        Arc::clone(&settings),
        Arc::clone(&sonarr),
        events_tx.clone(),
    ));

    let queue = DownloadQueue::new(
        Arc::clone(&settings),
        Arc::new(RangedDownloadEngine::new()),
        finalizer,
        events_tx.clone(),
        app_config.paths.tmp_dir.clone(),
        app_config.paths.downloads_dir.clone(),
    );

    let dispatcher = NotificationDispatcher::new(Arc::clone(&sonarr));
    dispatcher.start(queue.subscribe_events());

    // Background tasks
    let scheduler = TaskScheduler::new(vec![
        Arc::new(UpdateMetadataTask::new(Arc::clone(&sync), Arc::clone(&settings))),
        Arc::new(FetchWantedTask::new(
            Arc::clone(&settings),
            Arc::clone(&store),
            Arc::clone(&sonarr),
            Arc::clone(&site),
            Arc::clone(&sync),
            Arc::clone(&queue),
        )),
    ]);
    scheduler.start();

    // Sonarr health prober: once now, then every 60 s.
    {
        let sonarr = Arc::clone(&sonarr);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                sonarr.probe().await;
            }
        });
    }

    let state = Arc::new(AppState {
        settings,
        store,
        sonarr,
        queue,
        scheduler,
        log_ring,
    });

    // Build router
    let app = Router::new()
        .route("/health", get(health))
        .route("/api/health", get(health))
        .nest("/api/downloads", api::downloads::router())
        .nest("/api/library", api::library::router())
        .nest("/api/tasks", api::tasks::router())
        .nest("/api/settings", api::settings::router())
        .nest("/api/system", api::system::router())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Run server
    let host: std::net::IpAddr = app_config
        .server
        .host
        .parse()
        .unwrap_or_else(|_| [0, 0, 0, 0].into());
    let addr = SocketAddr::from((host, app_config.server.port));
    tracing::info!("Listening on {}", addr);

    // Create socket with SO_REUSEADDR to allow immediate restart after crash
    use socket2::{Domain, Socket, Type};
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket = Socket::new(domain, Type::STREAM, None).expect("Failed to create socket");
    socket
        .set_reuse_address(true)
        .expect("Failed to set SO_REUSEADDR");
    socket.bind(&addr.into()).expect("Failed to bind socket");
    socket.listen(1024).expect("Failed to listen on socket");

    // Set non-blocking mode before converting to tokio
    socket
        .set_nonblocking(true)
        .expect("Failed to set non-blocking mode");

    let listener =
        tokio::net::TcpListener::from_std(socket.into()).expect("Failed to convert to tokio listener");

    axum::serve(listener, app).await.unwrap();
}
