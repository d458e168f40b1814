use crate::api::HttpAlertsClient;
use crate::cache::RequestCache;
use crate::config::Config;
use crate::notifications::{JsonFileBackend, NotificationCenter, NotificationsSnapshot, ReadIdSet};
use crate::scheduler::{Visibility, VisibilitySource};
use crate::utils::fmt_duration;
use anyhow::Context;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Main application struct wiring the sync engine to the local sidecar
pub struct App {
    config: Config,
    cache: RequestCache,
    // Held so the poll loop keeps a live visibility channel.
    _visibility: VisibilitySource,
    center: NotificationCenter,
}

impl App {
    /// Build every component and start polling
    pub fn new(config: Config) -> Result<Self, anyhow::Error> {
        let api = HttpAlertsClient::new(&config.api_base_url, config.request_timeout)
            .context("Failed to create alerts client")?;
        info!(
            base_url = %api.base_url(),
            timeout = fmt_duration(config.request_timeout),
            "alerts client ready"
        );

        let cache = RequestCache::new(config.cache());
        let policy = cache.policy();
        info!(
            max_size = policy.max_size(),
            high_water = policy.high_water(),
            low_water = policy.low_water(),
            ttl = fmt_duration(config.cache_ttl),
            "request cache ready"
        );
        let backend = JsonFileBackend::new(&config.read_state_path);
        let path = backend.path().display().to_string();
        let read_ids = ReadIdSet::open(backend);
        info!(path, count = read_ids.len(), "read state opened");

        // A headless process is always in the foreground.
        let visibility = VisibilitySource::new(Visibility::Visible);
        let center = NotificationCenter::start(
            Arc::new(api),
            cache.clone(),
            read_ids,
            visibility.subscribe(),
            config.notifications(),
        );
        info!(
            poll_interval = fmt_duration(config.poll_interval),
            alert_limit = config.alert_limit,
            "notification polling started"
        );

        Ok(App {
            config,
            cache,
            _visibility: visibility,
            center,
        })
    }

    /// Fetch once, print the snapshot as JSON and stop
    pub async fn run_once(mut self) -> ExitCode {
        self.center.refresh_now().await;
        let snapshot = self.center.snapshot();
        self.center.shutdown().await;

        match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                error!(error = ?e, "Failed to serialize notification snapshot");
                return ExitCode::FAILURE;
            }
        }

        match snapshot.error {
            Some(message) => {
                warn!(error = %message, "refresh failed");
                ExitCode::FAILURE
            }
            None => ExitCode::SUCCESS,
        }
    }

    /// Run until Ctrl-C, logging every change to the unread count
    pub async fn run(mut self) -> ExitCode {
        let mut updates = self.center.subscribe();
        let mut last_unread = None;
        let mut last_error = None;

        loop {
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        error!("notification engine stopped unexpectedly");
                        return ExitCode::FAILURE;
                    }
                    let snapshot = updates.borrow_and_update().clone();
                    log_changes(&snapshot, &mut last_unread, &mut last_error);
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        let stats = self.cache.stats();
        info!(
            cache_size = stats.size,
            pending = stats.pending_count,
            scheduler = ?self.center.scheduler_state(),
            timeout = fmt_duration(self.config.shutdown_timeout),
            "shutting down"
        );
        match tokio::time::timeout(self.config.shutdown_timeout, self.center.shutdown()).await {
            Ok(()) => {
                info!("Graceful shutdown complete");
                ExitCode::SUCCESS
            }
            Err(_) => {
                warn!(
                    timeout = fmt_duration(self.config.shutdown_timeout),
                    "Shutdown timed out, exiting anyway"
                );
                ExitCode::FAILURE
            }
        }
    }
}

fn log_changes(
    snapshot: &NotificationsSnapshot,
    last_unread: &mut Option<usize>,
    last_error: &mut Option<String>,
) {
    if snapshot.is_loading {
        return;
    }

    if *last_error != snapshot.error {
        match &snapshot.error {
            Some(message) => warn!(error = %message, "alerts unavailable"),
            None if last_error.is_some() => info!("alerts reachable again"),
            None => {}
        }
        *last_error = snapshot.error.clone();
    }

    if *last_unread != Some(snapshot.unread_count) {
        info!(
            unread = snapshot.unread_count,
            total = snapshot.notifications.len(),
            "unread notifications changed"
        );
        *last_unread = Some(snapshot.unread_count);
    }
}
