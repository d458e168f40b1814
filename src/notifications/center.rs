//! The notification engine handed to the UI layer.
//!
//! Owns the poll loop that refreshes alerts through the shared
//! [`RequestCache`], publishes a [`NotificationsSnapshot`] on every change and
//! forwards user actions to the [`ActionCoordinator`].

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::mapper::{map_alerts, merge_notifications};
use super::{ActionCoordinator, NotificationsSnapshot, ReadIdSet};
use crate::api::{AlertsApi, ApiError};
use crate::cache::{CacheError, RequestCache};
use crate::scheduler::{DEFAULT_POLL_INTERVAL, PollScheduler, SchedulerState, VisibilityWatch};
use crate::utils::log_if_slow;

/// Cache keys for alert lists share this prefix.
pub const ALERTS_CACHE_PREFIX: &str = "alerts:";

const SLOW_REFRESH_THRESHOLD: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy)]
pub struct NotificationConfig {
    pub poll_interval: Duration,
    /// Maximum alerts requested per fetch.
    pub alert_limit: u32,
    /// Freshness of the cached alert list; `None` uses the cache default.
    pub cache_ttl: Option<Duration>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            alert_limit: 50,
            cache_ttl: None,
        }
    }
}

pub struct NotificationCenter {
    refresher: Arc<Refresher>,
    actions: ActionCoordinator,
    state_rx: watch::Receiver<NotificationsSnapshot>,
    scheduler: PollScheduler,
}

impl NotificationCenter {
    /// Start polling. The first refresh begins immediately.
    pub fn start(
        api: Arc<dyn AlertsApi>,
        cache: RequestCache,
        read_ids: ReadIdSet,
        visibility: VisibilityWatch,
        config: NotificationConfig,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(NotificationsSnapshot::default());
        let state = Arc::new(state_tx);
        let read_ids = Arc::new(Mutex::new(read_ids));

        let refresher = Arc::new(Refresher {
            api: Arc::clone(&api),
            cache,
            read_ids: Arc::clone(&read_ids),
            state: Arc::clone(&state),
            config,
        });
        let actions = ActionCoordinator::new(api, read_ids, state);

        let scheduler = PollScheduler::spawn("notifications", config.poll_interval, visibility, {
            let refresher = Arc::clone(&refresher);
            move || {
                let refresher = Arc::clone(&refresher);
                async move { refresher.refresh().await }
            }
        });

        Self {
            refresher,
            actions,
            state_rx,
            scheduler,
        }
    }

    pub fn snapshot(&self) -> NotificationsSnapshot {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<NotificationsSnapshot> {
        self.state_rx.clone()
    }

    pub fn unread_count(&self) -> usize {
        self.state_rx.borrow().unread_count
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// Ask for a fresh fetch from the server without waiting.
    pub fn refresh(&self) {
        self.refresher.invalidate();
        self.scheduler.request_refresh();
    }

    /// Fetch from the server and wait until the snapshot reflects it.
    ///
    /// Joins a refresh that is already running instead of starting another.
    pub async fn refresh_now(&self) {
        self.refresher.invalidate();
        self.scheduler.refresh().await;
    }

    pub fn mark_as_read(&self, id: &str) -> Option<JoinHandle<()>> {
        self.actions.mark_as_read(id)
    }

    pub async fn mark_all_as_read(&self) -> usize {
        self.actions.mark_all_as_read().await
    }

    pub fn clear(&self, id: &str) -> Option<JoinHandle<()>> {
        self.actions.clear(id)
    }

    pub async fn shutdown(&mut self) {
        self.scheduler.shutdown().await;
    }
}

struct Refresher {
    api: Arc<dyn AlertsApi>,
    cache: RequestCache,
    read_ids: Arc<Mutex<ReadIdSet>>,
    state: Arc<watch::Sender<NotificationsSnapshot>>,
    config: NotificationConfig,
}

impl Refresher {
    fn cache_key(&self) -> String {
        format!("{ALERTS_CACHE_PREFIX}triggered:{}", self.config.alert_limit)
    }

    fn invalidate(&self) {
        self.cache.invalidate_by_prefix(ALERTS_CACHE_PREFIX);
    }

    async fn refresh(&self) {
        let start = Instant::now();
        self.state.send_modify(|s| s.is_loading = true);

        let api = Arc::clone(&self.api);
        let limit = self.config.alert_limit;
        let result = self
            .cache
            .cached_request(
                &self.cache_key(),
                move || async move { api.fetch_alerts(true, limit).await.map(Arc::new) },
                self.config.cache_ttl,
            )
            .await;

        match result {
            Ok(alerts) => {
                let fresh = map_alerts(&alerts, &self.read_ids.lock().unwrap());
                self.state.send_modify(|s| {
                    s.notifications = merge_notifications(&s.notifications, fresh);
                    s.error = None;
                    s.is_loading = false;
                    s.recount();
                });
                debug!(
                    alerts = alerts.len(),
                    unread = self.state.borrow().unread_count,
                    "notifications refreshed"
                );
            }
            Err(e) => {
                let message = describe_refresh_error(&e);
                warn!(error = %e, "notification refresh failed, keeping previous list");
                self.state.send_modify(|s| {
                    s.error = Some(message);
                    s.is_loading = false;
                });
            }
        }

        log_if_slow(start, SLOW_REFRESH_THRESHOLD, "notification refresh");
    }
}

/// Message surfaced to the UI for a failed refresh.
fn describe_refresh_error(error: &CacheError) -> String {
    let offline = error
        .operation_error()
        .and_then(|e| e.downcast_ref::<ApiError>())
        .is_some_and(ApiError::is_offline);
    if offline {
        format!("offline: {error}")
    } else {
        error.to_string()
    }
}
