//! User actions on the feed: local state changes first, server second.
//!
//! Read state belongs to this client. Every action updates the durable read
//! set and the published snapshot before returning; acknowledging the alert on
//! the server is best effort and its outcome never changes what the UI shows.

use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{NotificationsSnapshot, ReadIdSet};
use crate::api::AlertsApi;

#[derive(Clone)]
pub struct ActionCoordinator {
    api: Arc<dyn AlertsApi>,
    read_ids: Arc<Mutex<ReadIdSet>>,
    state: Arc<watch::Sender<NotificationsSnapshot>>,
}

impl ActionCoordinator {
    pub fn new(
        api: Arc<dyn AlertsApi>,
        read_ids: Arc<Mutex<ReadIdSet>>,
        state: Arc<watch::Sender<NotificationsSnapshot>>,
    ) -> Self {
        Self {
            api,
            read_ids,
            state,
        }
    }

    /// Mark one notification read and acknowledge its alert in the background.
    ///
    /// Returns the background acknowledgment, if one was started. Callers are
    /// free to drop it.
    pub fn mark_as_read(&self, id: &str) -> Option<JoinHandle<()>> {
        let alert_id = self.mark_locally(id, false);
        alert_id.map(|alert_id| self.spawn_acknowledge(alert_id))
    }

    /// Mark every notification read, then wait for all acknowledgments to settle.
    ///
    /// Returns the number of acknowledgments attempted.
    pub async fn mark_all_as_read(&self) -> usize {
        let mut ids = Vec::new();
        let mut alert_ids = Vec::new();
        self.state.send_modify(|snapshot| {
            for n in &mut snapshot.notifications {
                if !n.read
                    && let Some(alert_id) = n.alert_id()
                {
                    alert_ids.push(alert_id);
                }
                n.read = true;
                ids.push(n.id.clone());
            }
            snapshot.recount();
        });
        self.read_ids
            .lock()
            .unwrap()
            .insert_all(ids.iter().map(String::as_str));

        info!(
            notifications = ids.len(),
            acknowledgments = alert_ids.len(),
            "all notifications marked read"
        );

        let attempts = alert_ids.len();
        join_all(alert_ids.into_iter().map(|alert_id| {
            let api = Arc::clone(&self.api);
            async move { acknowledge(api.as_ref(), alert_id).await }
        }))
        .await;
        attempts
    }

    /// Mark read and drop the notification from the feed.
    ///
    /// The id stays in the read set, so a later fetch brings it back as read.
    pub fn clear(&self, id: &str) -> Option<JoinHandle<()>> {
        let alert_id = self.mark_locally(id, true);
        alert_id.map(|alert_id| self.spawn_acknowledge(alert_id))
    }

    /// Apply the local half of an action. Returns the alert to acknowledge.
    fn mark_locally(&self, id: &str, remove: bool) -> Option<i64> {
        self.read_ids.lock().unwrap().insert(id);

        let mut alert_id = None;
        self.state.send_modify(|snapshot| {
            if let Some(pos) = snapshot.notifications.iter().position(|n| n.id == id) {
                alert_id = snapshot.notifications[pos].alert_id();
                if remove {
                    snapshot.notifications.remove(pos);
                } else {
                    snapshot.notifications[pos].read = true;
                }
            }
            snapshot.recount();
        });

        if alert_id.is_none() {
            debug!(id, "no alert to acknowledge for notification");
        }
        alert_id
    }

    fn spawn_acknowledge(&self, alert_id: i64) -> JoinHandle<()> {
        let api = Arc::clone(&self.api);
        tokio::spawn(async move { acknowledge(api.as_ref(), alert_id).await })
    }
}

async fn acknowledge(api: &dyn AlertsApi, alert_id: i64) {
    if let Err(e) = api.acknowledge_alert(alert_id).await {
        warn!(
            alert_id,
            offline = e.is_offline(),
            error = ?e,
            "failed to acknowledge alert, keeping local read state"
        );
    }
}
