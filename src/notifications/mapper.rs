//! Alert → notification mapping, ordering, and the read-preserving merge.

use std::collections::{BTreeMap, HashSet};

use super::{Notification, NotificationKind, NotificationLink, NotificationMetadata, ReadIdSet};
use crate::api::Alert;
use crate::api::models::signal_label;

const ALERT_ID_PREFIX: &str = "alert-";

/// Notification id for a server alert. The same alert always maps to the same id.
pub fn alert_notification_id(alert_id: i64) -> String {
    format!("{ALERT_ID_PREFIX}{alert_id}")
}

/// Build the notification for one alert.
///
/// It starts out read if the user already read it locally or the server has
/// it acknowledged.
pub fn map_alert(alert: &Alert, read_ids: &ReadIdSet) -> Notification {
    let id = alert_notification_id(alert.id);
    let read = read_ids.contains(&id) || alert.acknowledged_at.is_some();

    let message = format!(
        "{}: {} {} {} (now {})",
        alert.repo_name,
        signal_label(&alert.signal_type),
        alert.operator,
        alert.threshold,
        alert.signal_value,
    );

    Notification {
        id,
        kind: NotificationKind::Alert,
        title: alert.rule_name.clone(),
        message,
        timestamp: alert.triggered_at,
        read,
        link: Some(NotificationLink {
            page: "watchlist".to_string(),
            params: BTreeMap::from([("repo".to_string(), alert.repo_name.clone())]),
        }),
        metadata: Some(NotificationMetadata {
            alert_id: Some(alert.id),
            repo_name: Some(alert.repo_name.clone()),
            signal_type: Some(alert.signal_type.clone()),
        }),
    }
}

/// Map a batch of alerts and order them newest first.
pub fn map_alerts(alerts: &[Alert], read_ids: &ReadIdSet) -> Vec<Notification> {
    let mut notifications: Vec<Notification> =
        alerts.iter().map(|alert| map_alert(alert, read_ids)).collect();
    sort_notifications(&mut notifications);
    notifications
}

/// Newest first; equal timestamps keep their input order.
pub fn sort_notifications(notifications: &mut [Notification]) {
    notifications.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

/// Reconcile a freshly fetched list against the one currently shown.
///
/// The fresh list decides membership and order. Anything that was read in
/// `previous` stays read, whatever the fresh payload claims.
pub fn merge_notifications(previous: &[Notification], fresh: Vec<Notification>) -> Vec<Notification> {
    let already_read: HashSet<&str> = previous
        .iter()
        .filter(|n| n.read)
        .map(|n| n.id.as_str())
        .collect();

    fresh
        .into_iter()
        .map(|mut n| {
            if already_read.contains(n.id.as_str()) {
                n.read = true;
            }
            n
        })
        .collect()
}
