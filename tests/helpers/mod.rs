#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use starscope_sync::api::{Alert, AlertsApi, ApiError};
use tokio::sync::Notify;

const FAKE_URL: &str = "http://127.0.0.1:8008/api/alerts/triggered";

/// Build a triggered alert for `repo_name`. Higher ids fire later.
pub fn make_alert(id: i64, repo_name: &str) -> Alert {
    Alert {
        id,
        rule_id: 1,
        rule_name: "Star spike".to_owned(),
        repo_id: 100 + id,
        repo_name: repo_name.to_owned(),
        signal_type: "stars_delta_7d".to_owned(),
        signal_value: 250.0,
        threshold: 100.0,
        operator: ">".to_owned(),
        triggered_at: Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
            + chrono::Duration::minutes(id),
        acknowledged: false,
        acknowledged_at: None,
    }
}

/// In-memory sidecar. Records every call and can be told to fail.
#[derive(Default)]
pub struct FakeAlertsApi {
    alerts: Mutex<Vec<Alert>>,
    offline: AtomicBool,
    failing_acks: Mutex<HashSet<i64>>,
    ack_attempts: Mutex<Vec<i64>>,
    fetches: AtomicUsize,
    fetch_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeAlertsApi {
    pub fn with_alerts(alerts: Vec<Alert>) -> Self {
        let api = Self::default();
        api.set_alerts(alerts);
        api
    }

    pub fn set_alerts(&self, alerts: Vec<Alert>) {
        *self.alerts.lock().unwrap() = alerts;
    }

    /// Make fetches fail with a 503 until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fail_acknowledge(&self, alert_id: i64) {
        self.failing_acks.lock().unwrap().insert(alert_id);
    }

    /// Alert ids acknowledged so far, failed attempts included, sorted.
    pub fn ack_attempts(&self) -> Vec<i64> {
        let mut attempts = self.ack_attempts.lock().unwrap().clone();
        attempts.sort_unstable();
        attempts
    }

    /// Hold every fetch until the returned gate is notified, once per fetch.
    pub fn gate_fetches(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.fetch_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AlertsApi for FakeAlertsApi {
    async fn fetch_alerts(&self, _include_acknowledged: bool, limit: u32) -> Result<Vec<Alert>, ApiError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let gate = self.fetch_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: 503,
                url: FAKE_URL.to_owned(),
            });
        }
        let alerts = self.alerts.lock().unwrap();
        Ok(alerts.iter().take(limit as usize).cloned().collect())
    }

    async fn acknowledge_alert(&self, alert_id: i64) -> Result<(), ApiError> {
        self.ack_attempts.lock().unwrap().push(alert_id);
        if self.failing_acks.lock().unwrap().contains(&alert_id) {
            return Err(ApiError::Status {
                status: 500,
                url: format!("http://127.0.0.1:8008/api/alerts/triggered/{alert_id}/acknowledge"),
            });
        }
        let mut alerts = self.alerts.lock().unwrap();
        if let Some(alert) = alerts.iter_mut().find(|a| a.id == alert_id) {
            alert.acknowledged = true;
            alert.acknowledged_at = Some(Utc::now());
        }
        Ok(())
    }
}
