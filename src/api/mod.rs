//! Client for the StarScope sidecar's alert endpoints.

pub mod errors;
pub mod json;
pub mod models;

pub use errors::ApiError;
pub use models::Alert;

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

use crate::utils::log_if_slow;

const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_secs(2);

/// The alert operations the notification engine needs from the backend.
#[async_trait]
pub trait AlertsApi: Send + Sync {
    /// List triggered alerts, newest first.
    async fn fetch_alerts(&self, include_acknowledged: bool, limit: u32) -> Result<Vec<Alert>, ApiError>;

    /// Mark one triggered alert as acknowledged on the server.
    async fn acknowledge_alert(&self, alert_id: i64) -> Result<(), ApiError>;
}

/// reqwest-backed [`AlertsApi`] talking to the local sidecar.
pub struct HttpAlertsClient {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpAlertsClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            // The sidecar runs next to us; never route it through a proxy.
            .no_proxy()
            .user_agent(concat!("starscope-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| ApiError::Transport {
                url: base_url.to_owned(),
                source,
            })?;
        Self::with_client(http, base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: &str) -> Result<Self, ApiError> {
        let mut base_url = Url::parse(base_url)?;
        // Keep any path prefix when joining endpoint paths.
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn triggered_url(&self, include_acknowledged: bool, limit: u32) -> Result<Url, ApiError> {
        let mut url = self.base_url.join("api/alerts/triggered")?;
        url.query_pairs_mut()
            .append_pair("unacknowledged_only", if include_acknowledged { "false" } else { "true" })
            .append_pair("limit", &limit.to_string());
        Ok(url)
    }

    fn acknowledge_url(&self, alert_id: i64) -> Result<Url, ApiError> {
        Ok(self
            .base_url
            .join(&format!("api/alerts/triggered/{alert_id}/acknowledge"))?)
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &Url) -> Result<String, ApiError> {
        let start = std::time::Instant::now();
        let transport = |source| ApiError::Transport {
            url: url.to_string(),
            source,
        };

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        log_if_slow(start, SLOW_REQUEST_THRESHOLD, url.path());

        if !status.is_success() {
            debug!(url = %url, status = status.as_u16(), body = %body, "sidecar request failed");
            return Err(ApiError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl AlertsApi for HttpAlertsClient {
    async fn fetch_alerts(&self, include_acknowledged: bool, limit: u32) -> Result<Vec<Alert>, ApiError> {
        let url = self.triggered_url(include_acknowledged, limit)?;
        let body = self.send(self.http.get(url.clone()), &url).await?;
        let alerts: Vec<Alert> = json::decode_json(&body).map_err(|source| ApiError::ParseFailed {
            url: url.to_string(),
            source,
        })?;
        trace!(count = alerts.len(), "fetched triggered alerts");
        Ok(alerts)
    }

    async fn acknowledge_alert(&self, alert_id: i64) -> Result<(), ApiError> {
        let url = self.acknowledge_url(alert_id)?;
        self.send(self.http.post(url.clone()), &url).await?;
        debug!(alert_id, "alert acknowledged");
        Ok(())
    }
}
