//! `HttpAlertsClient` against a canned local HTTP responder.

use std::time::Duration;

use starscope_sync::api::{AlertsApi, ApiError, HttpAlertsClient};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const ALERTS_BODY: &str = r#"[
  {
    "id": 7,
    "rule_id": 2,
    "rule_name": "Breakout",
    "repo_id": 31,
    "repo_name": "astral-sh/uv",
    "signal_type": "velocity",
    "signal_value": 412.5,
    "threshold": 300.0,
    "operator": ">",
    "triggered_at": "2026-03-14T09:26:53.589793",
    "acknowledged": false,
    "acknowledged_at": null
  }
]"#;

/// Answer exactly one request with `status` and `body`; resolves to the request head.
async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 8192];
        let mut read = 0;
        loop {
            let n = socket.read(&mut buf[read..]).await.unwrap();
            read += n;
            if n == 0 || buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
        String::from_utf8_lossy(&buf[..read]).into_owned()
    });

    (base_url, handle)
}

fn client(base_url: &str) -> HttpAlertsClient {
    HttpAlertsClient::new(base_url, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn fetch_alerts_decodes_naive_timestamps() {
    let (base_url, server) = serve_once("200 OK", ALERTS_BODY).await;

    let alerts = client(&base_url).fetch_alerts(true, 25).await.unwrap();

    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].id, 7);
    assert_eq!(alerts[0].repo_name, "astral-sh/uv");
    assert_eq!(
        alerts[0].triggered_at.to_rfc3339(),
        "2026-03-14T09:26:53.589793+00:00"
    );
    assert_eq!(alerts[0].acknowledged_at, None);

    let request = server.await.unwrap();
    assert!(
        request.starts_with("GET /api/alerts/triggered?unacknowledged_only=false&limit=25 "),
        "{request}"
    );
}

#[tokio::test]
async fn acknowledge_posts_to_the_alert() {
    let (base_url, server) = serve_once("200 OK", r#"{"status":"acknowledged"}"#).await;

    client(&base_url).acknowledge_alert(7).await.unwrap();

    let request = server.await.unwrap();
    assert!(
        request.starts_with("POST /api/alerts/triggered/7/acknowledge "),
        "{request}"
    );
}

#[tokio::test]
async fn not_found_is_not_offline() {
    let (base_url, _server) = serve_once("404 Not Found", r#"{"detail":"Alert not found"}"#).await;

    let err = client(&base_url).acknowledge_alert(99).await.unwrap_err();

    assert_eq!(err.status(), Some(404));
    assert!(!err.is_offline());
}

#[tokio::test]
async fn server_error_is_offline() {
    let (base_url, _server) = serve_once("503 Service Unavailable", "{}").await;

    let err = client(&base_url).fetch_alerts(true, 50).await.unwrap_err();

    assert!(err.is_offline());
}

#[tokio::test]
async fn malformed_body_reports_parse_failure() {
    let (base_url, _server) = serve_once("200 OK", r#"[{"id": "seven"}]"#).await;

    let err = client(&base_url).fetch_alerts(true, 50).await.unwrap_err();

    assert!(matches!(err, ApiError::ParseFailed { .. }), "{err:?}");
    assert!(!err.is_offline());
}
