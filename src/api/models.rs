//! Wire types returned by the sidecar alerts endpoints.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A triggered alert: an alert rule that fired for one repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub rule_id: i64,
    pub rule_name: String,
    pub repo_id: i64,
    pub repo_name: String,
    pub signal_type: String,
    pub signal_value: f64,
    pub threshold: f64,
    pub operator: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub triggered_at: DateTime<Utc>,
    #[serde(default)]
    pub acknowledged: bool,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub acknowledged_at: Option<DateTime<Utc>>,
}

/// Human label for a sidecar signal type; unknown types pass through verbatim.
pub fn signal_label(signal_type: &str) -> &str {
    match signal_type {
        "stars_delta_7d" => "7-day star change",
        "stars_delta_30d" => "30-day star change",
        "velocity" => "star velocity",
        "acceleration" => "star acceleration",
        "trend" => "trend",
        other => other,
    }
}

/// Parse RFC 3339, falling back to a naive ISO-8601 timestamp taken as UTC.
///
/// The sidecar stores naive UTC datetimes, so most payloads carry no offset.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.to_utc());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp `{raw}`")))
}

fn deserialize_optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp `{raw}`"))),
    }
}
