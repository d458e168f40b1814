//! Runtime configuration: defaults, an optional TOML file, then the environment.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use fundu::DurationParser;
use serde::{Deserialize, Deserializer, Serialize};

use crate::cache::{CacheConfig, DEFAULT_MAX_SIZE, DEFAULT_TTL};
use crate::notifications::NotificationConfig;
use crate::scheduler::DEFAULT_POLL_INTERVAL;

/// Optional config file, looked up in the working directory.
pub const CONFIG_FILE: &str = "starscope-sync.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub log_level: String,
    pub api_base_url: String,
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub poll_interval: Duration,
    pub alert_limit: u32,
    pub cache_max_size: usize,
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub cache_ttl: Duration,
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub request_timeout: Duration,
    pub read_state_path: PathBuf,
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            api_base_url: "http://127.0.0.1:8008".to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            alert_limit: 50,
            cache_max_size: DEFAULT_MAX_SIZE,
            cache_ttl: DEFAULT_TTL,
            request_timeout: Duration::from_secs(10),
            read_state_path: PathBuf::from("starscope-read-notifications.json"),
            shutdown_timeout: Duration::from_secs(8),
        }
    }
}

impl Config {
    /// Defaults, then `starscope-sync.toml` if present, then environment
    /// variables (`POLL_INTERVAL`, `API_BASE_URL`, ...).
    pub fn load() -> anyhow::Result<Self> {
        Self::figment()
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::raw().only(&Self::KEYS))
            .extract()
            .context("Failed to load config")
    }

    const KEYS: [&'static str; 9] = [
        "log_level",
        "api_base_url",
        "poll_interval",
        "alert_limit",
        "cache_max_size",
        "cache_ttl",
        "request_timeout",
        "read_state_path",
        "shutdown_timeout",
    ];

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
    }

    pub fn cache(&self) -> CacheConfig {
        CacheConfig {
            max_size: self.cache_max_size,
            default_ttl: self.cache_ttl,
        }
    }

    pub fn notifications(&self) -> NotificationConfig {
        NotificationConfig {
            poll_interval: self.poll_interval,
            alert_limit: self.alert_limit,
            cache_ttl: Some(self.cache_ttl),
        }
    }
}

/// Parse a human duration such as `90s`, `2m` or `1.5h`. Bare numbers are seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let parsed = DurationParser::with_all_time_units()
        .parse(raw.trim())
        .map_err(|e| format!("invalid duration `{raw}`: {e}"))?;
    Duration::try_from(parsed).map_err(|e| format!("invalid duration `{raw}`: {e}"))
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&format!("{}ms", duration.as_millis()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_human_durations() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1500ms").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn defaults_round_trip_through_figment() {
        let config: Config = Config::figment().extract().unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.cache_ttl, Duration::from_secs(30));
        assert_eq!(config.cache_max_size, 200);
        assert_eq!(config.alert_limit, 50);
    }

    #[test]
    fn environment_overrides_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("POLL_INTERVAL", "2m");
            jail.set_env("CACHE_TTL", "15");
            jail.set_env("ALERT_LIMIT", "20");
            jail.set_env("API_BASE_URL", "http://localhost:9000");

            let config = Config::load().map_err(|e| e.to_string())?;
            assert_eq!(config.poll_interval, Duration::from_secs(120));
            assert_eq!(config.cache_ttl, Duration::from_secs(15));
            assert_eq!(config.alert_limit, 20);
            assert_eq!(config.api_base_url, "http://localhost:9000");
            assert_eq!(config.notifications().cache_ttl, Some(Duration::from_secs(15)));
            Ok(())
        });
    }

    #[test]
    fn environment_wins_over_config_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE,
                r#"
                poll_interval = "5m"
                alert_limit = 10
                "#,
            )?;
            jail.set_env("ALERT_LIMIT", "30");

            let config = Config::load().map_err(|e| e.to_string())?;
            assert_eq!(config.poll_interval, Duration::from_secs(300));
            assert_eq!(config.alert_limit, 30);
            Ok(())
        });
    }
}
