use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono_tz::Tz;

use crate::quota::QuotaPolicy;
use crate::relay::PollerSettings;
use crate::upstream::{SessionLookup, DEFAULT_API_BASE_URL};

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub server_host: String,
    pub server_port: u16,
    pub data_dir: PathBuf,
    pub api_key: String,
    pub channel_ids: Vec<String>,
    pub api_base_url: String,
    pub upstream_timeout_secs: u64,
    pub poll_floor_ms: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub heartbeat_interval_secs: u64,
    pub quota_cache_ttl_secs: u64,
    pub quota_timezone: Tz,
    pub session_lookup: SessionLookup,
    pub monitoring_enabled: bool,
    pub autostart: bool,
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 8190,
            data_dir: PathBuf::from("data/relay"),
            api_key: String::new(),
            channel_ids: Vec::new(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            upstream_timeout_secs: 10,
            poll_floor_ms: 5_000,
            backoff_initial_ms: 5_000,
            backoff_max_ms: 30_000,
            heartbeat_interval_secs: 30,
            quota_cache_ttl_secs: 60,
            quota_timezone: chrono_tz::America::Los_Angeles,
            session_lookup: SessionLookup::Efficient,
            monitoring_enabled: true,
            autostart: false,
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Ok(host) = env::var("RELAY_HOST") {
            cfg.server_host = host;
        }
        if let Ok(port) = env::var("RELAY_PORT") {
            cfg.server_port = port.parse().context("RELAY_PORT must be a valid u16")?;
        }
        if let Ok(dir) = env::var("RELAY_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Ok(key) = env::var("YOUTUBE_API_KEY") {
            cfg.api_key = key.trim().to_string();
        }
        if let Ok(channels) = env::var("YOUTUBE_CHANNEL_ID") {
            cfg.channel_ids = parse_list(&channels);
        }
        if let Ok(url) = env::var("YOUTUBE_API_BASE_URL") {
            cfg.api_base_url = url;
        }
        cfg.upstream_timeout_secs = parse_u64("UPSTREAM_TIMEOUT_SECS", cfg.upstream_timeout_secs)?;
        cfg.poll_floor_ms = parse_u64("POLL_FLOOR_MS", cfg.poll_floor_ms)?;
        cfg.backoff_initial_ms = parse_u64("BACKOFF_INITIAL_MS", cfg.backoff_initial_ms)?;
        cfg.backoff_max_ms = parse_u64("BACKOFF_MAX_MS", cfg.backoff_max_ms)?;
        cfg.heartbeat_interval_secs =
            parse_u64("HEARTBEAT_INTERVAL_SECS", cfg.heartbeat_interval_secs)?;
        cfg.quota_cache_ttl_secs = parse_u64("QUOTA_CACHE_TTL_SECS", cfg.quota_cache_ttl_secs)?;
        if let Ok(tz) = env::var("QUOTA_TIMEZONE") {
            cfg.quota_timezone = tz
                .parse()
                .map_err(|err| anyhow::anyhow!("QUOTA_TIMEZONE is invalid: {err}"))?;
        }
        if let Ok(lookup) = env::var("SESSION_LOOKUP") {
            cfg.session_lookup = lookup
                .parse()
                .map_err(|err: String| anyhow::anyhow!("SESSION_LOOKUP is invalid: {err}"))?;
        }
        if let Ok(flag) = env::var("MONITORING_ENABLED") {
            cfg.monitoring_enabled = parse_bool(&flag)
                .with_context(|| format!("MONITORING_ENABLED is invalid: {flag}"))?;
        }
        if let Ok(flag) = env::var("RELAY_AUTOSTART") {
            cfg.autostart = parse_bool(&flag)
                .with_context(|| format!("RELAY_AUTOSTART is invalid: {flag}"))?;
        }
        if let Ok(level) = env::var("LOG_LEVEL") {
            cfg.log_level = level;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() {
            anyhow::bail!("YOUTUBE_API_KEY is required");
        }
        if self.channel_ids.is_empty() {
            anyhow::bail!("YOUTUBE_CHANNEL_ID is required");
        }
        if self.upstream_timeout_secs == 0 {
            anyhow::bail!("UPSTREAM_TIMEOUT_SECS must be greater than zero");
        }
        if self.poll_floor_ms == 0 {
            anyhow::bail!("POLL_FLOOR_MS must be greater than zero");
        }
        if self.backoff_initial_ms == 0 || self.backoff_max_ms < self.backoff_initial_ms {
            anyhow::bail!("BACKOFF_MAX_MS must be at least BACKOFF_INITIAL_MS, which must be non-zero");
        }
        if self.heartbeat_interval_secs == 0 {
            anyhow::bail!("HEARTBEAT_INTERVAL_SECS must be greater than zero");
        }

        ensure_directory(&self.data_dir)?;
        Ok(())
    }

    pub fn poller_settings(&self) -> PollerSettings {
        PollerSettings {
            poll_floor: Duration::from_millis(self.poll_floor_ms),
            backoff_initial: Duration::from_millis(self.backoff_initial_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
            lookup: self.session_lookup,
        }
    }

    pub fn quota_policy(&self) -> QuotaPolicy {
        QuotaPolicy {
            cache_ttl: Duration::from_secs(self.quota_cache_ttl_secs),
            ..QuotaPolicy::default()
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

fn ensure_directory(path: &Path) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            anyhow::bail!("{} exists but is not a directory", path.display());
        }
    } else {
        fs::create_dir_all(path)
            .with_context(|| format!("unable to create data directory {}", path.display()))?;
    }
    Ok(())
}

fn parse_u64(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a non-negative integer")),
        Err(_) => Ok(default),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => anyhow::bail!("invalid boolean value {value}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid(dir: &Path) -> RelayConfig {
        RelayConfig {
            api_key: "key".into(),
            channel_ids: vec!["UC1".into()],
            data_dir: dir.join("relay"),
            ..RelayConfig::default()
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.server_port, 8190);
        assert_eq!(cfg.poller_settings().poll_floor, Duration::from_secs(5));
        assert_eq!(cfg.quota_policy().cache_ttl, Duration::from_secs(60));
        assert_eq!(cfg.quota_timezone, chrono_tz::America::Los_Angeles);
        assert_eq!(cfg.session_lookup, SessionLookup::Efficient);
    }

    #[test]
    fn validate_requires_credentials_and_creates_data_dir() {
        let dir = tempfile::tempdir().unwrap();

        let missing_key = RelayConfig {
            api_key: String::new(),
            ..valid(dir.path())
        };
        assert!(missing_key.validate().is_err());

        let missing_channel = RelayConfig {
            channel_ids: Vec::new(),
            ..valid(dir.path())
        };
        assert!(missing_channel.validate().is_err());

        let cfg = valid(dir.path());
        cfg.validate().unwrap();
        assert!(cfg.data_dir.is_dir());
    }

    #[test]
    fn rejects_inverted_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = RelayConfig {
            backoff_initial_ms: 10_000,
            backoff_max_ms: 5_000,
            ..valid(dir.path())
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_channel_lists_and_flags() {
        assert_eq!(parse_list(" UC1, ,UC2 "), vec!["UC1", "UC2"]);
        assert!(parse_bool("Yes").unwrap());
        assert!(!parse_bool("0").unwrap());
        assert!(parse_bool("maybe").is_err());
    }
}
