use std::{net::SocketAddr, str::FromStr, time::Duration};

use crate::{
    error::{AppErr, AppResult},
    live::{LiveConfig, PlayerConfig},
    ondemand::OnDemandConfig,
};

/* ------------ 環境變數設定（先讀 .env） ------------ */
#[derive(Debug, Clone)]
pub struct Config {
    pub store_url: String,
    pub store_token: String,
    pub bind_addr: SocketAddr,
    pub public_url: String,
    pub body_limit: usize,
    pub live: LiveConfig,
    pub player: PlayerConfig,
    pub ondemand: OnDemandConfig,
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let required = |k: &str| get(k).filter(|v| !v.trim().is_empty()).ok_or_else(|| AppErr::Config(format!("{k} is not set")));
        let or = |k: &str, default: &str| get(k).unwrap_or_else(|| default.to_string());

        let live = LiveConfig { cycle: millis(&or("LIVE_CYCLE_MS", "500"), "LIVE_CYCLE_MS")?, ..LiveConfig::default() };
        let player = PlayerConfig {
            poll_every: millis(&or("LIVE_POLL_MS", "600"), "LIVE_POLL_MS")?,
            backlog_threshold: value(&or("LIVE_BACKLOG", "2"), "LIVE_BACKLOG")?,
        };
        let seek_threshold: f64 = value(&or("SEEK_THRESHOLD", "0.2"), "SEEK_THRESHOLD")?;
        if !seek_threshold.is_finite() || seek_threshold < 0.0 {
            return Err(AppErr::Config(format!("SEEK_THRESHOLD must be a non-negative number, got {seek_threshold}")));
        }
        let ondemand = OnDemandConfig {
            poll_every: millis(&or("ONDEMAND_POLL_MS", "1000"), "ONDEMAND_POLL_MS")?,
            seek_threshold,
            ..OnDemandConfig::default()
        };
        let body_mb: usize = value(&or("BODY_LIMIT_MB", "100"), "BODY_LIMIT_MB")?;
        let body_limit = body_mb
            .checked_mul(1024 * 1024)
            .ok_or_else(|| AppErr::Config(format!("BODY_LIMIT_MB={body_mb} is too large")))?;

        Ok(Self {
            store_url: required("STORE_REST_URL")?,
            store_token: required("STORE_REST_TOKEN")?,
            bind_addr: value(&or("BIND_ADDR", "127.0.0.1:3000"), "BIND_ADDR")?,
            public_url: or("PUBLIC_URL", "http://localhost:5173"),
            body_limit,
            live,
            player,
            ondemand,
        })
    }
}

fn value<T: FromStr>(raw: &str, key: &str) -> AppResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e| AppErr::Config(format!("{key}={raw:?}: {e}")))
}

fn millis(raw: &str, key: &str) -> AppResult<Duration> {
    let ms: u64 = value(raw, key)?;
    if ms == 0 {
        return Err(AppErr::Config(format!("{key} must be greater than 0")));
    }
    Ok(Duration::from_millis(ms))
}
