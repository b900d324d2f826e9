//! Feed session configuration.

use crate::{
    instrument::InstrumentRegistry, pagination::PaginationConfig, throttle::FlushConfig,
};
use std::time::Duration;
use tracing::warn;

pub const ENV_WS_URL: &str = "LVTRADE_WS_URL";
pub const ENV_HTTP_URL: &str = "LVTRADE_HTTP_URL";
pub const ENV_HISTORY_LIMIT: &str = "LVTRADE_HISTORY_LIMIT";
pub const ENV_PING_SECS: &str = "LVTRADE_PING_SECS";

/// Configuration shared by every session a [`FeedManager`](crate::session::FeedManager)
/// opens.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Authenticated event stream endpoint.
    pub ws_url: String,
    /// Base URL of the REST api serving `/v1/market/candles`.
    pub http_url: String,
    /// Bars requested by the initial load.
    pub history_limit: usize,
    /// Ping interval to keep the connection alive.
    pub ping_interval: Duration,
    /// Capacity of the session command channel.
    pub command_buffer_size: usize,
    pub flush: FlushConfig,
    pub pagination: PaginationConfig,
    pub instruments: InstrumentRegistry,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:8080/v1/ws".to_string(),
            http_url: "http://127.0.0.1:8080".to_string(),
            history_limit: 600,
            ping_interval: Duration::from_secs(30),
            command_buffer_size: 64,
            flush: FlushConfig::default(),
            pagination: PaginationConfig::default(),
            instruments: InstrumentRegistry::default(),
        }
    }
}

impl FeedConfig {
    pub fn new(ws_url: impl Into<String>, http_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            http_url: http_url.into(),
            ..Default::default()
        }
    }

    /// Defaults overridden by `LVTRADE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the `LVTRADE_*` keys.
    ///
    /// Unparseable numeric values are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = non_empty(lookup(ENV_WS_URL)) {
            config.ws_url = url;
        }
        if let Some(url) = non_empty(lookup(ENV_HTTP_URL)) {
            config.http_url = url;
        }
        if let Some(limit) = parse_var::<usize>(ENV_HISTORY_LIMIT, lookup(ENV_HISTORY_LIMIT)) {
            config.history_limit = limit.max(1);
        }
        if let Some(secs) = parse_var::<u64>(ENV_PING_SECS, lookup(ENV_PING_SECS)) {
            config.ping_interval = Duration::from_secs(secs.max(1));
        }

        config
    }

    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into();
        self
    }

    pub fn with_http_url(mut self, url: impl Into<String>) -> Self {
        self.http_url = url.into();
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_command_buffer_size(mut self, size: usize) -> Self {
        self.command_buffer_size = size.max(1);
        self
    }

    pub fn with_flush(mut self, flush: FlushConfig) -> Self {
        self.flush = flush;
        self
    }

    pub fn with_pagination(mut self, pagination: PaginationConfig) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn with_instruments(mut self, instruments: InstrumentRegistry) -> Self {
        self.instruments = instruments;
        self
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_var<T>(key: &str, value: Option<String>) -> Option<T>
where
    T: std::str::FromStr,
{
    let value = non_empty(value)?;
    match value.parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(key, value = %value, "ignoring unparseable environment variable");
            None
        }
    }
}
