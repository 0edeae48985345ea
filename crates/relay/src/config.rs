// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. The room grace period has no default: how long an empty room
// survives decides whether stragglers rejoin the old drawing or a blank one,
// so every deployment has to choose it.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::reconciler::MergeStrategy;

const GRACE_ENV: &str = "SKETCHSYNC_RELAY_ROOM_GRACE";

/// Grace preset for single-use sketching sessions.
pub const EPHEMERAL_ROOM_GRACE: Duration = Duration::from_secs(30);
/// Grace preset for long-lived document rooms.
pub const DOCUMENT_ROOM_GRACE: Duration = Duration::from_secs(24 * 60 * 60);

const DEFAULT_PORT: u16 = 3002;
const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(60 * 60);
const DEFAULT_VOLATILE_BUFFER: usize = 64;
const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{GRACE_ENV} must be set (seconds, `ephemeral` or `document`)")]
    MissingRoomGrace,

    #[error("invalid value `{value}` for {key}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// How long a room with no members is kept before the reaper may drop it.
    pub room_grace_period: Duration,
    /// Time between reaper sweeps.
    pub reaper_interval: Duration,
    /// Per-connection number of senders whose latest cursor can be pending.
    pub volatile_buffer: usize,
    /// Largest accepted WebSocket frame.
    pub max_frame_bytes: usize,
    /// How accepted element lists are combined with the stored ones.
    pub merge_strategy: MergeStrategy,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `sketchsync_relay=debug`).
    pub log_filter: String,
    pub log_format: LogFormat,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `SKETCHSYNC_RELAY_HOST` | `0.0.0.0` |
    /// | `SKETCHSYNC_RELAY_PORT` | `3002` |
    /// | `SKETCHSYNC_RELAY_ROOM_GRACE` | *(required)* |
    /// | `SKETCHSYNC_RELAY_REAPER_INTERVAL_SECS` | `3600` |
    /// | `SKETCHSYNC_RELAY_VOLATILE_BUFFER` | `64` |
    /// | `SKETCHSYNC_RELAY_MAX_FRAME_BYTES` | `4194304` |
    /// | `SKETCHSYNC_RELAY_MERGE` | `replace` |
    /// | `SKETCHSYNC_RELAY_CORS_ORIGINS` | *(none, cors.rs uses dev defaults)* |
    /// | `SKETCHSYNC_RELAY_LOG_FILTER` | `info` |
    /// | `SKETCHSYNC_RELAY_LOG_FORMAT` | `pretty` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("SKETCHSYNC_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("SKETCHSYNC_RELAY_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let room_grace_period = match env(GRACE_ENV) {
            Ok(raw) => parse_room_grace(&raw)?,
            Err(_) => return Err(ConfigError::MissingRoomGrace),
        };

        let reaper_interval = env("SKETCHSYNC_RELAY_REAPER_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REAPER_INTERVAL);

        let volatile_buffer = env("SKETCHSYNC_RELAY_VOLATILE_BUFFER")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_VOLATILE_BUFFER);

        let max_frame_bytes = env("SKETCHSYNC_RELAY_MAX_FRAME_BYTES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_MAX_FRAME_BYTES);

        let merge_strategy = match env("SKETCHSYNC_RELAY_MERGE").ok().as_deref() {
            Some("element") => MergeStrategy::PerElement,
            _ => MergeStrategy::ReplaceAll,
        };

        let cors_origins = env("SKETCHSYNC_RELAY_CORS_ORIGINS").ok();
        let log_filter = env("SKETCHSYNC_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_format = match env("SKETCHSYNC_RELAY_LOG_FORMAT").ok().as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            listen_addr,
            room_grace_period,
            reaper_interval,
            volatile_buffer,
            max_frame_bytes,
            merge_strategy,
            cors_origins,
            log_filter,
            log_format,
        })
    }
}

fn parse_room_grace(raw: &str) -> Result<Duration, ConfigError> {
    match raw.trim() {
        "ephemeral" => Ok(EPHEMERAL_ROOM_GRACE),
        "document" => Ok(DOCUMENT_ROOM_GRACE),
        secs => secs
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidValue { key: GRACE_ENV, value: raw.to_string() }),
    }
}
