use crate::service::health_service::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_INTERVAL_MS};
use std::env;
use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackend {
    Redis,
    Memory,
}

impl QueueBackend {
    pub fn parse(v: &str) -> Result<Self, String> {
        match v.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("invalid QUEUE_BACKEND: {other}")),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Redis => "redis",
            Self::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub rust_env: String,
    pub api_host: String,
    pub api_port: u16,
    pub queue_backend: QueueBackend,
    pub redis_host: String,
    pub redis_port: u16,
    pub queue_name: String,
    pub queue_prefix: String,
    pub private_key: Option<String>,
    pub probe_window_ms: u64,
    pub redis_ready_max_retries: u32,
    pub redis_ready_interval_ms: u64,
    pub job_watch_interval_ms: u64,
    pub cors_allowed_origins: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        load_dotenv_layers();
        let queue_backend = QueueBackend::parse(&read_optional_string("QUEUE_BACKEND", "redis"))?;
        let (redis_host, redis_port) = match queue_backend {
            QueueBackend::Redis => (
                read_var("REDIS_HOST")?,
                read_var("REDIS_PORT")?
                    .parse::<u16>()
                    .map_err(|e| format!("invalid REDIS_PORT: {e}"))?,
            ),
            QueueBackend::Memory => (
                read_optional_string("REDIS_HOST", "127.0.0.1"),
                read_optional("REDIS_PORT", 6379u16)?,
            ),
        };

        Ok(Self {
            rust_env: read_var("RUST_ENV")?,
            api_host: read_var("API_HOST")?,
            api_port: read_var("API_PORT")?
                .parse::<u16>()
                .map_err(|e| format!("invalid API_PORT: {e}"))?,
            queue_backend,
            redis_host,
            redis_port,
            queue_name: read_optional_string("QUEUE_NAME", "execute"),
            queue_prefix: read_optional_string("QUEUE_PREFIX", "bull"),
            private_key: env::var("PRIVATE_KEY").ok(),
            probe_window_ms: read_optional("PROBE_WINDOW_MS", 1000u64)?,
            redis_ready_max_retries: read_optional("REDIS_READY_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            redis_ready_interval_ms: read_optional(
                "REDIS_READY_INTERVAL_MS",
                DEFAULT_RETRY_INTERVAL_MS,
            )?,
            job_watch_interval_ms: read_optional("JOB_WATCH_INTERVAL_MS", 500u64)?.max(1),
            cors_allowed_origins: read_optional_list(
                "CORS_ALLOWED_ORIGINS",
                "http://localhost:3000,http://127.0.0.1:3000",
            ),
        })
    }
}

fn read_var(key: &str) -> Result<String, String> {
    env::var(key).map_err(|_| format!("missing required env var: {key}"))
}

fn read_optional<T>(key: &str, default: T) -> Result<T, String>
where
    T: FromStr,
    T::Err: Display,
{
    parse_optional(key, env::var(key).ok(), default)
}

fn parse_optional<T>(key: &str, raw: Option<String>, default: T) -> Result<T, String>
where
    T: FromStr,
    T::Err: Display,
{
    match raw {
        Some(v) => v.trim().parse::<T>().map_err(|e| format!("invalid {key}: {e}")),
        None => Ok(default),
    }
}

fn read_optional_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn read_optional_list(key: &str, default: &str) -> Vec<String> {
    read_optional_string(key, default)
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn load_dotenv_layers() {
    for path in [".env", "../.env", "../../.env"] {
        let _ = dotenvy::from_path_override(path);
    }
}
