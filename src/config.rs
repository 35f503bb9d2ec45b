use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Per-tenant engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Longest wait for an item's lock before the call fails with a storage error.
    pub lock_timeout: Duration,
    /// WAL appends since the last compaction that trigger a new one.
    pub compact_threshold: u64,
    /// How often the background archiver looks for finished borrows.
    pub archive_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            compact_threshold: 1000,
            archive_interval: Duration::from_secs(3600),
        }
    }
}

/// Process-level settings, read from `BORROWD_*` environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
    pub engine: EngineConfig,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = EngineConfig::default();
        Self {
            bind: env_or("BORROWD_BIND", "0.0.0.0".to_string()),
            port: env_or("BORROWD_PORT", 5433),
            data_dir: PathBuf::from(env_or("BORROWD_DATA_DIR", "./data".to_string())),
            password: env_or("BORROWD_PASSWORD", "borrowd".to_string()),
            max_connections: env_or("BORROWD_MAX_CONNECTIONS", 256),
            tls_cert: std::env::var("BORROWD_TLS_CERT").ok(),
            tls_key: std::env::var("BORROWD_TLS_KEY").ok(),
            metrics_port: env_parse("BORROWD_METRICS_PORT"),
            engine: EngineConfig {
                lock_timeout: env_parse("BORROWD_LOCK_TIMEOUT_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.lock_timeout),
                compact_threshold: env_or("BORROWD_COMPACT_THRESHOLD", defaults.compact_threshold),
                archive_interval: env_parse("BORROWD_ARCHIVE_INTERVAL_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.archive_interval),
            },
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env_parse(key).unwrap_or(default)
}
