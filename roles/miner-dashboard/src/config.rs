use serde::Deserialize;
use std::{env, fs, path::PathBuf, time::Duration};

use miner_stats::pool::DEFAULT_POOL;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub http_address: String,
    pub static_dir: PathBuf,
    pub db_path: PathBuf,
    pub retention_days: u64,
    pub cache_ttl_secs: u64,
    pub request_timeout_secs: u64,
    pub pool_idle_timeout_secs: u64,
    pub default_pool: String,
    pub log_file: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DashboardConfig {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    storage: StorageConfig,
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default)]
    http_client: HttpClientConfig,
    #[serde(default)]
    pool: PoolConfig,
}

#[derive(Debug, Deserialize)]
struct ServerConfig {
    listen_address: Option<String>,
    static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: Some("0.0.0.0:8000".to_string()),
            static_dir: Some(PathBuf::from("static")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StorageConfig {
    db_path: Option<PathBuf>,
    retention_days: Option<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: Some(PathBuf::from("miner_history.db")),
            retention_days: Some(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CacheConfig {
    ttl_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: Some(5) }
    }
}

#[derive(Debug, Deserialize)]
struct HttpClientConfig {
    pool_idle_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            pool_idle_timeout_secs: Some(300),
            request_timeout_secs: Some(18),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PoolConfig {
    default_pool: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            default_pool: Some(DEFAULT_POOL.to_string()),
        }
    }
}

/// Value following `long` or `short` on the command line.
fn flag_value(args: &[String], long: &str, short: &str) -> Option<String> {
    args.iter()
        .position(|arg| arg == long || arg == short)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

impl Config {
    pub fn from_args() -> Result<Self, Box<dyn std::error::Error>> {
        let args: Vec<String> = env::args().collect();
        Self::from_arg_list(&args)
    }

    pub fn from_arg_list(args: &[String]) -> Result<Self, Box<dyn std::error::Error>> {
        // Extract log file if provided (for tracing setup in main)
        let log_file = flag_value(args, "--log-file", "-f");

        // A missing or empty config file means defaults everywhere
        let config_str = flag_value(args, "--config", "-c")
            .map(|path| fs::read_to_string(path).unwrap_or_default())
            .unwrap_or_default();
        let file_config: DashboardConfig = if config_str.trim().is_empty() {
            DashboardConfig::default()
        } else {
            toml::from_str(&config_str)?
        };

        let http_address = flag_value(args, "--http-address", "-a")
            .or(file_config.server.listen_address)
            .unwrap_or_else(|| "0.0.0.0:8000".to_string());

        let db_path = flag_value(args, "--db-path", "-d")
            .map(PathBuf::from)
            .or(file_config.storage.db_path)
            .unwrap_or_else(|| PathBuf::from("miner_history.db"));

        Ok(Config {
            http_address,
            static_dir: file_config
                .server
                .static_dir
                .unwrap_or_else(|| PathBuf::from("static")),
            db_path,
            retention_days: file_config.storage.retention_days.unwrap_or(30),
            cache_ttl_secs: file_config.cache.ttl_secs.unwrap_or(5),
            request_timeout_secs: file_config.http_client.request_timeout_secs.unwrap_or(18),
            pool_idle_timeout_secs: file_config
                .http_client
                .pool_idle_timeout_secs
                .unwrap_or(300),
            default_pool: file_config
                .pool
                .default_pool
                .unwrap_or_else(|| DEFAULT_POOL.to_string()),
            log_file,
        })
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }
}
