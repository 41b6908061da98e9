//! Application configuration.
//!
//! Values are resolved with priority: config.toml > environment (.env) > default.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::paths;

// ==================== Sync Defaults ====================

/// Mutations peeked from the queue per batch during a drain
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Failed attempts before a mutation is moved to dead letters
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;

// ==================== Server Defaults ====================

/// Server address to bind to
pub const SERVER_ADDR: &str = "127.0.0.1";

/// Server port
pub const SERVER_PORT: u16 = 3000;

/// Drain tuning shared by the sync runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    pub batch_size: usize,
    pub max_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Fully resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub server_port: u16,
    pub sync: SyncConfig,
}

impl Config {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", SERVER_ADDR, self.server_port)
    }
}

/// config.toml structure; every key is optional
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    database: Option<DatabaseSection>,
    server: Option<ServerSection>,
    sync: Option<SyncSection>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabaseSection {
    path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSection {
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct SyncSection {
    batch_size: Option<usize>,
    max_attempts: Option<u32>,
}

/// Load configuration from ./config.toml, the environment and defaults
pub fn load() -> Config {
    // Load .env file if present
    let _ = dotenvy::dotenv();
    load_from(Path::new("config.toml"), |key| std::env::var(key).ok())
}

/// Resolve configuration from a config file path and an environment lookup
pub fn load_from(config_path: &Path, env: impl Fn(&str) -> Option<String>) -> Config {
    let file = read_file_config(config_path);

    let database_path = file
        .database
        .and_then(|d| d.path)
        .inspect(|p| tracing::info!("Using database from config.toml: {}", p))
        .or_else(|| env("DATABASE_PATH").inspect(|p| tracing::info!("Using database from DATABASE_PATH env: {}", p)))
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let default = PathBuf::from(paths::queue_db_path());
            tracing::info!("Using default database path: {}", default.display());
            default
        });

    let server_port = file
        .server
        .and_then(|s| s.port)
        .or_else(|| env("PORT").and_then(|p| p.parse().ok()))
        .unwrap_or(SERVER_PORT);

    let sync_file = file.sync.unwrap_or_default();
    let batch_size = sync_file
        .batch_size
        .or_else(|| env("SYNC_BATCH_SIZE").and_then(|v| v.parse().ok()))
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_BATCH_SIZE);
    let max_attempts = sync_file
        .max_attempts
        .or_else(|| env("SYNC_MAX_ATTEMPTS").and_then(|v| v.parse().ok()))
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_MAX_ATTEMPTS);

    Config {
        database_path,
        server_port,
        sync: SyncConfig {
            batch_size,
            max_attempts,
        },
    }
}

fn read_file_config(path: &Path) -> FileConfig {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return FileConfig::default();
    };
    match toml::from_str::<FileConfig>(&contents) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Ignoring unreadable {}: {}", path.display(), e);
            FileConfig::default()
        }
    }
}
