//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use missive_shared::constants::{APP_NAME, DEFAULT_HTTP_PORT, MAX_MEDIA_SIZE};
use missive_shared::crypto::{self, SymmetricKey};

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Filesystem path of the SQLite database.
    /// Env: `DB_PATH`
    /// Default: `./missive.db`
    pub db_path: PathBuf,

    /// Filesystem path where uploaded media is stored.
    /// Env: `MEDIA_STORAGE_PATH`
    /// Default: `./media`
    pub media_storage_path: PathBuf,

    /// Maximum uploaded media size in bytes.
    /// Env: `MAX_MEDIA_SIZE`
    /// Default: 10 MiB
    pub max_media_size: usize,

    /// Symmetric key for message-text encryption (hex-encoded, 64 chars).
    /// Env: `MESSAGE_KEY`
    /// Default: all-zeros (development only). Never embedded in source.
    pub message_key: SymmetricKey,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Missive Node"`
    pub instance_name: String,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("db_path", &self.db_path)
            .field("media_storage_path", &self.media_storage_path)
            .field("max_media_size", &self.max_media_size)
            .field("message_key", &"<redacted>")
            .field("instance_name", &self.instance_name)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            db_path: PathBuf::from("./missive.db"),
            media_storage_path: PathBuf::from("./media"),
            max_media_size: MAX_MEDIA_SIZE,
            message_key: [0u8; 32],
            instance_name: format!("{APP_NAME} Node"),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DB_PATH") {
            config.db_path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("MEDIA_STORAGE_PATH") {
            config.media_storage_path = PathBuf::from(path);
        }

        if let Ok(val) = std::env::var("MAX_MEDIA_SIZE") {
            if let Ok(n) = val.parse::<usize>() {
                config.max_media_size = n;
            }
        }

        match std::env::var("MESSAGE_KEY") {
            Ok(hex_key) => match crypto::key_from_hex(&hex_key) {
                Ok(key) => config.message_key = key,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid MESSAGE_KEY, using all-zeros dev key (dev-only)"
                    );
                }
            },
            Err(_) => {
                tracing::warn!("MESSAGE_KEY not set, using all-zeros dev key (dev-only)");
            }
        }

        if let Ok(name) = std::env::var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}
