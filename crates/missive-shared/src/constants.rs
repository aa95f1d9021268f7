/// Application name
pub const APP_NAME: &str = "Missive";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Maximum message text size in bytes (64 KiB)
pub const MAX_TEXT_SIZE: usize = 65_536;

/// Maximum uploaded media size in bytes (10 MiB)
pub const MAX_MEDIA_SIZE: usize = 10 * 1024 * 1024;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;
