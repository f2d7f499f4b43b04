//! Configuration module for the CodeLink backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Default number of attempts a store transaction gets before giving up.
pub const DEFAULT_TX_RETRIES: u32 = 64;

/// Default capacity of the change-event broadcast channel.
pub const DEFAULT_CHANGE_BUFFER: usize = 1024;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for API authentication (required in production)
    pub api_psk: Option<String>,
    /// Path to SQLite database file backing the realtime store
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Retry budget for optimistic read-modify-write transactions
    pub tx_retries: u32,
    /// Capacity of the change notification channel
    pub change_buffer: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let api_psk = env::var("CODELINK_API_PSK").ok();

        let db_path = env::var("CODELINK_DB_PATH")
            .unwrap_or_else(|_| "./data/codelink.sqlite".to_string())
            .into();

        let bind_addr = env::var("CODELINK_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .expect("Invalid CODELINK_BIND_ADDR format");

        let log_level = env::var("CODELINK_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let tx_retries = env::var("CODELINK_TX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_TX_RETRIES);

        let change_buffer = env::var("CODELINK_CHANGE_BUFFER")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_CHANGE_BUFFER);

        Self {
            api_psk,
            db_path,
            bind_addr,
            log_level,
            tx_retries,
            change_buffer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        // Clear any existing env vars
        env::remove_var("CODELINK_API_PSK");
        env::remove_var("CODELINK_DB_PATH");
        env::remove_var("CODELINK_BIND_ADDR");
        env::remove_var("CODELINK_LOG_LEVEL");
        env::remove_var("CODELINK_TX_RETRIES");
        env::remove_var("CODELINK_CHANGE_BUFFER");

        let config = Config::from_env();

        assert!(config.api_psk.is_none());
        assert_eq!(config.db_path, PathBuf::from("./data/codelink.sqlite"));
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.tx_retries, DEFAULT_TX_RETRIES);
        assert_eq!(config.change_buffer, DEFAULT_CHANGE_BUFFER);
    }
}
