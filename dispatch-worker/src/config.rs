//! Configuration module for environment variable parsing.
//!
//! Every setting has a default so a bare environment starts a working
//! (local SQLite, direct-protocol only) deployment.

use std::env;
use tracing::warn;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL
    pub database_url: String,

    /// Port for the web server to listen on
    pub port: u16,

    /// Base URL of the relay API (process-wide; API keys are per campaign)
    pub relay_api_url: Option<String>,

    /// URL pinged by the keepalive task; `None` disables it
    pub keepalive_url: Option<String>,

    /// Seconds between keepalive pings
    pub keepalive_interval_secs: u64,

    /// Directory for uploaded campaign attachments
    pub upload_dir: String,

    /// Optional file receiving a copy of the JSON log stream
    pub log_file: Option<String>,

    /// Connect/operation timeout for direct-protocol delivery, in seconds
    pub smtp_timeout_secs: u64,

    /// Sleep range in seconds between dispatch passes (min, max)
    pub pass_delay_secs: (u64, u64),

    /// Fixed part of the pause after each send, in seconds
    pub post_send_pause_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data.db".to_string()),

            port: parse_number("PORT", 5000),

            relay_api_url: parse_optional("POSTAL_API_URL"),

            keepalive_url: parse_optional("KEEPALIVE_URL"),

            keepalive_interval_secs: parse_number("KEEPALIVE_INTERVAL", 60),

            upload_dir: env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string()),

            log_file: parse_optional("LOG_FILE"),

            smtp_timeout_secs: parse_number("SMTP_TIMEOUT_SECS", 30),

            pass_delay_secs: parse_range("PASS_DELAY_RANGE_SECS", (1, 10)),

            post_send_pause_secs: parse_number("POST_SEND_PAUSE_SECS", 60),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: "sqlite::memory:".to_string(),
            port: 5000,
            relay_api_url: None,
            keepalive_url: None,
            keepalive_interval_secs: 60,
            upload_dir: "uploads".to_string(),
            log_file: None,
            smtp_timeout_secs: 30,
            pass_delay_secs: (1, 10),
            post_send_pause_secs: 60,
        }
    }
}

/// Parse a numeric variable, warning and falling back on garbage.
fn parse_number<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!(env_var = name, value = %raw, "Invalid number, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Read a variable, treating empty values as unset.
fn parse_optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a comma-separated range like "1,10" into a tuple.
fn parse_range(name: &str, default: (u64, u64)) -> (u64, u64) {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    let parts: Vec<&str> = raw.split(',').collect();
    if parts.len() != 2 {
        warn!(env_var = name, value = %raw, "Invalid range format, using default");
        return default;
    }

    let min = parts[0].trim().parse::<u64>();
    let max = parts[1].trim().parse::<u64>();

    match (min, max) {
        (Ok(min), Ok(max)) if min <= max => (min, max),
        _ => {
            warn!(env_var = name, value = %raw, "Invalid range values, using default");
            default
        }
    }
}
