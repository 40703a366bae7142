//! Application configuration loaded from environment variables.
//!
//! Loaded once at startup in `main` and handed to every component that
//! needs it; nothing reads the environment after that.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::services::refresh::RefreshInterval;

pub const DEFAULT_API_BASE_URL: &str = "https://services.leadconnectorhq.com";
pub const DEFAULT_AUTHORIZE_URL: &str = "https://marketplace.gohighlevel.com/oauth/authorize";
pub const DEFAULT_TOKEN_URL: &str = "https://services.leadconnectorhq.com/oauth/token";

/// Upper bound for `LOOKBACK_DAYS`, ten years.
pub const MAX_LOOKBACK_DAYS: i64 = 3650;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- CRM OAuth application ---
    /// OAuth client ID issued by the CRM marketplace
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
    /// Redirect URI registered with the CRM (points at `/oauth/callback`)
    pub redirect_uri: String,
    /// HMAC key for signing the OAuth `state` parameter
    pub oauth_state_key: Vec<u8>,

    // --- CRM endpoints ---
    pub api_base_url: String,
    pub authorize_url: String,
    pub token_url: String,
    /// Bound on every outgoing CRM request
    pub http_timeout: Duration,

    // --- Storage ---
    /// SQLite file holding the OAuth token row
    pub database_path: PathBuf,
    /// Directory for dashboard output documents and refresh status
    pub data_dir: PathBuf,

    // --- Collection ---
    /// Location names to collect, in dashboard order. Empty means all.
    pub tracked_locations: Vec<String>,
    /// Pipeline stage whose opportunities count as retail sales
    pub retail_stage: String,
    /// Pipeline stage whose opportunities count as rental sales
    pub rental_stage: String,
    /// How many days back each refresh collects
    pub lookback_days: i64,
    pub refresh_interval: RefreshInterval,

    /// Browser origin allowed by CORS, besides localhost
    pub frontend_url: String,
    /// Server port
    pub port: u16,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            client_id: "test_client_id".to_string(),
            client_secret: "test_secret".to_string(),
            redirect_uri: "http://localhost:8050/oauth/callback".to_string(),
            oauth_state_key: b"test_state_key_32_bytes_minimum!".to_vec(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            authorize_url: DEFAULT_AUTHORIZE_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            http_timeout: Duration::from_secs(30),
            database_path: PathBuf::from("data/oauth_tokens.db"),
            data_dir: PathBuf::from("data"),
            tracked_locations: Vec::new(),
            retail_stage: "Sold Retail".to_string(),
            rental_stage: "Sold Rental".to_string(),
            lookback_days: 30,
            refresh_interval: RefreshInterval::Hourly,
            frontend_url: "http://localhost:8050".to_string(),
            port: 8050,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// A `.env` file in the working directory is honoured for local development.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let refresh_interval = match env::var("REFRESH_INTERVAL") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Invalid("REFRESH_INTERVAL", raw))?,
            Err(_) => RefreshInterval::Hourly,
        };
        let lookback_days = parse_lookback_days(env::var("LOOKBACK_DAYS").ok())?;

        Ok(Self {
            client_id: required("GHL_CLIENT_ID")?,
            client_secret: required("GHL_CLIENT_SECRET")?,
            redirect_uri: required("GHL_REDIRECT_URI")?,
            oauth_state_key: required("OAUTH_STATE_KEY")?.into_bytes(),

            api_base_url: env::var("CRM_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string()),
            authorize_url: env::var("CRM_AUTHORIZE_URL")
                .unwrap_or_else(|_| DEFAULT_AUTHORIZE_URL.to_string()),
            token_url: env::var("CRM_TOKEN_URL").unwrap_or_else(|_| DEFAULT_TOKEN_URL.to_string()),
            http_timeout: Duration::from_secs(parse_or("HTTP_TIMEOUT_SECS", 30)),

            database_path: env::var("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/oauth_tokens.db")),
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),

            tracked_locations: env::var("TRACKED_LOCATIONS")
                .map(|v| parse_list(&v))
                .unwrap_or_default(),
            retail_stage: env::var("RETAIL_STAGE").unwrap_or_else(|_| "Sold Retail".to_string()),
            rental_stage: env::var("RENTAL_STAGE").unwrap_or_else(|_| "Sold Rental".to_string()),
            lookback_days,
            refresh_interval,

            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:8050".to_string()),
            port: parse_or("PORT", 8050),
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .map(|v| v.trim().to_string())
        .map_err(|_| ConfigError::Missing(name))
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// `LOOKBACK_DAYS` must be a whole number of days in `1..=MAX_LOOKBACK_DAYS`.
fn parse_lookback_days(raw: Option<String>) -> Result<i64, ConfigError> {
    let Some(raw) = raw else {
        return Ok(30);
    };
    match raw.trim().parse::<i64>() {
        Ok(days) if (1..=MAX_LOOKBACK_DAYS).contains(&days) => Ok(days),
        _ => Err(ConfigError::Invalid("LOOKBACK_DAYS", raw)),
    }
}

/// Split a comma-separated list, dropping blanks.
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
