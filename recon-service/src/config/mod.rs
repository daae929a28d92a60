//! Configuration for recon-service.
//!
//! Everything operational comes from the environment; sources read their
//! endpoints and credentials from here, never from constants.

use rust_decimal::Decimal;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct ReconConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub store: StoreConfig,
    pub sync: SyncConfig,
    pub matching: MatchingConfig,
    pub email_feed: EmailFeedConfig,
    pub invoice_feed: InvoiceFeedConfig,
    pub processor: ProcessorConfig,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path of the embedded SQLite file.
    pub path: String,
    pub connect_timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub interval_secs: u64,
    pub lookback_days: i64,
}

#[derive(Debug, Clone)]
pub struct MatchingConfig {
    /// Tolerance for amount comparisons.
    pub amount_tol: Decimal,
    /// Lump-sum matcher date window in days.
    pub date_window_days: i64,
    /// Score at or above which a lump-sum match is applied automatically.
    pub auto_match_conf: f64,
    /// Score at or above which a lump-sum match is surfaced as a suggestion.
    pub suggest_conf: f64,
    /// Canonical payer name -> accepted aliases.
    pub agency_aliases: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailSourceConfig {
    pub query: String,
    #[serde(default)]
    pub description: String,
    /// Sources that never carry parseable line items (image-only bodies).
    #[serde(default)]
    pub manual_review: bool,
}

#[derive(Debug, Clone)]
pub struct EmailFeedConfig {
    /// Mail gateway base URL; empty disables the email source.
    pub gateway_url: String,
    pub sources: HashMap<String, EmailSourceConfig>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub max_per_source: u32,
}

#[derive(Debug, Clone)]
pub struct InvoiceFeedConfig {
    /// Read-only operations database URL; empty disables the invoice source.
    pub database_url: String,
    pub tenants: Vec<String>,
    pub connect_timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Processor API base URL; empty disables both processor sources.
    pub api_url: String,
    pub login_id: String,
    pub api_key: String,
    pub account_ids: Vec<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

fn env_parsed<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_json<T: serde::de::DeserializeOwned>(key: &str) -> Result<Option<T>, AppError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("{} is not valid JSON: {}", key, e))),
        _ => Ok(None),
    }
}

impl ReconConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let amount_tol = env::var("AMOUNT_TOL")
            .ok()
            .map(|s| {
                Decimal::from_str(&s)
                    .map_err(|e| AppError::ConfigError(anyhow::anyhow!("AMOUNT_TOL: {}", e)))
            })
            .transpose()?
            .unwrap_or_else(|| Decimal::new(1, 2));

        let agency_aliases: HashMap<String, Vec<String>> =
            env_json("AGENCY_ALIASES")?.unwrap_or_default();

        let email_sources: HashMap<String, EmailSourceConfig> =
            env_json("EMAIL_SOURCES")?.unwrap_or_default();

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "recon-service".to_string()),
            store: StoreConfig {
                path: env::var("RECON_DB_PATH").unwrap_or_else(|_| "data/recon.db".to_string()),
                connect_timeout_secs: env_parsed("DB_CONNECT_TIMEOUT", 10),
                max_retries: env_parsed("DB_MAX_RETRIES", 3),
            },
            sync: SyncConfig {
                interval_secs: env_parsed("SYNC_INTERVAL_SECONDS", 300),
                lookback_days: env_parsed("SYNC_LOOKBACK_DAYS", 60),
            },
            matching: MatchingConfig {
                amount_tol,
                date_window_days: env_parsed("DATE_WINDOW_DAYS", 3),
                auto_match_conf: env_parsed("AUTO_MATCH_CONF", 0.80),
                suggest_conf: env_parsed("SUGGEST_CONF", 0.50),
                agency_aliases,
            },
            email_feed: EmailFeedConfig {
                gateway_url: env::var("EMAIL_GATEWAY_URL").unwrap_or_default(),
                sources: email_sources,
                timeout_secs: env_parsed("API_TIMEOUT", 30),
                max_retries: env_parsed("API_MAX_RETRIES", 3),
                max_per_source: env_parsed("EMAIL_MAX_PER_SOURCE", 50),
            },
            invoice_feed: InvoiceFeedConfig {
                database_url: env::var("INVOICE_DATABASE_URL").unwrap_or_default(),
                tenants: env_list("INVOICE_TENANTS"),
                connect_timeout_secs: env_parsed("DB_CONNECT_TIMEOUT", 10),
                max_retries: env_parsed("DB_MAX_RETRIES", 3),
            },
            processor: ProcessorConfig {
                api_url: env::var("PROCESSOR_API_URL").unwrap_or_default(),
                login_id: env::var("PROCESSOR_LOGIN_ID").unwrap_or_default(),
                api_key: env::var("PROCESSOR_API_KEY").unwrap_or_default(),
                account_ids: env_list("PROCESSOR_ACCOUNT_IDS"),
                timeout_secs: env_parsed("API_TIMEOUT", 30),
                max_retries: env_parsed("API_MAX_RETRIES", 3),
            },
        })
    }
}
