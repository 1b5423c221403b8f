use anyhow::{Context, Result};
use serde::Deserialize;
use std::str::FromStr;

use crate::types::Granularity;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub general: General,
    pub warehouse: WarehouseConfig,
    pub sources: Sources,
    pub cache: Cache,
    pub dashboard: Dashboard,
    pub web: Option<Web>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct General {
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sqlite,
    Snowflake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Password,
    Keypair,
    Oauth,
    Browser,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::Keypair => "keypair",
            Self::Oauth => "oauth",
            Self::Browser => "browser",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WarehouseConfig {
    pub backend: BackendKind,
    pub sqlite: Option<SqliteConfig>,
    pub snowflake: Option<SnowflakeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnowflakeConfig {
    pub account: String,
    pub user: String,
    pub auth_mode: AuthMode,
    /// Overrides `https://{account}.snowflakecomputing.com`.
    pub account_url: Option<String>,
    pub warehouse: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub role: Option<String>,
    /// Falls back to `SNOWFLAKE_PASSWORD`.
    pub password: Option<String>,
    /// PKCS#8 PEM, unencrypted.
    pub private_key_path: Option<String>,
    /// Falls back to `SNOWFLAKE_OAUTH_TOKEN`.
    pub oauth_token: Option<String>,
    #[serde(default = "default_browser_timeout_secs")]
    pub browser_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_browser_timeout_secs() -> u64 {
    120
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl SnowflakeConfig {
    pub fn password(&self) -> Option<String> {
        self.password
            .clone()
            .or_else(|| std::env::var("SNOWFLAKE_PASSWORD").ok())
    }

    pub fn oauth_token(&self) -> Option<String> {
        self.oauth_token
            .clone()
            .or_else(|| std::env::var("SNOWFLAKE_OAUTH_TOKEN").ok())
    }

    pub fn base_url(&self) -> String {
        match &self.account_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}.snowflakecomputing.com", self.account),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sources {
    pub transfers_table: String,
    pub gmp_table: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Cache {
    pub ttl_secs: u64,
    pub max_entries: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Dashboard {
    pub title: String,
    pub default_window_days: u32,
    pub default_granularity: Granularity,
    /// Contract / sender address substrings under observation.
    pub allowlist: Vec<String>,
    pub top_assets: usize,
    pub recent_events: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Web {
    pub port: u16,
    pub host: String,
    pub auth_password: Option<String>,
}

impl Config {
    /// Reads `TRANSFERS_CONFIG` if set, otherwise `config/default.toml`.
    pub fn load() -> Result<Self> {
        let path =
            std::env::var("TRANSFERS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {path}"))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_toml_str(s)
    }
}
