use std::env;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub bcrypt_cost: u32,
    pub jwt_expiration_secs: u64,
    pub verify_token_expiration_secs: u64,
    pub auth_cookie_name: String,
    pub rate_limit_requests: u32,
    pub rate_limit_window_ms: u64,
    pub login_rate_limit_requests: u32,
    pub login_rate_limit_window_ms: u64,
    pub rate_limit_max_keys: usize,
    pub rate_limit_sweep_secs: u64,
    pub trusted_proxies: Vec<IpAddr>,
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    pub app_base_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let jwt_expiration: u64 = parse_or("JWT_EXPIRATION", 24)?;
        let verify_expiration: u64 = parse_or("VERIFY_TOKEN_EXPIRATION", 48)?;

        Ok(Config {
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            bcrypt_cost: parse_or("BCRYPT_COST", bcrypt::DEFAULT_COST)?,
            jwt_expiration_secs: jwt_expiration * 3600,
            verify_token_expiration_secs: verify_expiration * 3600,
            auth_cookie_name: optional("AUTH_COOKIE_NAME").unwrap_or_else(|| "token".into()),
            rate_limit_requests: parse_or("RATE_LIMIT_REQUESTS", 10)?,
            rate_limit_window_ms: parse_or("RATE_LIMIT_WINDOW_MS", 60_000)?,
            login_rate_limit_requests: parse_or("LOGIN_RATE_LIMIT_REQUESTS", 5)?,
            login_rate_limit_window_ms: parse_or("LOGIN_RATE_LIMIT_WINDOW_MS", 60_000)?,
            rate_limit_max_keys: parse_or("RATE_LIMIT_MAX_KEYS", 100_000)?,
            rate_limit_sweep_secs: parse_or("RATE_LIMIT_SWEEP_SECS", 60)?,
            trusted_proxies: parse_ip_list("TRUSTED_PROXIES")?,
            server_host: optional("SERVER_HOST").unwrap_or_else(|| "::".into()),
            server_port: parse_or("SERVER_PORT", 3000)?,
            api_base_uri: optional("API_BASE_URI").unwrap_or_else(|| "/api".into()),
            app_base_url: optional("APP_BASE_URL")
                .unwrap_or_else(|| "http://localhost:3000".into()),
        })
    }

    pub fn jwt_expiration(&self) -> Duration {
        Duration::from_secs(self.jwt_expiration_secs)
    }

    pub fn verify_token_expiration(&self) -> Duration {
        Duration::from_secs(self.verify_token_expiration_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    pub fn login_rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.login_rate_limit_window_ms)
    }

    pub fn rate_limit_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.rate_limit_sweep_secs.max(1))
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn optional(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

// 小时数允许带 "h" 后缀，如 JWT_EXPIRATION=24h
fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(name) {
        Some(raw) => raw
            .trim()
            .trim_end_matches('h')
            .parse()
            .map_err(|_| ConfigError::Invalid(name, raw)),
        None => Ok(default),
    }
}

// 逗号分隔的 IP 列表，未设置时为空
fn parse_ip_list(name: &'static str) -> Result<Vec<IpAddr>, ConfigError> {
    match optional(name) {
        Some(raw) => split_ip_list(name, &raw),
        None => Ok(Vec::new()),
    }
}

fn split_ip_list(name: &'static str, raw: &str) -> Result<Vec<IpAddr>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(|ip| {
            ip.parse()
                .map_err(|_| ConfigError::Invalid(name, ip.to_string()))
        })
        .collect()
}
