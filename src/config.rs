// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is read once from the environment at startup. Missing or
//! malformed required values are fatal.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Root for `core.redb` and `blobs/` | `/data` |
//! | `MASTER_ENCRYPTION_KEY` | 64 hex characters (32 bytes) | Required |
//! | `SESSION_JWT_SECRET` | HS256 secret for session tokens | Required |
//! | `CRON_SECRET` | Bearer secret for the sweep endpoint | Unset (endpoint rejects) |
//! | `REDIS_URL` | Shared KV store | Unset (in-process store) |
//! | `DOMPETX_WEBHOOK_SECRET` | Gateway A webhook HMAC secret | Unset |
//! | `DOMPETX_API_KEY` | Gateway A API key | Unset |
//! | `DOMPETX_API_BASE_URL` | Gateway A API root | `https://api.dompetx.com` |
//! | `POLAR_WEBHOOK_SECRET` | Gateway B webhook secret | Unset |
//! | `POLAR_ACCESS_TOKEN` | Gateway B API token | Unset |
//! | `POLAR_PRODUCT_ID` | Gateway B product for checkouts | Unset |
//! | `POLAR_API_BASE_URL` | Gateway B API root | `https://api.polar.sh` |
//! | `PUBLIC_BASE_URL` | Frontend root for gateway return URLs | `http://localhost:3000` |
//! | `PREDICTION_PRICE_USD_CENTS` | Price of a prediction unlock | `999` |
//! | `FALLBACK_USD_IDR_RATE` | Rate used when conversion is unavailable | `16000` |
//! | `EXCHANGE_RATE_URL` | JSON endpoint exposing `rates.IDR` | Unset |
//! | `NOTIFY_WEBHOOK_URL` | Notification sink (JSON POST) | Unset (logged only) |
//! | `DOCUMENT_MAX_BYTES` | Upload size bound | `10485760` |
//! | `DOCUMENT_RETENTION_SECS` | Auto-delete delay | `86400` |
//! | `SWEEP_BATCH_SIZE` | Documents erased per sweep | `100` |
//! | `SWEEP_INTERVAL_SECS` | In-process sweep period | Unset (cron only) |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::crypto::{CryptoError, MasterKey};
use crate::documents::{DocumentPolicy, DEFAULT_SWEEP_BATCH};
use crate::kv::RateLimit;
use crate::payments::dompetx::{self, DompetxConfig};
use crate::payments::polar::{self, PolarConfig};
use crate::payments::rates::DEFAULT_FALLBACK_RATE;
use crate::storage::paths::DATA_ROOT;

/// Environment variable name for the data directory path.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

pub const MASTER_KEY_ENV: &str = "MASTER_ENCRYPTION_KEY";
pub const SESSION_SECRET_ENV: &str = "SESSION_JWT_SECRET";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),

    #[error("environment variable {name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("{MASTER_KEY_ENV}: {0}")]
    MasterKey(#[from] CryptoError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub master_key: MasterKey,
    pub session_secret: Vec<u8>,
    pub cron_secret: Option<String>,
    pub redis_url: Option<String>,
    pub dompetx: DompetxConfig,
    pub polar: PolarConfig,
    pub public_base_url: String,
    pub prediction_price_usd_cents: u64,
    pub fallback_usd_idr_rate: f64,
    pub exchange_rate_url: Option<String>,
    pub notify_webhook_url: Option<String>,
    pub document_policy: DocumentPolicy,
    pub sweep_batch_size: usize,
    pub sweep_interval: Option<Duration>,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let master_key = MasterKey::from_hex(&env.required(MASTER_KEY_ENV)?)?;
        let session_secret = env.required(SESSION_SECRET_ENV)?.into_bytes();

        let document_policy = DocumentPolicy {
            max_bytes: env.parsed("DOCUMENT_MAX_BYTES", DocumentPolicy::default().max_bytes)?,
            retention: Duration::from_secs(env.parsed("DOCUMENT_RETENTION_SECS", 86_400u64)?),
            upload_limit: RateLimit::DOCUMENT_UPLOAD,
        };
        if document_policy.max_bytes == 0 {
            return Err(ConfigError::Invalid {
                name: "DOCUMENT_MAX_BYTES",
                reason: "must be greater than zero".to_string(),
            });
        }

        let fallback_usd_idr_rate: f64 = env.parsed("FALLBACK_USD_IDR_RATE", DEFAULT_FALLBACK_RATE)?;
        if !(fallback_usd_idr_rate.is_finite() && fallback_usd_idr_rate > 0.0) {
            return Err(ConfigError::Invalid {
                name: "FALLBACK_USD_IDR_RATE",
                reason: "must be a positive number".to_string(),
            });
        }

        let sweep_batch_size: usize = env.parsed("SWEEP_BATCH_SIZE", DEFAULT_SWEEP_BATCH)?;
        if sweep_batch_size == 0 {
            return Err(ConfigError::Invalid {
                name: "SWEEP_BATCH_SIZE",
                reason: "must be greater than zero".to_string(),
            });
        }

        let sweep_interval = match env.optional("SWEEP_INTERVAL_SECS") {
            Some(raw) => Some(Duration::from_secs(parse("SWEEP_INTERVAL_SECS", &raw)?)),
            None => None,
        };

        let log_format = match env.or_default("LOG_FORMAT", "pretty").to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            host: env.or_default("HOST", "0.0.0.0"),
            port: env.parsed("PORT", 8080u16)?,
            data_dir: PathBuf::from(env.or_default(DATA_DIR_ENV, DATA_ROOT)),
            master_key,
            session_secret,
            cron_secret: env.optional("CRON_SECRET"),
            redis_url: env.optional("REDIS_URL"),
            dompetx: DompetxConfig {
                api_base_url: env.or_default("DOMPETX_API_BASE_URL", dompetx::DEFAULT_API_BASE_URL),
                api_key: env.optional("DOMPETX_API_KEY"),
                webhook_secret: env.optional("DOMPETX_WEBHOOK_SECRET"),
            },
            polar: PolarConfig {
                api_base_url: env.or_default("POLAR_API_BASE_URL", polar::DEFAULT_API_BASE_URL),
                access_token: env.optional("POLAR_ACCESS_TOKEN"),
                product_id: env.optional("POLAR_PRODUCT_ID"),
                webhook_secret: env.optional("POLAR_WEBHOOK_SECRET"),
            },
            public_base_url: env.or_default("PUBLIC_BASE_URL", "http://localhost:3000"),
            prediction_price_usd_cents: env.parsed("PREDICTION_PRICE_USD_CENTS", 999u64)?,
            fallback_usd_idr_rate,
            exchange_rate_url: env.optional("EXCHANGE_RATE_URL"),
            notify_webhook_url: env.optional("NOTIFY_WEBHOOK_URL"),
            document_policy,
            sweep_batch_size,
            sweep_interval,
            log_format,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.optional(name).ok_or(ConfigError::Missing(name))
    }

    fn or_default(&self, name: &str, default: &str) -> String {
        self.optional(name).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(name) {
            Some(raw) => parse(name, &raw),
            None => Ok(default),
        }
    }
}

fn parse<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|name| map.get(name).cloned())
    }

    fn minimal() -> Vec<(&'static str, &'static str)> {
        vec![(MASTER_KEY_ENV, KEY_HEX), (SESSION_SECRET_ENV, "session")]
    }

    #[test]
    fn defaults_apply() {
        let config = load(&minimal()).unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.data_dir, PathBuf::from("/data"));
        assert_eq!(config.document_policy.max_bytes, 10 * 1024 * 1024);
        assert_eq!(config.document_policy.retention, Duration::from_secs(86_400));
        assert_eq!(config.sweep_batch_size, 100);
        assert_eq!(config.prediction_price_usd_cents, 999);
        assert_eq!(config.fallback_usd_idr_rate, 16_000.0);
        assert_eq!(config.dompetx.api_base_url, "https://api.dompetx.com");
        assert_eq!(config.polar.api_base_url, "https://api.polar.sh");
        assert!(config.cron_secret.is_none());
        assert!(config.sweep_interval.is_none());
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn master_key_is_required_and_validated() {
        assert!(matches!(
            load(&[(SESSION_SECRET_ENV, "session")]),
            Err(ConfigError::Missing(MASTER_KEY_ENV))
        ));
        assert!(matches!(
            load(&[(MASTER_KEY_ENV, "abcd"), (SESSION_SECRET_ENV, "session")]),
            Err(ConfigError::MasterKey(_))
        ));
    }

    #[test]
    fn session_secret_is_required() {
        assert!(matches!(
            load(&[(MASTER_KEY_ENV, KEY_HEX)]),
            Err(ConfigError::Missing(SESSION_SECRET_ENV))
        ));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let mut vars = minimal();
        vars.push(("CRON_SECRET", "   "));
        vars.push(("PORT", ""));
        let config = load(&vars).unwrap();
        assert!(config.cron_secret.is_none());
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let mut vars = minimal();
        vars.push(("PORT", "eighty"));
        assert!(matches!(
            load(&vars),
            Err(ConfigError::Invalid { name: "PORT", .. })
        ));

        let mut vars = minimal();
        vars.push(("FALLBACK_USD_IDR_RATE", "-1"));
        assert!(matches!(
            load(&vars),
            Err(ConfigError::Invalid { name: "FALLBACK_USD_IDR_RATE", .. })
        ));
    }

    #[test]
    fn zero_sweep_batch_is_rejected() {
        let mut vars = minimal();
        vars.push(("SWEEP_BATCH_SIZE", "0"));
        assert!(matches!(
            load(&vars),
            Err(ConfigError::Invalid { name: "SWEEP_BATCH_SIZE", .. })
        ));
    }

    #[test]
    fn overrides_are_read() {
        let mut vars = minimal();
        vars.extend([
            ("SWEEP_INTERVAL_SECS", "900"),
            ("LOG_FORMAT", "JSON"),
            ("POLAR_WEBHOOK_SECRET", "whsec_c2VjcmV0"),
            ("DOCUMENT_RETENTION_SECS", "3600"),
        ]);
        let config = load(&vars).unwrap();
        assert_eq!(config.sweep_interval, Some(Duration::from_secs(900)));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.polar.webhook_secret.as_deref(), Some("whsec_c2VjcmV0"));
        assert_eq!(config.document_policy.retention, Duration::from_secs(3600));
    }
}
