//! Application configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use fulfillment::{DEFAULT_MAX_UPLOAD_BYTES, EngineSettings, UploadTokenSigner, UrlSigner, WebhookVerifier};
use thiserror::Error;

/// Errors raised while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `DATABASE_URL`: PostgreSQL connection string; in-memory store when unset
/// - `WEBHOOK_SECRET` (required), `WEBHOOK_TOLERANCE_SECS` (default 300)
/// - `ADMIN_TOKEN` (required): bearer token for operator endpoints
/// - `UPLOAD_TOKEN_SECRET` (required), `UPLOAD_TOKEN_TTL_SECS` (default 86400).
///   The same secret signs `/files` download links.
/// - `STORAGE_ROOT` (default `./data`), `PUBLIC_BASE_URL` (default `http://localhost:{PORT}`)
/// - `SIGNED_URL_TTL_SECS` (default 604800)
/// - `NOTIFY_RECIPIENT` (required)
/// - `EMAIL_API_URL`, `EMAIL_API_KEY`, `EMAIL_FROM`: email API; messages are
///   only logged when the URL is unset
/// - `MAX_UPLOAD_BYTES` (default 15 MiB)
/// - `GENERATION_TIMEOUT_SECS` (60), `DISPATCH_TIMEOUT_SECS` (30),
///   `CLAIM_STALE_AFTER_SECS` (600)
/// - `LOG_FORMAT`: `text` or `json`
/// - `RUST_LOG`: tracing filter directive (default `info`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub webhook_secret: String,
    pub webhook_tolerance_secs: i64,
    pub admin_token: String,
    pub upload_token_secret: String,
    pub upload_token_ttl_secs: i64,
    pub storage_root: PathBuf,
    pub public_base_url: String,
    pub signed_url_ttl_secs: u64,
    pub notify_recipient: String,
    pub email_api_url: Option<String>,
    pub email_api_key: Option<String>,
    pub email_from: String,
    pub max_upload_bytes: usize,
    pub generation_timeout_secs: u64,
    pub dispatch_timeout_secs: u64,
    pub claim_stale_after_secs: u64,
    pub log_format: LogFormat,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| var(name).ok_or(ConfigError::Missing(name));

        let defaults = Self::default();
        let port = parse_or(&var, "PORT", defaults.port)?;

        let log_format = match var("LOG_FORMAT").as_deref().map(str::to_ascii_lowercase) {
            None => LogFormat::Text,
            Some(f) if f == "text" => LogFormat::Text,
            Some(f) if f == "json" => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "LOG_FORMAT",
                    value: other,
                });
            }
        };

        Ok(Self {
            host: var("HOST").unwrap_or(defaults.host),
            port,
            database_url: var("DATABASE_URL"),
            webhook_secret: required("WEBHOOK_SECRET")?,
            webhook_tolerance_secs: parse_secs(&var, "WEBHOOK_TOLERANCE_SECS", defaults.webhook_tolerance_secs)?,
            admin_token: required("ADMIN_TOKEN")?,
            upload_token_secret: required("UPLOAD_TOKEN_SECRET")?,
            upload_token_ttl_secs: parse_secs(&var, "UPLOAD_TOKEN_TTL_SECS", defaults.upload_token_ttl_secs)?,
            storage_root: var("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_root),
            public_base_url: var("PUBLIC_BASE_URL")
                .unwrap_or_else(|| format!("http://localhost:{port}")),
            signed_url_ttl_secs: parse_or(&var, "SIGNED_URL_TTL_SECS", defaults.signed_url_ttl_secs)?,
            notify_recipient: required("NOTIFY_RECIPIENT")?,
            email_api_url: var("EMAIL_API_URL"),
            email_api_key: var("EMAIL_API_KEY"),
            email_from: var("EMAIL_FROM").unwrap_or(defaults.email_from),
            max_upload_bytes: parse_or(&var, "MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            generation_timeout_secs: parse_or(
                &var,
                "GENERATION_TIMEOUT_SECS",
                defaults.generation_timeout_secs,
            )?,
            dispatch_timeout_secs: parse_or(
                &var,
                "DISPATCH_TIMEOUT_SECS",
                defaults.dispatch_timeout_secs,
            )?,
            claim_stale_after_secs: parse_or(
                &var,
                "CLAIM_STALE_AFTER_SECS",
                defaults.claim_stale_after_secs,
            )?,
            log_format,
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            generation_timeout: Duration::from_secs(self.generation_timeout_secs),
            dispatch_timeout: Duration::from_secs(self.dispatch_timeout_secs),
            claim_stale_after: Duration::from_secs(self.claim_stale_after_secs),
        }
    }

    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.signed_url_ttl_secs)
    }

    pub fn webhook_verifier(&self) -> WebhookVerifier {
        WebhookVerifier::new(
            self.webhook_secret.as_bytes(),
            chrono::Duration::seconds(self.webhook_tolerance_secs),
        )
    }

    pub fn upload_token_signer(&self) -> UploadTokenSigner {
        UploadTokenSigner::new(
            self.upload_token_secret.as_bytes(),
            chrono::Duration::seconds(self.upload_token_ttl_secs),
        )
    }

    pub fn url_signer(&self) -> UrlSigner {
        UrlSigner::new(
            self.upload_token_secret.as_bytes(),
            self.public_base_url.as_str(),
        )
    }
}

/// Upper bound for second-valued settings that become `chrono` durations.
const MAX_DURATION_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Parses a positive number of seconds no larger than ten years.
fn parse_secs(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: i64,
) -> Result<i64, ConfigError> {
    let secs = parse_or(var, name, default)?;
    if (1..=MAX_DURATION_SECS).contains(&secs) {
        Ok(secs)
    } else {
        Err(ConfigError::Invalid {
            name,
            value: secs.to_string(),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: None,
            webhook_secret: String::new(),
            webhook_tolerance_secs: fulfillment::ingestion::DEFAULT_TOLERANCE_SECS,
            admin_token: String::new(),
            upload_token_secret: String::new(),
            upload_token_ttl_secs: 24 * 60 * 60,
            storage_root: PathBuf::from("./data"),
            public_base_url: "http://localhost:3000".to_string(),
            signed_url_ttl_secs: fulfillment::DEFAULT_LINK_TTL.as_secs(),
            notify_recipient: String::new(),
            email_api_url: None,
            email_api_key: None,
            email_from: "orders@localhost".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            generation_timeout_secs: 60,
            dispatch_timeout_secs: 30,
            claim_stale_after_secs: 10 * 60,
            log_format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    const REQUIRED: [(&str, &str); 4] = [
        ("WEBHOOK_SECRET", "whsec"),
        ("ADMIN_TOKEN", "admin"),
        ("UPLOAD_TOKEN_SECRET", "upload"),
        ("NOTIFY_RECIPIENT", "print@example.com"),
    ];

    #[test]
    fn test_default_values() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.database_url, None);
        assert_eq!(config.webhook_tolerance_secs, 300);
        assert_eq!(config.upload_token_ttl_secs, 86_400);
        assert_eq!(config.signed_url_ttl_secs, 604_800);
        assert_eq!(config.max_upload_bytes, 15 * 1024 * 1024);
        assert_eq!(config.public_base_url, "http://localhost:3000");
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.engine_settings().claim_stale_after, Duration::from_secs(600));
    }

    #[test]
    fn test_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("PORT", "8080"),
            ("MAX_UPLOAD_BYTES", "1024"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/orders"),
            ("GENERATION_TIMEOUT_SECS", "5"),
        ]);
        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.public_base_url, "http://localhost:8080");
        assert_eq!(config.max_upload_bytes, 1024);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/orders"));
        assert_eq!(config.engine_settings().generation_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_missing_secret() {
        let pairs: Vec<_> = REQUIRED
            .iter()
            .copied()
            .filter(|(k, _)| *k != "ADMIN_TOKEN")
            .collect();
        let result = Config::from_lookup(lookup(&pairs));
        assert!(matches!(result, Err(ConfigError::Missing("ADMIN_TOKEN"))));
    }

    #[test]
    fn test_out_of_range_durations() {
        for (name, value) in [
            ("WEBHOOK_TOLERANCE_SECS", "-9223372036854775808"),
            ("WEBHOOK_TOLERANCE_SECS", "0"),
            ("UPLOAD_TOKEN_TTL_SECS", "9223372036854775807"),
            ("UPLOAD_TOKEN_TTL_SECS", "-1"),
        ] {
            let mut pairs = REQUIRED.to_vec();
            pairs.push((name, value));
            let result = Config::from_lookup(lookup(&pairs));
            assert!(
                matches!(result, Err(ConfigError::Invalid { name: n, .. }) if n == name),
                "{name}={value} should be rejected"
            );
        }

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("UPLOAD_TOKEN_TTL_SECS", "3600"));
        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.upload_token_ttl_secs, 3600);
    }

    #[test]
    fn test_invalid_number() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("PORT", "eighty"));
        let result = Config::from_lookup(lookup(&pairs));
        assert!(matches!(result, Err(ConfigError::Invalid { name: "PORT", .. })));
    }
}
