use std::env;
use std::path::PathBuf;

use crate::rate_limit::RateLimitConfig;

const DEFAULT_ORIGINS: &[&str] = &["http://localhost:3000", "https://grovecustom.vercel.app"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StripeSettings {
    pub secret_key: Option<String>,
    pub webhook_secret: Option<String>,
    pub api_base: String,
    pub currency: String,
    pub frontend_url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: Option<String>,
    pub data_dir: PathBuf,
    pub frontend_url: String,
    pub allowed_origins: Vec<String>,
    pub enable_hsts: bool,
    /// Read the client address from forwarded headers (only behind a proxy that sets them).
    pub trust_proxy: bool,
    pub bootstrap_admin_emails: Vec<String>,
    pub stripe: StripeSettings,
    pub s3: Option<S3Settings>,
    pub rate_limit: RateLimitConfig,
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn list(name: &str) -> Option<Vec<String>> {
    var(name).map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
}

fn flag(name: &str) -> bool {
    var(name).map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = var("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        if jwt_secret.len() < 32 {
            return Err(ConfigError::Invalid { name: "JWT_SECRET", reason: "must be at least 32 characters".into() });
        }

        let port = match var("PORT") {
            Some(p) => p.parse().map_err(|e| ConfigError::Invalid { name: "PORT", reason: format!("{e}") })?,
            None => 5000,
        };
        let frontend_url = var("FRONTEND_URL").unwrap_or_else(|| "http://localhost:3000".into());
        let data_dir = var("GROVE_DATA_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("data"));

        let stripe = StripeSettings {
            secret_key: var("STRIPE_SECRET_KEY"),
            webhook_secret: var("STRIPE_WEBHOOK_SECRET"),
            api_base: var("STRIPE_API_BASE").unwrap_or_else(|| "https://api.stripe.com".into()),
            currency: var("STRIPE_CURRENCY").unwrap_or_else(|| "mxn".into()).to_lowercase(),
            frontend_url: frontend_url.clone(),
        };

        let s3 = var("S3_ENDPOINT").map(|endpoint| S3Settings {
            endpoint,
            bucket: var("S3_BUCKET").unwrap_or_else(|| "grove-imagenes".into()),
            region: var("S3_REGION").unwrap_or_else(|| "us-east-1".into()),
            access_key: var("S3_ACCESS_KEY"),
            secret_key: var("S3_SECRET_KEY"),
        });

        Ok(Self {
            port,
            database_url: var("DATABASE_URL"),
            data_dir,
            frontend_url,
            allowed_origins: list("ALLOWED_ORIGINS")
                .unwrap_or_else(|| DEFAULT_ORIGINS.iter().map(|s| s.to_string()).collect()),
            enable_hsts: flag("ENABLE_HSTS"),
            trust_proxy: flag("TRUST_PROXY"),
            bootstrap_admin_emails: list("BOOTSTRAP_ADMIN_EMAILS")
                .unwrap_or_default()
                .into_iter()
                .map(|e| e.to_lowercase())
                .collect(),
            stripe,
            s3,
            rate_limit: RateLimitConfig::from_env(),
        })
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn image_dir(&self) -> PathBuf {
        self.data_dir.join("imagenes")
    }
}
