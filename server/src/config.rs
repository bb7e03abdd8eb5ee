use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use thiserror::Error;
use tracing::{info, warn};

use crate::security;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {key} value: {reason}")]
    Invalid { key: &'static str, reason: String },
}

pub struct Config {
    pub port: u16,
    pub data_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub upload_url_prefix: String,
    pub session_secret: String,
    pub session_ttl_hours: i64,
    /// Marks the session cookie `Secure`. Turn off only for plain-HTTP development.
    pub cookie_secure: bool,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key/value source; `load` passes the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let upload_url_prefix: String = vars.try_load("ATELIER_UPLOAD_URL_PREFIX", "/uploads")?;
        let upload_url_prefix = upload_url_prefix.trim_end_matches('/').to_string();
        if !upload_url_prefix.starts_with('/') || upload_url_prefix.len() < 2 {
            return Err(ConfigError::Invalid {
                key: "ATELIER_UPLOAD_URL_PREFIX",
                reason: "must be an absolute path such as /uploads".to_string(),
            });
        }

        let session_ttl_hours: i64 = vars.try_load("ATELIER_SESSION_TTL_HOURS", "168")?;
        if session_ttl_hours <= 0 {
            return Err(ConfigError::Invalid {
                key: "ATELIER_SESSION_TTL_HOURS",
                reason: "must be positive".to_string(),
            });
        }

        Ok(Self {
            port: vars.try_load("ATELIER_PORT", "3000")?,
            data_dir: vars.try_load("ATELIER_DATA_DIR", "./data")?,
            upload_dir: vars.try_load("ATELIER_UPLOAD_DIR", "./public/uploads")?,
            upload_url_prefix,
            session_secret: vars.session_secret(),
            session_ttl_hours,
            cookie_secure: vars.try_load("ATELIER_COOKIE_SECURE", "true")?,
            admin_email: vars.var("ATELIER_ADMIN_EMAIL"),
            admin_password: vars.var("ATELIER_ADMIN_PASSWORD"),
        })
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn var(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn try_load<T: FromStr>(&self, key: &'static str, default: &str) -> Result<T, ConfigError>
    where
        T::Err: Display,
    {
        self.var(key)
            .unwrap_or_else(|| {
                info!("{key} not set, using default: {default}");
                default.to_string()
            })
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
            })
    }

    fn session_secret(&self) -> String {
        self.var("ATELIER_SESSION_SECRET").unwrap_or_else(|| {
            warn!("ATELIER_SESSION_SECRET not set, sessions will not survive a restart");
            hex::encode(security::generate_secret())
        })
    }
}
