// config.rs
use std::{env, fmt::Display, str::FromStr};

use chrono::Duration;
use tracing::info;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub max_connections: u32,
    pub session_ttl: Duration,
    pub admin: Option<AdminAccount>,
}

/// Staff account created at start-up when both credentials are configured.
#[derive(Clone)]
pub struct AdminAccount {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AdminAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminAccount")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let ttl_hours: i64 = try_load(&lookup, "SESSION_TTL_HOURS", "336")?;
        if ttl_hours <= 0 {
            return Err(ConfigError::Invalid {
                key: "SESSION_TTL_HOURS",
                reason: "must be positive".to_string(),
            });
        }

        let admin = match (lookup("ADMIN_USERNAME"), lookup("ADMIN_PASSWORD")) {
            (Some(username), Some(password)) => Some(AdminAccount { username, password }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Invalid {
                    key: "ADMIN_USERNAME",
                    reason: "ADMIN_USERNAME and ADMIN_PASSWORD must be set together".to_string(),
                })
            }
        };

        Ok(Self {
            port: try_load(&lookup, "PORT", "3030")?,
            database_url,
            max_connections: try_load(&lookup, "DATABASE_MAX_CONNECTIONS", "5")?,
            session_ttl: Duration::hours(ttl_hours),
            admin,
        })
    }
}

fn try_load<T, F>(lookup: &F, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        })
}
