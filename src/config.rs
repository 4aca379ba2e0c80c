use std::str::FromStr;

use crate::errors::AppError;
use crate::jwt::JwtConfig;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_AUDIT_CHANNEL_CAPACITY: usize = 1024;

/// Process configuration gathered from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub jwt: JwtConfig,
    pub audit_channel_capacity: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url = std::env::var("DATABASE_URL").map_err(|_| AppError::configuration("DATABASE_URL not set"))?;

        Ok(Self {
            database_url,
            port: env_or("APP_PORT", DEFAULT_PORT)?,
            jwt: JwtConfig::from_env()?,
            audit_channel_capacity: audit_channel_capacity()?,
        })
    }
}

pub fn audit_channel_capacity() -> Result<usize, AppError> {
    let capacity = env_or("AUDIT_CHANNEL_CAPACITY", DEFAULT_AUDIT_CHANNEL_CAPACITY)?;
    if capacity == 0 {
        return Err(AppError::configuration("AUDIT_CHANNEL_CAPACITY must be greater than zero"));
    }
    Ok(capacity)
}

/// Parses `key` when set, falling back to `default` when absent.
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::configuration(format!("{key} has an invalid value: {raw}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_uses_default() {
        let port: u16 = env_or("TASKSCOPE_TEST_UNSET_PORT", 8000).unwrap();
        assert_eq!(port, 8000);
    }

    #[test]
    fn malformed_value_is_configuration_error() {
        std::env::set_var("TASKSCOPE_TEST_BAD_PORT", "eighty");
        let err = env_or::<u16>("TASKSCOPE_TEST_BAD_PORT", 8000).unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }
}
