use std::time::Duration;

use gator_core::AppError;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Connection pool settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// How long a caller waits for a free pooled connection.
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        }
    }

    /// Read configuration from environment variables.
    ///
    /// - `DATABASE_URL` (required)
    /// - `DATABASE_MAX_CONNECTIONS` (optional, defaults to 5, at least 1)
    /// - `DATABASE_ACQUIRE_TIMEOUT_SECS` (optional, defaults to 30)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`DatabaseConfig::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let url = lookup("DATABASE_URL")
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                AppError::ConfigError(
                    "DATABASE_URL not set. Required for database operations.".into(),
                )
            })?;
        let mut config = Self::new(url);

        if let Some(raw) = lookup("DATABASE_MAX_CONNECTIONS") {
            let parsed: u32 = raw.trim().parse().map_err(|_| {
                AppError::ConfigError(format!(
                    "Invalid DATABASE_MAX_CONNECTIONS '{raw}': must be a positive integer"
                ))
            })?;
            if parsed == 0 {
                return Err(AppError::ConfigError(
                    "DATABASE_MAX_CONNECTIONS must be at least 1".into(),
                ));
            }
            config.max_connections = parsed;
        }

        if let Some(raw) = lookup("DATABASE_ACQUIRE_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                AppError::ConfigError(format!(
                    "Invalid DATABASE_ACQUIRE_TIMEOUT_SECS '{raw}': must be whole seconds"
                ))
            })?;
            config.acquire_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config =
            DatabaseConfig::from_lookup(lookup(&[("DATABASE_URL", "postgres://db")])).unwrap();
        assert_eq!(config.url, "postgres://db");
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.acquire_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_missing_url() {
        let err = DatabaseConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[test]
    fn test_max_connections_validated() {
        let zero = lookup(&[
            ("DATABASE_URL", "postgres://db"),
            ("DATABASE_MAX_CONNECTIONS", "0"),
        ]);
        assert!(DatabaseConfig::from_lookup(zero).is_err());

        let junk = lookup(&[
            ("DATABASE_URL", "postgres://db"),
            ("DATABASE_MAX_CONNECTIONS", "lots"),
        ]);
        assert!(DatabaseConfig::from_lookup(junk).is_err());

        let ok = lookup(&[
            ("DATABASE_URL", "postgres://db"),
            ("DATABASE_MAX_CONNECTIONS", "12"),
        ]);
        assert_eq!(DatabaseConfig::from_lookup(ok).unwrap().max_connections, 12);
    }
}
