// Configuration management

use crate::core::errors::AegisError;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Application configuration loaded from environment variables.
///
/// All values are validated on load with clear error messages. A `.env`
/// file is honored in development.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub bind_address: String,
    pub port: u16,

    // Database configuration
    pub database_url: String,
    pub database_max_connections: u32,

    // Object library directory (YAML frameworks/matrices), optional
    pub library_path: Option<PathBuf>,

    // Bootstrap administrator (optional, seeded on first start)
    pub bootstrap_admin_email: Option<String>,
    pub bootstrap_admin_password: Option<String>,

    // Session configuration
    pub session_ttl_secs: u64,

    // Middleware configuration
    pub request_timeout_secs: u64,
    pub body_size_limit_bytes: usize,
    pub attachment_size_limit_bytes: usize,

    // Logging configuration
    pub log_level: String,
    pub log_format: String, // "json" or "text"
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    /// Returns a configuration error for malformed or out-of-range values.
    pub fn from_env() -> Result<Self, AegisError> {
        // Load .env file if present (development). Skipped under test so
        // the suite does not depend on the developer's environment.
        #[cfg(not(test))]
        {
            dotenv::dotenv().ok();
        }

        let config = Self {
            bind_address: Self::get_env_or_default("BIND_ADDRESS", "0.0.0.0")?,
            port: Self::parse_port()?,
            database_url: Self::get_env_or_default("DATABASE_URL", "sqlite://aegis.db")?,
            database_max_connections: Self::parse_u32_or_default("DATABASE_MAX_CONNECTIONS", 5)?,
            library_path: Self::get_optional_path("LIBRARY_PATH")?,
            bootstrap_admin_email: Self::get_optional_env("BOOTSTRAP_ADMIN_EMAIL")?,
            bootstrap_admin_password: Self::get_optional_env("BOOTSTRAP_ADMIN_PASSWORD")?,
            session_ttl_secs: Self::parse_u64_or_default("SESSION_TTL_SECS", 12 * 3600)?,
            request_timeout_secs: Self::parse_u64_or_default("REQUEST_TIMEOUT_SECS", 30)?,
            body_size_limit_bytes: Self::parse_usize_or_default(
                "BODY_SIZE_LIMIT_BYTES",
                8 * 1024 * 1024,
            )?,
            attachment_size_limit_bytes: Self::parse_usize_or_default(
                "ATTACHMENT_SIZE_LIMIT_BYTES",
                4 * 1024 * 1024,
            )?,
            log_level: Self::get_env_or_default("LOG_LEVEL", "info")?,
            log_format: Self::get_env_or_default("LOG_FORMAT", "json")?,
        };

        config.validate()?;

        Ok(config)
    }

    fn get_env_or_default(key: &str, default: &str) -> Result<String, AegisError> {
        Ok(env::var(key).unwrap_or_else(|_| default.to_string()))
    }

    fn get_optional_env(key: &str) -> Result<Option<String>, AegisError> {
        match env::var(key) {
            Ok(value) if !value.is_empty() => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    fn get_optional_path(key: &str) -> Result<Option<PathBuf>, AegisError> {
        match env::var(key) {
            Ok(value) if !value.is_empty() => Ok(Some(PathBuf::from(value))),
            _ => Ok(None),
        }
    }

    fn parse_port() -> Result<u16, AegisError> {
        let port_str = env::var("PORT").unwrap_or_else(|_| "8000".to_string());
        let port = port_str.parse::<u16>().map_err(|e| {
            AegisError::Configuration(format!("Invalid PORT value '{}': {}", port_str, e))
        })?;

        if port == 0 {
            return Err(AegisError::Configuration(
                "PORT must be between 1 and 65535".to_string(),
            ));
        }

        Ok(port)
    }

    fn parse_u64_or_default(key: &str, default: u64) -> Result<u64, AegisError> {
        match env::var(key) {
            Ok(value) => {
                let parsed = value.parse::<u64>().map_err(|e| {
                    AegisError::Configuration(format!("Invalid {} value '{}': {}", key, value, e))
                })?;

                if parsed == 0 {
                    return Err(AegisError::Configuration(format!(
                        "{} must be greater than 0",
                        key
                    )));
                }

                Ok(parsed)
            }
            _ => Ok(default),
        }
    }

    fn parse_u32_or_default(key: &str, default: u32) -> Result<u32, AegisError> {
        match env::var(key) {
            Ok(value) => {
                let parsed = value.parse::<u32>().map_err(|e| {
                    AegisError::Configuration(format!("Invalid {} value '{}': {}", key, value, e))
                })?;

                if parsed == 0 {
                    return Err(AegisError::Configuration(format!(
                        "{} must be greater than 0",
                        key
                    )));
                }

                Ok(parsed)
            }
            _ => Ok(default),
        }
    }

    fn parse_usize_or_default(key: &str, default: usize) -> Result<usize, AegisError> {
        match env::var(key) {
            Ok(value) => {
                let parsed = value.parse::<usize>().map_err(|e| {
                    AegisError::Configuration(format!("Invalid {} value '{}': {}", key, value, e))
                })?;

                if parsed == 0 {
                    return Err(AegisError::Configuration(format!(
                        "{} must be greater than 0",
                        key
                    )));
                }

                Ok(parsed)
            }
            _ => Ok(default),
        }
    }

    fn validate(&self) -> Result<(), AegisError> {
        Self::validate_database_url(&self.database_url)?;

        if let Some(ref path) = self.library_path {
            if !path.exists() {
                return Err(AegisError::Configuration(format!(
                    "Library directory not found at {:?}",
                    path
                )));
            }
            if !path.is_dir() {
                return Err(AegisError::Configuration(format!(
                    "LIBRARY_PATH is not a directory: {:?}",
                    path
                )));
            }
        }

        // Bootstrap admin needs both halves or neither.
        if self.bootstrap_admin_email.is_some() != self.bootstrap_admin_password.is_some() {
            return Err(AegisError::Configuration(
                "BOOTSTRAP_ADMIN_EMAIL and BOOTSTRAP_ADMIN_PASSWORD must be set together"
                    .to_string(),
            ));
        }

        Self::validate_log_level(&self.log_level)?;
        Self::validate_log_format(&self.log_format)?;

        Ok(())
    }

    fn validate_database_url(database_url: &str) -> Result<(), AegisError> {
        let parsed = url::Url::parse(database_url).map_err(|e| {
            AegisError::Configuration(format!("Invalid DATABASE_URL '{}': {}", database_url, e))
        })?;
        if parsed.scheme() != "sqlite" {
            return Err(AegisError::Configuration(format!(
                "Unsupported DATABASE_URL scheme '{}': expected sqlite://",
                parsed.scheme()
            )));
        }
        Ok(())
    }

    fn validate_log_level(level: &str) -> Result<(), AegisError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&level.to_lowercase().as_str()) {
            return Err(AegisError::Configuration(format!(
                "Invalid LOG_LEVEL '{}': must be one of {}",
                level,
                valid_levels.join(", ")
            )));
        }
        Ok(())
    }

    fn validate_log_format(format: &str) -> Result<(), AegisError> {
        if format != "json" && format != "text" {
            return Err(AegisError::Configuration(format!(
                "Invalid LOG_FORMAT '{}': must be 'json' or 'text'",
                format
            )));
        }
        Ok(())
    }
}

impl Config {
    /// Test configuration: in-memory database, no library, no bootstrap
    /// admin.
    pub fn test_config() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8000,
            database_url: "sqlite::memory:".to_string(),
            database_max_connections: 1,
            library_path: None,
            bootstrap_admin_email: None,
            bootstrap_admin_password: None,
            session_ttl_secs: 3600,
            request_timeout_secs: 30,
            body_size_limit_bytes: 8 * 1024 * 1024,
            attachment_size_limit_bytes: 4 * 1024 * 1024,
            log_level: "info".to_string(),
            log_format: "json".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_env_or_default() {
        env::set_var("AEGIS_TEST_VAR", "test_value");
        let result = Config::get_env_or_default("AEGIS_TEST_VAR", "default").unwrap();
        assert_eq!(result, "test_value");
        env::remove_var("AEGIS_TEST_VAR");
    }

    #[test]
    fn test_get_env_or_default_missing() {
        env::remove_var("AEGIS_TEST_VAR_MISSING");
        let result = Config::get_env_or_default("AEGIS_TEST_VAR_MISSING", "default").unwrap();
        assert_eq!(result, "default");
    }

    #[test]
    fn test_parse_port_invalid() {
        env::set_var("PORT", "99999");
        assert!(Config::parse_port().is_err());
        env::remove_var("PORT");
    }

    #[test]
    fn test_validate_database_url() {
        assert!(Config::validate_database_url("sqlite://aegis.db").is_ok());
        assert!(Config::validate_database_url("sqlite::memory:").is_ok());
        assert!(Config::validate_database_url("postgres://localhost/db").is_err());
        assert!(Config::validate_database_url("not-a-url").is_err());
    }

    #[test]
    fn test_validate_log_level() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert!(Config::validate_log_level(level).is_ok());
        }
        assert!(Config::validate_log_level("verbose").is_err());
    }

    #[test]
    fn test_validate_log_format() {
        assert!(Config::validate_log_format("json").is_ok());
        assert!(Config::validate_log_format("text").is_ok());
        assert!(Config::validate_log_format("xml").is_err());
    }

    #[test]
    fn test_bootstrap_admin_requires_both_fields() {
        let mut config = Config::test_config();
        config.bootstrap_admin_email = Some("admin@example.com".to_string());
        assert!(config.validate().is_err());

        config.bootstrap_admin_password = Some("hunter2hunter2".to_string());
        assert!(config.validate().is_ok());
    }
}
