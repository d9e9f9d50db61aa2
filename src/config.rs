//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.

use serde::Deserialize;
use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Error, Debug)]
#[allow(dead_code)]
pub enum ConfigError {
    #[error("Failed to load environment variables: {0}")]
    EnvLoad(#[from] dotenvy::Error),

    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0),
            port: 8001,
        }
    }
}

/// Policy decision point configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8181".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Governed execution configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Row limit injected into unbounded SELECTs when the policy does not
    /// set its own max_rows constraint.
    pub default_max_rows: i64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_max_rows: 100,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3001".to_string()],
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub policy: PolicyConfig,
    pub execution: ExecutionConfig,
    pub cors: CorsConfig,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let server = ServerConfig {
            host: std::env::var("HOST")
                .ok()
                .and_then(|h| h.parse().ok())
                .unwrap_or_else(|| ServerConfig::default().host),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or_else(|| ServerConfig::default().port),
        };

        let policy = PolicyConfig {
            url: std::env::var("POLICY_URL")
                .unwrap_or_else(|_| PolicyConfig::default().url),
            timeout_secs: std::env::var("POLICY_TIMEOUT_SECS")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or_else(|| PolicyConfig::default().timeout_secs),
        };

        let execution = ExecutionConfig {
            default_max_rows: std::env::var("DEFAULT_MAX_ROWS")
                .ok()
                .and_then(|n| n.parse().ok())
                .unwrap_or_else(|| ExecutionConfig::default().default_max_rows),
        };

        let cors = CorsConfig {
            allowed_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                .map(|origins| {
                    origins
                        .split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_else(|_| CorsConfig::default().allowed_origins),
        };

        Ok(Self {
            server,
            policy,
            execution,
            cors,
        })
    }
}
