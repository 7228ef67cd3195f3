// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;

/// Casura server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// HTTP API bind address
    pub http_addr: SocketAddr,
    /// Bound on command retries after optimistic-lock conflicts
    pub command_retries: u32,
    /// Whether permission checks are enforced
    pub authorization_enabled: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `CASURA_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `CASURA_HTTP_PORT`: HTTP API port (default: 8080)
    /// - `CASURA_COMMAND_RETRIES`: Optimistic-lock retry bound (default: 3)
    /// - `CASURA_AUTHORIZATION_ENABLED`: Enforce permissions (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("CASURA_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("CASURA_DATABASE_URL"))?;

        let http_port: u16 = std::env::var("CASURA_HTTP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("CASURA_HTTP_PORT", "must be a valid port number")
            })?;

        let command_retries: u32 = std::env::var("CASURA_COMMAND_RETRIES")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("CASURA_COMMAND_RETRIES", "must be a non-negative integer")
            })?;

        let authorization_enabled = match std::env::var("CASURA_AUTHORIZATION_ENABLED")
            .unwrap_or_else(|_| "false".to_string())
            .as_str()
        {
            "true" | "1" => true,
            "false" | "0" => false,
            _ => {
                return Err(ConfigError::Invalid(
                    "CASURA_AUTHORIZATION_ENABLED",
                    "must be true or false",
                ));
            }
        };

        Ok(Self {
            database_url,
            http_addr: SocketAddr::from(([0, 0, 0, 0], http_port)),
            command_retries,
            authorization_enabled,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
