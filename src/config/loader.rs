//! Configuration loader

use config::{Config, Environment, File};
use std::path::Path;

use super::types::{ClientConfig, Credentials, SessionSettings};
use crate::common::errors::{ClientError, Result};

/// Load configuration from file and environment variables
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with ZENITH__, nested with __)
/// 2. Configuration file (TOML format)
/// 3. Default values
pub fn load_config(config_path: Option<&str>) -> Result<ClientConfig> {
    let mut builder = Config::builder();

    if let Some(path) = config_path {
        if Path::new(path).exists() {
            builder = builder.add_source(File::with_name(path).required(false));
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("ZENITH")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder
        .build()
        .map_err(|e| ClientError::Configuration(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ClientError::Configuration(e.to_string()))
}

/// Load configuration from flat environment variables only
pub fn load_from_env() -> Result<ClientConfig> {
    dotenvy::dotenv().ok();

    let required = |name: &str| {
        std::env::var(name)
            .map_err(|_| ClientError::Configuration(format!("{} is not set", name)))
    };

    let credentials = Credentials::new(
        required("ZENITH_CLIENT_ID")?,
        required("ZENITH_CLIENT_SECRET")?,
        required("ZENITH_USERNAME")?,
        required("ZENITH_PASSWORD")?,
    );

    let flag = |name: &str| {
        std::env::var(name)
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false)
    };

    let mut settings = SessionSettings::default();
    if let Ok(level) = std::env::var("ZENITH_LOG_LEVEL") {
        settings.log_level = level;
    }

    Ok(ClientConfig {
        credentials,
        staging: flag("ZENITH_STAGING"),
        protocol_version: std::env::var("ZENITH_PROTOCOL_VERSION").ok(),
        debug: flag("ZENITH_DEBUG"),
        settings,
    })
}
