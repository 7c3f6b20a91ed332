// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants::{
    DEFAULT_BUFFER_FLUSH_INTERVAL, DEFAULT_BUFFER_MAX_SIZE, DEFAULT_CREDENTIALS_CACHE_TTL,
    DEFAULT_CREDENTIALS_RETRY_DELAY, DEFAULT_HOST, DEFAULT_MAX_BODY_SIZE, DEFAULT_PORT,
    DEFAULT_WRITE_TIMEOUT,
};
use crate::errors::ConfigError;
use crate::writer::WriterConfig;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// JSON table of credentials records
    pub credentials_file: PathBuf,
    pub credentials_cache_ttl: Duration,
    pub credentials_retry_delay: Duration,
    pub buffer_max_size: usize,
    pub buffer_flush_interval: Duration,
    /// Timeout for each destination write
    pub write_timeout: Duration,
    pub max_body_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        let credentials_file = env::var("LOGSNARF_CREDENTIALS_FILE")
            .map(PathBuf::from)
            .map_err(|_| ConfigError::Missing("LOGSNARF_CREDENTIALS_FILE"))?;

        Ok(Config {
            host: env::var("LOGSNARF_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
            port: parse_var("LOGSNARF_PORT")?.unwrap_or(DEFAULT_PORT),
            credentials_file,
            credentials_cache_ttl: parse_var("LOGSNARF_CREDENTIALS_CACHE_TTL")?
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_CREDENTIALS_CACHE_TTL),
            credentials_retry_delay: parse_var("LOGSNARF_CREDENTIALS_RETRY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_CREDENTIALS_RETRY_DELAY),
            buffer_max_size: parse_var("LOGSNARF_BUFFER_MAX_SIZE")?
                .unwrap_or(DEFAULT_BUFFER_MAX_SIZE),
            buffer_flush_interval: match parse_var("LOGSNARF_BUFFER_FLUSH_INTERVAL")? {
                Some(0) => {
                    return Err(ConfigError::Invalid {
                        name: "LOGSNARF_BUFFER_FLUSH_INTERVAL",
                        value: "0".to_string(),
                    })
                }
                Some(secs) => Duration::from_secs(secs),
                None => DEFAULT_BUFFER_FLUSH_INTERVAL,
            },
            write_timeout: parse_var("LOGSNARF_WRITE_TIMEOUT")?
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_WRITE_TIMEOUT),
            max_body_size: parse_var("LOGSNARF_MAX_BODY_SIZE")?.unwrap_or(DEFAULT_MAX_BODY_SIZE),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            max_size: self.buffer_max_size,
            flush_interval: self.buffer_flush_interval,
        }
    }
}

/// `Ok(None)` when unset or empty.
fn parse_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value }),
        _ => Ok(None),
    }
}
