// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Gateway configuration: defaults, config-file parsing, and command-line
//! overrides.
//!
//! Settings are loaded in three layers, later layers winning:
//! 1. compiled-in defaults,
//! 2. the first `gateway.config` file found in a fixed set of paths,
//! 3. `key=value` command-line tokens.
//!
//! A command-line key made of exactly two alphabetic characters is a country
//! ISO mapping (`US=http://us-backend:9005`); every other key overrides the
//! config-file field of the same name.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::backend::BackendTarget;

/// StatsD keys published by the gateway. Only `metric.X` where 1 <= X <= 5
/// are accepted by the metrics backend.
pub mod metric {
    pub const CODE_EXCEPTION: &str = "metric.1";
    pub const JSON_ERROR: &str = "metric.2";
    pub const CIRCUIT_BREAKER_LOGGED: &str = "metric.3";
    pub const REQUEST_TIMED_OUT: &str = "metric.5";
}

/// Locations probed for the configuration file, in order. The first readable
/// file wins.
pub const CONFIG_FILE_PATHS: &[&str] = &[
    "gateway.config",
    "../gateway.config",
    "/app/gateway.config",
    "../../gateway.config",
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid argument format: {0:?}. Expected non-empty key=value format")]
    InvalidArgument(String),
}

/// Log verbosity, using the configuration surface's historical level names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    #[default]
    Cerror,
}

impl LogLevel {
    /// Level directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_env_filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Cerror => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" => Ok(LogLevel::Warning),
            "CERROR" => Ok(LogLevel::Cerror),
            _ => Err(format!(
                "Invalid log level: {s:?}. Valid levels are: DEBUG, INFO, WARNING, CERROR"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Country ISO (uppercase) to upstream target.
    pub country_backend_map: HashMap<String, BackendTarget>,

    // Cache configuration
    pub use_redis: bool,
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_ttl: Duration,
    pub in_memory_cache_ttl: Duration,
    pub in_memory_cache_max_size: usize,

    // Server configuration
    pub frontend_port: u16,
    pub max_response_queue_size: usize,

    pub log_level: LogLevel,

    // Metrics
    pub metrics_batch_size: usize,
    pub metrics_send_interval: Duration,

    // Request handling
    pub server_sla: Duration,
    pub average_processing_time: Duration,
    pub drop_sla_timeout_requests: bool,

    pub breaker_cooldown: Duration,

    // Upstream network budgets
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub upstream_deadline_safety_margin: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        let redis_ttl = Duration::from_secs(3600 * 24);
        Self {
            country_backend_map: HashMap::new(),
            use_redis: true,
            redis_host: "localhost".to_string(),
            redis_port: 6379,
            redis_ttl,
            in_memory_cache_ttl: redis_ttl,
            in_memory_cache_max_size: 10_000,
            frontend_port: 9000,
            max_response_queue_size: 100,
            log_level: LogLevel::default(),
            metrics_batch_size: 100,
            metrics_send_interval: Duration::from_millis(1000),
            server_sla: Duration::from_micros(1_000_000),
            average_processing_time: Duration::from_micros(1200),
            drop_sla_timeout_requests: false,
            breaker_cooldown: Duration::from_millis(10),
            connect_timeout: Duration::from_micros(25_000),
            read_timeout: Duration::from_micros(50_000),
            upstream_deadline_safety_margin: Duration::from_millis(25),
        }
    }
}

impl fmt::Display for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "// --- Configuration Params Start --- //")?;
        writeln!(f, "frontend_port: {}", self.frontend_port)?;
        writeln!(f, "server_sla: {:?}", self.server_sla)?;
        writeln!(
            f,
            "average_processing_time: {:?}",
            self.average_processing_time
        )?;
        writeln!(
            f,
            "drop_sla_timeout_requests: {}",
            self.drop_sla_timeout_requests
        )?;
        writeln!(f, "use_redis: {}", self.use_redis)?;
        writeln!(f, "redis_host: {}", self.redis_host)?;
        writeln!(f, "redis_port: {}", self.redis_port)?;
        writeln!(f, "redis_ttl: {:?}", self.redis_ttl)?;
        writeln!(f, "in_memory_cache_ttl: {:?}", self.in_memory_cache_ttl)?;
        writeln!(
            f,
            "in_memory_cache_max_size: {}",
            self.in_memory_cache_max_size
        )?;
        writeln!(f, "log_level: {:?}", self.log_level)?;
        writeln!(f, "metrics_batch_size: {}", self.metrics_batch_size)?;
        writeln!(f, "metrics_send_interval: {:?}", self.metrics_send_interval)?;
        writeln!(f, "breaker_cooldown: {:?}", self.breaker_cooldown)?;
        writeln!(f, "connect_timeout: {:?}", self.connect_timeout)?;
        writeln!(f, "read_timeout: {:?}", self.read_timeout)?;
        writeln!(f, "--- Country_ISO : backend endpoint URL map ---")?;
        let mut countries: Vec<_> = self.country_backend_map.iter().collect();
        countries.sort_by_key(|(country, _)| country.as_str());
        for (country, target) in countries {
            writeln!(f, "{country} : {}", target.url)?;
        }
        write!(f, "// --- Configuration Params End --- //")
    }
}

/// Splits `key=value` command-line tokens into an ordered map. Any token
/// without a `=` or with an empty key fails the whole parse.
pub fn parse_arguments(args: &[String]) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut parsed = BTreeMap::new();
    for arg in args {
        match arg.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                parsed.insert(key.to_string(), value.to_string());
            }
            _ => return Err(ConfigError::InvalidArgument(arg.clone())),
        }
    }
    Ok(parsed)
}

/// Builds the effective configuration from the config file (if any) plus
/// command-line arguments.
pub fn load_configuration(startup_args: &BTreeMap<String, String>) -> AppConfig {
    let mut config = AppConfig::default();

    let mut config_found = false;
    for path in CONFIG_FILE_PATHS {
        if let Ok(contents) = std::fs::read_to_string(path) {
            // The tracing subscriber is not up yet (its level comes from this
            // very file), so configuration diagnostics go to stderr.
            eprintln!("Reading configuration from {path}");
            apply_config_text(&mut config, &contents);
            config_found = true;
            break;
        }
    }
    if !config_found {
        eprintln!(
            "Warning: Configuration file not found in any standard location. \
             Using defaults and command-line arguments"
        );
    }

    for (key, value) in startup_args {
        if key.len() == 2 && key.chars().all(|c| c.is_ascii_alphabetic()) {
            let country_iso = key.to_uppercase();
            if !(value.starts_with("http://") || value.starts_with("https://")) {
                eprintln!(
                    "Warning: Invalid URL format provided for country {country_iso:?}: {value:?}. \
                     Expected URL starting with http:// or https://"
                );
                continue;
            }
            match BackendTarget::parse(value) {
                Ok(target) => {
                    config.country_backend_map.insert(country_iso, target);
                }
                Err(e) => eprintln!("Warning: Invalid backend URL for country {country_iso:?}: {e}"),
            }
        } else {
            // Command-line overrides take precedence over config-file values.
            apply_setting(&mut config, key, value);
        }
    }

    config
}

/// Applies newline-delimited `key = value` configuration text. Blank lines
/// and `#` comments are skipped.
pub fn apply_config_text(config: &mut AppConfig, contents: &str) {
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let value = value.trim();
            if !key.is_empty() {
                apply_setting(config, key, value);
            }
        }
    }
}

fn parse_or_warn<T: FromStr>(key: &str, value: &str) -> Option<T> {
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            eprintln!("Warning: Invalid value for {key} in configuration: {value:?}");
            None
        }
    }
}

fn apply_setting(config: &mut AppConfig, key: &str, value: &str) {
    match key {
        "frontend_port" => {
            if let Some(port) = parse_or_warn(key, value) {
                config.frontend_port = port;
            }
        }
        "redis_host" => config.redis_host = value.to_string(),
        "redis_port" => {
            if let Some(port) = parse_or_warn(key, value) {
                config.redis_port = port;
            }
        }
        // Provided in hours.
        "redis_ttl" => {
            if let Some(hours) = parse_or_warn::<u64>(key, value) {
                config.redis_ttl = Duration::from_secs(hours * 3600);
            }
        }
        "use_redis" => {
            if let Some(flag) = parse_or_warn::<i64>(key, value) {
                config.use_redis = flag == 1;
            }
        }
        // Provided in hours.
        "in_memory_cache_ttl" => {
            if let Some(hours) = parse_or_warn::<u64>(key, value) {
                config.in_memory_cache_ttl = Duration::from_secs(hours * 3600);
            }
        }
        "in_memory_cache_max_size" => {
            if let Some(size) = parse_or_warn(key, value) {
                config.in_memory_cache_max_size = size;
            }
        }
        "log_level" => match value.parse() {
            Ok(level) => config.log_level = level,
            Err(e) => eprintln!("Warning: {e}"),
        },
        "metrics_batch_size" => {
            if let Some(size) = parse_or_warn(key, value) {
                config.metrics_batch_size = size;
            }
        }
        // Provided in milliseconds.
        "metrics_send_interval" => {
            if let Some(millis) = parse_or_warn::<u64>(key, value) {
                config.metrics_send_interval = Duration::from_millis(millis);
            }
        }
        "max_response_queue_size" => {
            if let Some(size) = parse_or_warn(key, value) {
                config.max_response_queue_size = size;
            }
        }
        "drop_sla_timeout_requests" => {
            if let Some(flag) = parse_or_warn::<i64>(key, value) {
                config.drop_sla_timeout_requests = flag == 1;
            }
        }
        _ => eprintln!("Warning: Ignoring unknown configuration key {key:?}"),
    }
}
