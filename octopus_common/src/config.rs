//! Configuration loading for the Octopus workspace.
//!
//! Provides a standardized way to load the TOML configuration shared by the
//! `octopus` binary and its subsystems: serial device, IPC socket path, task
//! scheduler tick, thread-pool sizing, and the ack-policy switch.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Log level for configuration.
///
/// Serializes to lowercase strings: "trace", "debug", "info", "warn", "error".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace-level verbosity.
    Trace,
    /// Debug-level verbosity.
    Debug,
    /// Info-level verbosity (default).
    Info,
    /// Warning-level verbosity.
    Warn,
    /// Error-level verbosity.
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at the specified path.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parsing failed.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Trait for loading configuration from TOML files.
///
/// Provides a default implementation for any type implementing
/// `serde::de::DeserializeOwned`.
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.display().to_string())
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_serial_device() -> String {
    "/dev/ttyS1".to_string()
}

fn default_serial_baud() -> u32 {
    115_200
}

fn default_ipc_socket_path() -> String {
    crate::consts::DEFAULT_IPC_SOCKET_PATH.to_string()
}

fn default_task_tick_ms() -> u32 {
    crate::consts::TASK_TICK_MS
}

fn default_threadpool_workers() -> usize {
    4
}

fn default_threadpool_queue_size() -> usize {
    20
}

fn default_bus_dispatchers() -> usize {
    4
}

fn default_bus_queue_size() -> usize {
    100
}

fn default_push_interval_cs() -> u32 {
    10
}

/// Top-level system configuration, loaded from `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemConfig {
    /// Logging verbosity.
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Serial device path for the MCU link.
    #[serde(default = "default_serial_device")]
    pub serial_device: String,

    /// Serial baud rate.
    #[serde(default = "default_serial_baud")]
    pub serial_baud: u32,

    /// Unix-domain socket path for the IPC transport.
    #[serde(default = "default_ipc_socket_path")]
    pub ipc_socket_path: String,

    /// Scheduler tick interval, in milliseconds.
    #[serde(default = "default_task_tick_ms")]
    pub task_tick_ms: u32,

    /// Whether the PTL should transmit ack frames (§4.6 ack policy gate).
    #[serde(default)]
    pub ptl_acks_enabled: bool,

    /// Default push interval for newly subscribed IPC clients, in
    /// centiseconds.
    #[serde(default = "default_push_interval_cs")]
    pub default_push_interval_cs: u32,

    /// Thread-pool worker count.
    #[serde(default = "default_threadpool_workers")]
    pub threadpool_workers: usize,

    /// Thread-pool bounded queue size.
    #[serde(default = "default_threadpool_queue_size")]
    pub threadpool_queue_size: usize,

    /// Message-bus dispatcher thread count.
    #[serde(default = "default_bus_dispatchers")]
    pub bus_dispatchers: usize,

    /// Message-bus internal queue bound.
    #[serde(default = "default_bus_queue_size")]
    pub bus_queue_size: usize,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            serial_device: default_serial_device(),
            serial_baud: default_serial_baud(),
            ipc_socket_path: default_ipc_socket_path(),
            task_tick_ms: default_task_tick_ms(),
            ptl_acks_enabled: false,
            default_push_interval_cs: default_push_interval_cs(),
            threadpool_workers: default_threadpool_workers(),
            threadpool_queue_size: default_threadpool_queue_size(),
            bus_dispatchers: default_bus_dispatchers(),
            bus_queue_size: default_bus_queue_size(),
        }
    }
}

impl SystemConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.task_tick_ms == 0 {
            return Err(ConfigError::ValidationError(
                "task_tick_ms must be > 0".to_string(),
            ));
        }
        if self.threadpool_workers == 0 {
            return Err(ConfigError::ValidationError(
                "threadpool_workers must be > 0".to_string(),
            ));
        }
        if self.threadpool_queue_size == 0 {
            return Err(ConfigError::ValidationError(
                "threadpool_queue_size must be > 0".to_string(),
            ));
        }
        if self.ipc_socket_path.is_empty() {
            return Err(ConfigError::ValidationError(
                "ipc_socket_path cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
