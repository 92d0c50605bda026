// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! TOML configuration shared by the caller library and the worker daemon.
//!
//! ```toml
//! [channel]
//! ring_capacity = 1024
//! max_datagram = 65536
//! sync_timeout_ms = 0
//!
//! [socket]
//! caller_path = "/run/kapi/caller.sock"
//! worker_path = "/run/kapi/worker.sock"
//!
//! [worker]
//! driver = "emulated"
//! device_memory = 268435456
//! host_region = 67108864
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kapi_wire::{MAX_FIXED_COMMAND_LEN, REPLY_LEN};
use serde::Deserialize;
use thiserror::Error;

/// Configuration load failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// File is not valid TOML for this schema.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: toml::de::Error,
    },
    /// Values parse but cannot be used.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Full configuration document.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct KapiConfig {
    /// Correlation and datagram limits.
    pub channel: ChannelSection,
    /// Unix socket paths.
    pub socket: SocketSection,
    /// Worker settings.
    pub worker: WorkerSection,
}

/// `[channel]`
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelSection {
    /// Correlation table capacity; a power of two.
    pub ring_capacity: usize,
    /// Largest request or reply payload in bytes.
    pub max_datagram: usize,
    /// Bound on sync waits in milliseconds; 0 blocks until the reply arrives.
    pub sync_timeout_ms: u64,
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self { ring_capacity: 1024, max_datagram: 64 * 1024, sync_timeout_ms: 0 }
    }
}

impl ChannelSection {
    /// Sync wait bound, if any.
    pub fn sync_timeout(&self) -> Option<Duration> {
        (self.sync_timeout_ms > 0).then(|| Duration::from_millis(self.sync_timeout_ms))
    }
}

/// `[socket]`
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SocketSection {
    /// Path the caller side binds.
    pub caller_path: PathBuf,
    /// Path the worker side binds.
    pub worker_path: PathBuf,
}

impl Default for SocketSection {
    fn default() -> Self {
        Self {
            caller_path: PathBuf::from("/run/kapi/caller.sock"),
            worker_path: PathBuf::from("/run/kapi/worker.sock"),
        }
    }
}

/// `[worker]`
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerSection {
    /// Driver backend name.
    pub driver: String,
    /// Device memory the emulated driver hands out, in bytes.
    pub device_memory: u64,
    /// Size of the host region shared for copies, in bytes.
    pub host_region: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            driver: "emulated".to_string(),
            device_memory: 256 << 20,
            host_region: 64 << 20,
        }
    }
}

impl KapiConfig {
    /// Reads, parses and validates `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let config: Self = toml::from_str(&text)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that parse but cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacity = self.channel.ring_capacity;
        if capacity == 0 || !capacity.is_power_of_two() || capacity > 1 << 31 {
            return Err(ConfigError::Invalid(format!(
                "channel.ring_capacity must be a power of two, got {capacity}"
            )));
        }
        let floor = MAX_FIXED_COMMAND_LEN.max(REPLY_LEN);
        if self.channel.max_datagram < floor {
            return Err(ConfigError::Invalid(format!(
                "channel.max_datagram must be at least {floor}, got {}",
                self.channel.max_datagram
            )));
        }
        if self.socket.caller_path == self.socket.worker_path {
            return Err(ConfigError::Invalid(
                "socket.caller_path and socket.worker_path must differ".to_string(),
            ));
        }
        if self.worker.driver.is_empty() {
            return Err(ConfigError::Invalid("worker.driver must not be empty".to_string()));
        }
        if self.worker.device_memory == 0 || self.worker.host_region == 0 {
            return Err(ConfigError::Invalid(
                "worker.device_memory and worker.host_region must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
