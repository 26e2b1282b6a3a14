//! Infrastructure configuration - things that cannot change at runtime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Filesystem paths for persisted studios.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding one document per persisted studio.
    /// Default: ~/.studiod/studios
    #[serde(default = "PathsConfig::default_studios_dir")]
    pub studios_dir: PathBuf,
}

impl PathsConfig {
    fn default_studios_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".studiod/studios"))
            .unwrap_or_else(|| PathBuf::from(".studiod/studios"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            studios_dir: Self::default_studios_dir(),
        }
    }
}

/// Audio server control settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// How long a start request may take before the start command fails.
    /// Default: 5000
    #[serde(default = "ServerConfig::default_timeout_ms")]
    pub start_timeout_ms: u64,

    /// How long a stop request may take before the stop command fails.
    /// Default: 5000
    #[serde(default = "ServerConfig::default_timeout_ms")]
    pub stop_timeout_ms: u64,
}

impl ServerConfig {
    fn default_timeout_ms() -> u64 {
        5000
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            start_timeout_ms: Self::default_timeout_ms(),
            stop_timeout_ms: Self::default_timeout_ms(),
        }
    }
}

/// Driver loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Idle tick period of the driver loop.
    /// Default: 50
    #[serde(default = "DaemonConfig::default_tick_ms")]
    pub tick_ms: u64,
}

impl DaemonConfig {
    fn default_tick_ms() -> u64 {
        50
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            tick_ms: Self::default_tick_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

/// How supervised applications are launched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppsConfig {
    /// Shell used to run an app's command line (`<shell> -c <commandline>`).
    /// Default: sh
    #[serde(default = "AppsConfig::default_shell")]
    pub shell: String,

    /// Terminal wrapper for apps flagged to run in a terminal.
    /// Default: xterm -e
    #[serde(default = "AppsConfig::default_terminal")]
    pub terminal: String,
}

impl AppsConfig {
    fn default_shell() -> String {
        "sh".to_string()
    }

    fn default_terminal() -> String {
        "xterm -e".to_string()
    }
}

impl Default for AppsConfig {
    fn default() -> Self {
        Self {
            shell: Self::default_shell(),
            terminal: Self::default_terminal(),
        }
    }
}
