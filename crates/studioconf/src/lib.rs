//! Minimal configuration loading for the studiod session daemon.
//!
//! The daemon reads everything it needs at startup from here: where studios
//! are persisted, how long audio server start/stop requests may take, the
//! driver tick period, logging, how apps are launched, and the room
//! templates rooms are created from.
//!
//! # Usage
//!
//! ```rust,no_run
//! use studioconf::StudioConfig;
//!
//! let config = StudioConfig::load().expect("Failed to load config");
//!
//! println!("studios: {}", config.paths.studios_dir.display());
//! println!("start timeout: {:?}", config.server.start_timeout());
//! for name in config.templates.keys() {
//!     println!("room template {}", name);
//! }
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/studiod/config.toml` (system)
//! 2. `~/.config/studiod/config.toml` (user)
//! 3. `./studiod.toml` (local override, or a path given on the command line)
//! 4. Environment variables (`STUDIOD_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! studios_dir = "~/.studiod/studios"
//!
//! [server]
//! start_timeout_ms = 5000
//! stop_timeout_ms = 5000
//!
//! [daemon]
//! tick_ms = 50
//!
//! [telemetry]
//! log_level = "info"
//!
//! [apps]
//! shell = "sh"
//! terminal = "xterm -e"
//!
//! [templates.Default]
//! audio_inputs = 2
//! audio_outputs = 2
//! midi_inputs = 1
//! midi_outputs = 1
//! ```

pub mod infra;
pub mod loader;
pub mod templates;

pub use infra::{AppsConfig, DaemonConfig, PathsConfig, ServerConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};
pub use templates::{default_templates, RoomTemplateConfig, TemplatesConfig, DEFAULT_TEMPLATE};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudioConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub apps: AppsConfig,

    #[serde(default = "default_templates")]
    pub templates: TemplatesConfig,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            server: ServerConfig::default(),
            daemon: DaemonConfig::default(),
            telemetry: TelemetryConfig::default(),
            apps: AppsConfig::default(),
            templates: default_templates(),
        }
    }
}

impl StudioConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, letting `config_path` replace the local
    /// `./studiod.toml` override. System and user configs still load first.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::from_table(merged, sources.files.last())?;
        loader::apply_env_overrides(&mut config, &mut sources);
        config.validate()?;

        Ok((config, sources))
    }

    /// Reject values the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.apps.shell.trim().is_empty() {
            return Err(ConfigError::Invalid("apps.shell must not be empty".to_string()));
        }
        if !self.templates.contains_key(DEFAULT_TEMPLATE) {
            return Err(ConfigError::Invalid(format!(
                "room template \"{}\" is missing",
                DEFAULT_TEMPLATE
            )));
        }
        Ok(())
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        // Build TOML manually for nicer formatting
        let mut output = String::new();

        output.push_str("# studiod Configuration\n\n");

        output.push_str("[paths]\n");
        output.push_str(&format!(
            "studios_dir = \"{}\"\n",
            self.paths.studios_dir.display()
        ));

        output.push_str("\n[server]\n");
        output.push_str(&format!(
            "start_timeout_ms = {}\n",
            self.server.start_timeout_ms
        ));
        output.push_str(&format!("stop_timeout_ms = {}\n", self.server.stop_timeout_ms));

        output.push_str("\n[daemon]\n");
        output.push_str(&format!("tick_ms = {}\n", self.daemon.tick_ms));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));

        output.push_str("\n[apps]\n");
        output.push_str(&format!("shell = \"{}\"\n", self.apps.shell));
        output.push_str(&format!("terminal = \"{}\"\n", self.apps.terminal));

        for (name, template) in &self.templates {
            output.push_str(&format!("\n[templates.{}]\n", name));
            output.push_str(&format!("audio_inputs = {}\n", template.audio_inputs));
            output.push_str(&format!("audio_outputs = {}\n", template.audio_outputs));
            output.push_str(&format!("midi_inputs = {}\n", template.midi_inputs));
            output.push_str(&format!("midi_outputs = {}\n", template.midi_outputs));
        }

        output
    }
}
