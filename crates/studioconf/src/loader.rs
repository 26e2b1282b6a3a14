//! Config file discovery, loading, and environment variable overlay.

use crate::{default_templates, ConfigError, RoomTemplateConfig, StudioConfig, DEFAULT_TEMPLATE};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/studiod/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("studiod/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("studiod.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a config file as a raw TOML table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    contents
        .parse()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Load config from a single TOML file, defaults filling the gaps.
pub fn load_from_file(path: &Path) -> Result<StudioConfig, ConfigError> {
    let table = load_table(path)?;
    from_table(table, Some(&path.to_path_buf()))
}

/// Deep-merge `overlay` into `base`. Nested tables merge key by key; any
/// other value in `overlay` replaces the one in `base`.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Deserialize a merged table into a config.
///
/// Paths are expanded, and the default room template is kept even when a
/// file only declares additional templates.
pub fn from_table(table: toml::Table, origin: Option<&PathBuf>) -> Result<StudioConfig, ConfigError> {
    let mut config = toml::Value::Table(table)
        .try_into::<StudioConfig>()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: origin.cloned().unwrap_or_default(),
            message: e.to_string(),
        })?;

    config.paths.studios_dir = expand_path(&config.paths.studios_dir.to_string_lossy());

    let builtin = default_templates();
    if !config.templates.contains_key(DEFAULT_TEMPLATE) {
        let template = builtin
            .get(DEFAULT_TEMPLATE)
            .cloned()
            .unwrap_or_else(RoomTemplateConfig::default);
        config.templates.insert(DEFAULT_TEMPLATE.to_string(), template);
    }

    Ok(config)
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut StudioConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("STUDIOD_STUDIOS_DIR") {
        config.paths.studios_dir = expand_path(&v);
        sources.env_overrides.push("STUDIOD_STUDIOS_DIR".to_string());
    }

    if let Ok(v) = env::var("STUDIOD_START_TIMEOUT_MS") {
        if let Ok(ms) = v.parse() {
            config.server.start_timeout_ms = ms;
            sources.env_overrides.push("STUDIOD_START_TIMEOUT_MS".to_string());
        }
    }
    if let Ok(v) = env::var("STUDIOD_STOP_TIMEOUT_MS") {
        if let Ok(ms) = v.parse() {
            config.server.stop_timeout_ms = ms;
            sources.env_overrides.push("STUDIOD_STOP_TIMEOUT_MS".to_string());
        }
    }

    if let Ok(v) = env::var("STUDIOD_TICK_MS") {
        if let Ok(ms) = v.parse() {
            config.daemon.tick_ms = ms;
            sources.env_overrides.push("STUDIOD_TICK_MS".to_string());
        }
    }

    if let Ok(v) = env::var("STUDIOD_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("STUDIOD_LOG_LEVEL".to_string());
    }
    // Also support RUST_LOG
    if let Ok(v) = env::var("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // Handle $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}
