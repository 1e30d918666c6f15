//! Bootstrap configuration file discovery and loading
//!
//! Config file resolution priority:
//! 1. Explicit path (command-line argument)
//! 2. Environment variable
//! 3. User config directory (`~/.config/whalemap/<file>` on Linux)
//! 4. System config directory (`/etc/whalemap/<file>`, Linux only)
//!
//! A missing file is not an error: callers fall back to compiled defaults.
//! A file that exists but does not parse IS an error.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directory name used under the platform config directory
pub const CONFIG_DIR_NAME: &str = "whalemap";

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter directive (trace, debug, info, warn, error, or a full EnvFilter string)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Locate a config file.
///
/// Returns `None` when no candidate exists; the caller is expected to use defaults.
pub fn find_config_file(
    explicit: Option<&Path>,
    env_var_name: &str,
    file_name: &str,
) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: User config directory
    if let Some(path) = dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(file_name)) {
        if path.exists() {
            return Some(path);
        }
    }

    // Priority 4: System config (Linux)
    if cfg!(target_os = "linux") {
        let system = PathBuf::from("/etc").join(CONFIG_DIR_NAME).join(file_name);
        if system.exists() {
            return Some(system);
        }
    }

    None
}

/// Parse a TOML config file into `T`.
pub fn read_toml_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load config with graceful degradation.
///
/// - No file found → `T::default()` with a warning
/// - Explicit or discovered file that is missing on disk → `T::default()` with a warning
/// - File present but malformed → error
pub fn load_config<T: DeserializeOwned + Default>(
    explicit: Option<&Path>,
    env_var_name: &str,
    file_name: &str,
) -> Result<(T, Option<PathBuf>)> {
    match find_config_file(explicit, env_var_name, file_name) {
        Some(path) if path.exists() => {
            debug!(path = %path.display(), "Loading config file");
            let config = read_toml_config(&path)?;
            Ok((config, Some(path)))
        }
        Some(path) => {
            warn!(
                path = %path.display(),
                "Config file not found, using compiled defaults"
            );
            Ok((T::default(), None))
        }
        None => {
            warn!(file = file_name, "No config file found, using compiled defaults");
            Ok((T::default(), None))
        }
    }
}

/// Standard User-Agent for outbound HTTP requests
pub fn get_user_agent() -> String {
    format!(
        "whalemap/{} (+https://github.com/whalemap/whalemap)",
        env!("CARGO_PKG_VERSION")
    )
}
