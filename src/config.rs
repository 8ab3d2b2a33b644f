//! Configuration management for svcctl.
use serde::Deserialize;
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    constants::{
        DEFAULT_CONFIG_FILE, DEFAULT_DENYLIST, DEFAULT_ENTRY_POINT,
        DEFAULT_GRACE_TIMEOUT, DEFAULT_MANIFEST_FILE, DEFAULT_TOOLCHAIN_PROGRAM,
    },
    error::OrchestratorError,
};

/// Represents the structure of the configuration file.
///
/// Every key is optional; omitted keys fall back to the defaults in
/// [`crate::constants`].
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    grace_timeout: Option<String>,
    denylist: Option<Vec<String>>,
    entry_point: Option<String>,
    toolchain: Option<RawToolchain>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawToolchain {
    program: Option<String>,
    manifest: Option<String>,
}

/// Resolved orchestrator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// How long `stop` waits for a graceful exit before killing.
    pub grace_timeout: Duration,
    /// Directory names excluded from discovery.
    pub denylist: Vec<String>,
    /// Build entry point relative to a service directory.
    pub entry_point: PathBuf,
    /// External build tool settings.
    pub toolchain: Toolchain,
}

/// The external build tool and the manifest it maintains.
#[derive(Debug, Clone)]
pub struct Toolchain {
    /// Program invoked for every build step.
    pub program: PathBuf,
    /// Name of the per-service dependency manifest.
    pub manifest: String,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_TOOLCHAIN_PROGRAM),
            manifest: DEFAULT_MANIFEST_FILE.to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            grace_timeout: DEFAULT_GRACE_TIMEOUT,
            denylist: DEFAULT_DENYLIST.iter().map(|name| name.to_string()).collect(),
            entry_point: PathBuf::from(DEFAULT_ENTRY_POINT),
            toolchain: Toolchain::default(),
        }
    }
}

impl Config {
    /// Whether `name` is excluded from discovery.
    pub fn is_denied(&self, name: &str) -> bool {
        self.denylist.iter().any(|denied| denied == name)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, OrchestratorError> {
        let defaults = Config::default();

        let grace_timeout = match raw.grace_timeout {
            Some(value) => parse_duration(&value)?,
            None => defaults.grace_timeout,
        };

        let entry_point = match raw.entry_point {
            Some(value) => {
                let path = PathBuf::from(value.trim());
                if path.as_os_str().is_empty() || path.is_absolute() {
                    return Err(config_error(format!(
                        "entry_point must be a relative path, got '{}'",
                        path.display()
                    )));
                }
                path
            }
            None => defaults.entry_point,
        };

        let toolchain = match raw.toolchain {
            Some(toolchain) => Toolchain {
                program: toolchain
                    .program
                    .map(PathBuf::from)
                    .unwrap_or(defaults.toolchain.program),
                manifest: toolchain.manifest.unwrap_or(defaults.toolchain.manifest),
            },
            None => defaults.toolchain,
        };

        Ok(Self {
            grace_timeout,
            denylist: raw.denylist.unwrap_or(defaults.denylist),
            entry_point,
            toolchain,
        })
    }
}

fn config_error(message: impl Into<String>) -> OrchestratorError {
    OrchestratorError::ConfigParseError(message.into())
}

/// Parses a user-facing duration string in the format `<number>[ms|s|m|h]`.
///
/// A bare number is read as seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, OrchestratorError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(config_error("Duration value cannot be empty"));
    }

    if let Some(stripped) = value.strip_suffix("ms") {
        let amount: u64 = stripped
            .trim()
            .parse()
            .map_err(|_| config_error(format!("Invalid duration value: '{raw}'")))?;
        return Ok(Duration::from_millis(amount));
    }

    let (amount_str, multiplier) = if let Some(stripped) = value.strip_suffix('s') {
        (stripped.trim(), 1)
    } else if let Some(stripped) = value.strip_suffix('m') {
        (stripped.trim(), 60)
    } else if let Some(stripped) = value.strip_suffix('h') {
        (stripped.trim(), 3600)
    } else {
        (value, 1)
    };

    let amount: u64 = amount_str
        .parse()
        .map_err(|_| config_error(format!("Invalid duration value: '{raw}'")))?;

    Ok(Duration::from_secs(amount.saturating_mul(multiplier)))
}

/// Parses configuration from YAML text.
pub fn parse_config(content: &str) -> Result<Config, OrchestratorError> {
    if content.trim().is_empty() {
        return Ok(Config::default());
    }
    let raw: RawConfig = serde_yaml::from_str(content)?;
    Config::from_raw(raw)
}

/// Loads the configuration file.
///
/// With an explicit `config_path` the file must exist. Otherwise
/// `svcctl.yaml` in `workspace` is used when present, and the defaults when not.
pub fn load_config(
    workspace: &Path,
    config_path: Option<&Path>,
) -> Result<Config, OrchestratorError> {
    let (path, required) = match config_path {
        Some(path) if path.is_absolute() => (path.to_path_buf(), true),
        Some(path) => (workspace.join(path), true),
        None => (workspace.join(DEFAULT_CONFIG_FILE), false),
    };

    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound && !required => {
            return Ok(Config::default());
        }
        Err(e) => {
            return Err(OrchestratorError::ConfigReadError(std::io::Error::new(
                e.kind(),
                format!("{} ({})", e, path.display()),
            )));
        }
    };

    parse_config(&content)
}
