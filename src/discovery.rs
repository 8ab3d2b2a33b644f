//! Finds buildable service projects under a workspace directory.
use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{
    config::Config,
    constants::{BIN_DIR, binary_name},
    error::OrchestratorError,
};

/// Identity of a service project and the paths derived from its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    name: String,
    root: PathBuf,
    entry_point: PathBuf,
}

impl ServiceDescriptor {
    /// Derives the descriptor for `name` inside `workspace`.
    pub fn new(workspace: &Path, name: &str, config: &Config) -> Self {
        let root = workspace.join(name);
        let entry_point = root.join(&config.entry_point);
        Self {
            name: name.to_string(),
            root,
            entry_point,
        }
    }

    /// Service name, equal to its directory name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Service source root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The build entry point file.
    pub fn entry_point(&self) -> &Path {
        &self.entry_point
    }

    /// Directory holding the entry point; compilation runs from here.
    pub fn source_dir(&self) -> &Path {
        self.entry_point.parent().unwrap_or(&self.root)
    }

    /// Output directory for the compiled binary.
    pub fn bin_dir(&self) -> PathBuf {
        self.root.join(BIN_DIR)
    }

    /// Path of the compiled binary.
    pub fn binary_path(&self) -> PathBuf {
        self.bin_dir().join(binary_name())
    }
}

/// Lists the services in `workspace`.
///
/// A service is an immediate subdirectory that is not denylisted and contains
/// the configured entry point. Results follow directory enumeration order.
pub fn discover(
    workspace: &Path,
    config: &Config,
) -> Result<Vec<ServiceDescriptor>, OrchestratorError> {
    let entries =
        fs::read_dir(workspace).map_err(|source| OrchestratorError::DiscoveryError {
            path: workspace.to_path_buf(),
            source,
        })?;

    let mut services = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| OrchestratorError::DiscoveryError {
            path: workspace.to_path_buf(),
            source,
        })?;

        if !entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false) {
            continue;
        }

        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            debug!("Skipping non UTF-8 directory {:?}", entry.path());
            continue;
        };

        if config.is_denied(&name) {
            debug!("Skipping denylisted directory '{name}'");
            continue;
        }

        let descriptor = ServiceDescriptor::new(workspace, &name, config);
        if descriptor.entry_point().is_file() {
            services.push(descriptor);
        }
    }

    Ok(services)
}

/// Convenience wrapper returning only the discovered names.
pub fn discover_names(
    workspace: &Path,
    config: &Config,
) -> Result<Vec<String>, OrchestratorError> {
    Ok(discover(workspace, config)?
        .into_iter()
        .map(|service| service.name)
        .collect())
}
