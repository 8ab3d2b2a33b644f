//! Error handling for svcctl.
use std::{fmt, path::PathBuf};

use strum_macros::{AsRefStr, Display};
use thiserror::Error;

/// The step of the build pipeline that produced a [`OrchestratorError::BuildError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum BuildStep {
    /// Creating the per-service dependency manifest.
    ManifestInit,
    /// Resolving dependencies against the manifest.
    DependencyResolve,
    /// Compiling the entry point into the output binary.
    Compile,
}

/// Defines all possible errors that can occur in the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The working directory could not be listed.
    #[error("Failed to list services in {}: {source}", .path.display())]
    DiscoveryError {
        /// Directory that was being scanned.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// A build pipeline step failed.
    #[error("Build of service '{service}' failed at step {step}: {source}")]
    BuildError {
        /// The service being built.
        service: String,
        /// The step that failed.
        step: BuildStep,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Start was requested for a service that is already running.
    #[error("Service '{service}' is already running")]
    AlreadyRunning {
        /// The service name.
        service: String,
    },

    /// Stop was requested for a service that is not running.
    #[error("Service '{service}' is not running")]
    NotRunning {
        /// The service name.
        service: String,
    },

    /// Another start or stop for the same service has not finished yet.
    #[error("Service '{service}' has a start or stop already in progress")]
    InProgress {
        /// The service name.
        service: String,
    },

    /// Error spawning a service process.
    #[error("Failed to start service '{service}': {source}")]
    SpawnError {
        /// The service name that failed to start.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The graceful termination signal could not be delivered.
    #[error("Failed to signal service '{service}': {source}")]
    SignalError {
        /// The service name.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The forced termination failed.
    #[error("Failed to forcefully terminate service '{service}': {source}")]
    KillError {
        /// The service name.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Observing the exit of a service process failed.
    #[error("Failed to reap service '{service}': {source}")]
    WaitError {
        /// The service name.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Discovery found nothing to start.
    #[error("No services found in {}", .path.display())]
    NoServicesFound {
        /// Directory that was scanned.
        path: PathBuf,
    },

    /// Nothing is registered, so there is nothing to stop.
    #[error("No services are running")]
    NoServicesRunning,

    /// One or more services failed during a fleet-wide operation.
    #[error("{} service(s) failed: {}", .failures.len(), ServiceFailure::join(.failures))]
    BatchError {
        /// Every per-service failure, in the order they were encountered.
        failures: Vec<ServiceFailure>,
    },

    /// Error reading or accessing a configuration file.
    #[error("Failed to read config file: {0}")]
    ConfigReadError(#[from] std::io::Error),

    /// An interrupt arrived before the operation could spawn anything.
    #[error("Interrupted before the service could be started")]
    Interrupted,

    /// Error parsing the YAML configuration.
    #[error("Invalid configuration: {0}")]
    ConfigParseError(String),

    /// Error for poisoned mutex.
    #[error("Mutex is poisoned: {0}")]
    MutexPoisonError(String),
}

impl From<serde_yaml::Error> for OrchestratorError {
    fn from(err: serde_yaml::Error) -> Self {
        OrchestratorError::ConfigParseError(err.to_string())
    }
}

/// Implement the `From` trait to convert a `std::sync::PoisonError` into an `OrchestratorError`.
impl<T> From<std::sync::PoisonError<T>> for OrchestratorError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        OrchestratorError::MutexPoisonError(err.to_string())
    }
}

/// A single failed item of a fleet-wide start or stop.
#[derive(Debug)]
pub struct ServiceFailure {
    /// The service that failed.
    pub service: String,
    /// Why it failed.
    pub error: OrchestratorError,
}

impl ServiceFailure {
    fn join(failures: &[ServiceFailure]) -> String {
        failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.service, self.error)
    }
}
