//! svcctl is a small development orchestrator for a workspace of service
//! projects. It discovers the services in the working directory, builds each
//! one with an external toolchain, and supervises the resulting binaries as
//! child processes with graceful, time-bounded shutdown.

/// Build pipeline.
pub mod build;

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Defaults and fixed values.
pub mod constants;

/// Service discovery.
pub mod discovery;

/// Error handling.
pub mod error;

/// Process handles and launchers.
pub mod process;

/// Service registry and lifecycle operations.
pub mod supervisor;

#[cfg(unix)]
#[doc(hidden)]
pub mod test_utils;
