//! Constants and default configuration values for svcctl.
//!
//! Every default that `svcctl.yaml` can override lives here, next to the fixed
//! values that are not configurable.

use std::time::Duration;

// ============================================================================
// Configuration Defaults
// ============================================================================

/// Name of the optional configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "svcctl.yaml";

/// Time `stop` waits for a graceful exit before escalating to a forced kill.
pub const DEFAULT_GRACE_TIMEOUT: Duration = Duration::from_secs(5);

/// Directory names that are never treated as services, even if they qualify.
pub const DEFAULT_DENYLIST: &[&str] = &["auth_service", "chatting_service"];

/// Build entry point, relative to a service directory.
pub const DEFAULT_ENTRY_POINT: &str = "cmd/main.go";

/// Build tool invoked for every pipeline step.
pub const DEFAULT_TOOLCHAIN_PROGRAM: &str = "go";

/// Per-service dependency manifest created on first build.
pub const DEFAULT_MANIFEST_FILE: &str = "go.mod";

// ============================================================================
// Build Layout
// ============================================================================

/// Output directory for compiled binaries, relative to a service directory.
pub const BIN_DIR: &str = "bin";

/// File name of the compiled binary for the host platform.
pub fn binary_name() -> &'static str {
    if std::path::MAIN_SEPARATOR == '/' {
        "main"
    } else {
        "main.exe"
    }
}

// ============================================================================
// Process Supervision
// ============================================================================

/// Interval between exit checks while waiting on a child process.
pub const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
