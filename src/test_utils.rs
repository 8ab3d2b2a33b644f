//! Fixtures shared by unit and integration tests.
//!
//! Services under test are shell scripts. The fake toolchain "compiles" a
//! service by copying its entry point to the output path, so no Go toolchain
//! is needed.
use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::config::{Config, Toolchain};

/// Exits cleanly on `SIGTERM` and records its PID next to its binary.
///
/// Signal handling is in place before the PID is recorded.
pub const GRACEFUL_SERVICE: &str = r#"#!/bin/sh
trap 'exit 0' TERM
echo $$ >> "$0.pids"
while :; do sleep 0.05; done
"#;

/// Ignores `SIGTERM`, so only a forced kill stops it.
pub const STUBBORN_SERVICE: &str = r#"#!/bin/sh
trap '' TERM
echo $$ >> "$0.pids"
exec sleep 30
"#;

/// Exits on its own right after starting.
pub const EXITING_SERVICE: &str = r#"#!/bin/sh
echo $$ >> "$0.pids"
sleep 0.1
exit 0
"#;

/// Exits on its own with a non-zero status.
pub const FAILING_SERVICE: &str = r#"#!/bin/sh
echo $$ >> "$0.pids"
sleep 0.1
exit 3
"#;

/// Source the fake toolchain refuses to compile.
pub const BROKEN_SERVICE: &str = "#!/bin/sh\n# BUILD_FAILS\nexit 1\n";

const FAKE_TOOLCHAIN: &str = r#"#!/bin/sh
case "$1" in
  mod)
    if [ "$2" = "init" ]; then
      echo "module $3" > go.mod
    fi
    ;;
  build)
    if grep -q BUILD_FAILS main.go; then
      echo "main.go: compile error" >&2
      exit 1
    fi
    cp main.go "$3" && chmod +x "$3"
    ;;
  *)
    echo "unsupported command: $*" >&2
    exit 2
    ;;
esac
"#;

fn write_executable(path: &Path, content: &str) {
    fs::write(path, content).expect("write executable");
    let mut permissions = fs::metadata(path).expect("stat executable").permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(path, permissions).expect("chmod executable");
}

/// Writes the fake toolchain into `dir` and returns its path.
pub fn write_fake_toolchain(dir: &Path) -> PathBuf {
    let path = dir.join("fake-go");
    write_executable(&path, FAKE_TOOLCHAIN);
    path
}

/// Creates `workspace/<name>/cmd/main.go` with `source` as its content.
pub fn write_service(workspace: &Path, name: &str, source: &str) {
    let cmd = workspace.join(name).join("cmd");
    fs::create_dir_all(&cmd).expect("create service dir");
    fs::write(cmd.join("main.go"), source).expect("write entry point");
}

/// Configuration using the fake toolchain and a short grace timeout.
pub fn test_config(workspace: &Path) -> Config {
    Config {
        grace_timeout: Duration::from_millis(500),
        toolchain: Toolchain {
            program: write_fake_toolchain(workspace),
            manifest: "go.mod".into(),
        },
        ..Config::default()
    }
}

/// PIDs recorded by every process spawned from `binary`.
pub fn recorded_pids(binary: &Path) -> Vec<u32> {
    let mut log = binary.as_os_str().to_owned();
    log.push(".pids");
    fs::read_to_string(PathBuf::from(log))
        .map(|content| {
            content
                .lines()
                .filter_map(|line| line.trim().parse().ok())
                .collect()
        })
        .unwrap_or_default()
}
