#![cfg(unix)]

#[path = "common/mod.rs"]
mod common;

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    process::{Child, Command as StdCommand, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use assert_cmd::Command;
use common::{Workspace, is_process_alive, wait_for_pids, wait_until};
use nix::{
    sys::signal::{Signal, kill},
    unistd::Pid,
};
use predicates::prelude::*;
use svcctl::test_utils::{BROKEN_SERVICE, EXITING_SERVICE, GRACEFUL_SERVICE};

fn svcctl(workspace: &Workspace) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("svcctl"));
    cmd.current_dir(workspace.path()).env("RUST_LOG", "info");
    cmd
}

fn wait_for_controller(controller: &mut Child) -> ExitStatus {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(status) = controller.try_wait().unwrap() {
            return status;
        }
        if Instant::now() >= deadline {
            let _ = controller.kill();
            panic!("svcctl did not exit after SIGINT");
        }
        thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn missing_operands_print_usage_and_services() {
    let workspace = Workspace::new();
    workspace
        .service("alpha", GRACEFUL_SERVICE)
        .service("auth_service", GRACEFUL_SERVICE);

    svcctl(&workspace)
        .assert()
        .failure()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("svcctl <service> up"))
        .stdout(predicate::str::contains("Available services:"))
        .stdout(predicate::str::contains("  - alpha"))
        .stdout(predicate::str::contains("auth_service").not());
}

#[test]
fn unknown_service_lists_available_services() {
    let workspace = Workspace::new();
    workspace.service("alpha", GRACEFUL_SERVICE);

    svcctl(&workspace)
        .args(["x", "up"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Unknown service: x"))
        .stdout(predicate::str::contains("  - alpha"));
}

#[test]
fn unknown_action_prints_usage() {
    let workspace = Workspace::new();
    workspace.service("alpha", GRACEFUL_SERVICE);

    svcctl(&workspace)
        .args(["alpha", "restart"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Unknown action: restart"))
        .stdout(predicate::str::contains("Usage:"));
}

#[test]
fn unknown_service_is_reported_before_unknown_action() {
    let workspace = Workspace::new();
    workspace.service("alpha", GRACEFUL_SERVICE);

    svcctl(&workspace)
        .args(["bogus", "restart"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Unknown service: bogus"))
        .stdout(predicate::str::contains("  - alpha"))
        .stdout(predicate::str::contains("Unknown action").not());
}

#[test]
fn down_in_a_fresh_process_has_nothing_to_stop() {
    let workspace = Workspace::new();
    workspace.service("alpha", GRACEFUL_SERVICE);
    workspace.write_config_file();

    svcctl(&workspace)
        .args(["all", "down"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("No services are running"));

    svcctl(&workspace)
        .args(["alpha", "down"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("is not running"));
}

#[test]
fn up_returns_once_the_service_exits() {
    let workspace = Workspace::new();
    workspace.service("blip", EXITING_SERVICE);
    workspace.write_config_file();

    svcctl(&workspace)
        .args(["blip", "up"])
        .timeout(Duration::from_secs(10))
        .assert()
        .success()
        .stdout(predicate::str::contains("All services have exited"));

    assert!(workspace.binary("blip").exists());
}

#[test]
fn all_up_with_a_broken_service_fails_and_cleans_up() {
    let workspace = Workspace::new();
    workspace
        .service("alpha", GRACEFUL_SERVICE)
        .service("beta", BROKEN_SERVICE);
    workspace.write_config_file();

    svcctl(&workspace)
        .args(["all", "up"])
        .timeout(Duration::from_secs(10))
        .assert()
        .failure()
        .stdout(predicate::str::contains("Failed to start all services"))
        .stdout(predicate::str::contains("beta"));

    for pid in svcctl::test_utils::recorded_pids(&workspace.binary("alpha")) {
        assert!(!is_process_alive(pid), "alpha process {pid} outlived the controller");
    }
}

#[test]
fn interrupt_stops_running_services() {
    let workspace = Workspace::new();
    workspace.service("alpha", GRACEFUL_SERVICE);
    workspace.write_config_file();

    let mut controller = StdCommand::new(assert_cmd::cargo::cargo_bin!("svcctl"))
        .args(["alpha", "up"])
        .current_dir(workspace.path())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn svcctl");

    let service = wait_for_pids(&workspace.binary("alpha"), 1)[0];
    kill(Pid::from_raw(controller.id() as i32), Signal::SIGINT).unwrap();

    let status = wait_for_controller(&mut controller);

    assert!(status.success());
    assert!(!is_process_alive(service));
}

#[test]
fn interrupt_during_a_later_build_stops_started_services() {
    let workspace = Workspace::new();
    workspace
        .service("alpha", GRACEFUL_SERVICE)
        .service("zeta", GRACEFUL_SERVICE);

    // Every compile after the first one is slow, whatever the discovery order.
    let marker = workspace.path().join("first-build-done");
    let toolchain = workspace.path().join("slow-go");
    fs::write(
        &toolchain,
        format!(
            "#!/bin/sh\n\
             if [ \"$1\" = build ]; then\n\
             \x20 [ -e '{marker}' ] && sleep 3\n\
             \x20 touch '{marker}'\n\
             fi\n\
             exec '{fake}' \"$@\"\n",
            marker = marker.display(),
            fake = workspace.config.toolchain.program.display(),
        ),
    )
    .unwrap();
    fs::set_permissions(&toolchain, fs::Permissions::from_mode(0o755)).unwrap();
    fs::write(
        workspace.path().join("svcctl.yaml"),
        format!(
            "grace_timeout: 500ms\ntoolchain:\n  program: {}\n",
            toolchain.display()
        ),
    )
    .unwrap();

    let mut controller = StdCommand::new(assert_cmd::cargo::cargo_bin!("svcctl"))
        .args(["all", "up"])
        .current_dir(workspace.path())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn svcctl");

    let binaries = [workspace.binary("alpha"), workspace.binary("zeta")];
    let recorded = || -> Vec<u32> {
        binaries
            .iter()
            .flat_map(|binary| svcctl::test_utils::recorded_pids(binary))
            .collect()
    };
    wait_until("the first service to start", || !recorded().is_empty());
    kill(Pid::from_raw(controller.id() as i32), Signal::SIGINT).unwrap();

    let status = wait_for_controller(&mut controller);

    assert!(status.success());
    let pids = recorded();
    assert_eq!(pids.len(), 1, "the slow service must not start after the interrupt");
    assert!(!is_process_alive(pids[0]), "service {} outlived the controller", pids[0]);
}
