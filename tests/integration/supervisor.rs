#![cfg(unix)]

#[path = "common/mod.rs"]
mod common;

use std::{thread, time::Duration};

use common::{Workspace, is_process_alive, wait_for_pids, wait_until};
use svcctl::{
    error::{BuildStep, OrchestratorError},
    supervisor::ServiceState,
    test_utils::{
        BROKEN_SERVICE, EXITING_SERVICE, GRACEFUL_SERVICE, STUBBORN_SERVICE,
    },
};

#[test]
fn start_creates_exactly_one_running_process() {
    let workspace = Workspace::new();
    workspace.service("alpha", GRACEFUL_SERVICE);
    let supervisor = workspace.supervisor();

    supervisor.start("alpha").unwrap();

    assert_eq!(supervisor.state("alpha").unwrap(), Some(ServiceState::Running));
    let pids = wait_for_pids(&workspace.binary("alpha"), 1);
    assert_eq!(pids.len(), 1);
    assert!(is_process_alive(pids[0]));

    supervisor.stop("alpha").unwrap();
}

#[test]
fn start_while_running_is_rejected_and_spawns_nothing() {
    let workspace = Workspace::new();
    workspace.service("alpha", GRACEFUL_SERVICE);
    let supervisor = workspace.supervisor();

    supervisor.start("alpha").unwrap();
    wait_for_pids(&workspace.binary("alpha"), 1);

    let err = supervisor.start("alpha").unwrap_err();
    assert!(matches!(err, OrchestratorError::AlreadyRunning { ref service } if service == "alpha"));

    thread::sleep(Duration::from_millis(200));
    assert_eq!(
        svcctl::test_utils::recorded_pids(&workspace.binary("alpha")).len(),
        1
    );

    supervisor.stop("alpha").unwrap();
}

#[test]
fn exited_service_can_be_started_again() {
    let workspace = Workspace::new();
    workspace.service("blip", EXITING_SERVICE);
    let supervisor = workspace.supervisor();

    supervisor.start("blip").unwrap();
    wait_until("blip to exit", || {
        supervisor.state("blip").unwrap() == Some(ServiceState::Exited)
    });

    supervisor.start("blip").unwrap();
    let pids = wait_for_pids(&workspace.binary("blip"), 2);
    assert_eq!(pids.len(), 2);
    assert_ne!(pids[0], pids[1]);
}

#[test]
fn stop_removes_entry_after_graceful_exit() {
    let workspace = Workspace::new();
    workspace.service("alpha", GRACEFUL_SERVICE);
    let supervisor = workspace.supervisor();

    supervisor.start("alpha").unwrap();
    let pid = wait_for_pids(&workspace.binary("alpha"), 1)[0];

    let outcome = supervisor.stop("alpha").unwrap();

    assert!(!outcome.forced);
    assert!(outcome.status.success());
    assert_eq!(supervisor.state("alpha").unwrap(), None);
    assert!(!is_process_alive(pid));
}

#[test]
fn stop_removes_entry_after_forced_kill() {
    let workspace = Workspace::new();
    workspace.service("mule", STUBBORN_SERVICE);
    let supervisor = workspace.supervisor();

    supervisor.start("mule").unwrap();
    let pid = wait_for_pids(&workspace.binary("mule"), 1)[0];

    let outcome = supervisor.stop("mule").unwrap();

    assert!(outcome.forced);
    assert!(!outcome.status.success());
    assert_eq!(supervisor.state("mule").unwrap(), None);
    assert!(!is_process_alive(pid));
}

#[test]
fn stop_on_absent_or_exited_service_is_not_running() {
    let workspace = Workspace::new();
    workspace.service("blip", EXITING_SERVICE);
    let supervisor = workspace.supervisor();

    assert!(matches!(
        supervisor.stop("ghost"),
        Err(OrchestratorError::NotRunning { .. })
    ));
    assert!(supervisor.snapshot().unwrap().is_empty());

    supervisor.start("blip").unwrap();
    wait_until("blip to exit", || {
        supervisor.state("blip").unwrap() == Some(ServiceState::Exited)
    });

    let before = supervisor.snapshot().unwrap();
    assert!(matches!(
        supervisor.stop("blip"),
        Err(OrchestratorError::NotRunning { .. })
    ));
    assert_eq!(supervisor.snapshot().unwrap(), before);
}

#[test]
fn start_all_continues_past_a_failed_build() {
    let workspace = Workspace::new();
    workspace
        .service("alpha", GRACEFUL_SERVICE)
        .service("beta", BROKEN_SERVICE)
        .service("gamma", GRACEFUL_SERVICE);
    let supervisor = workspace.supervisor();

    let err = supervisor.start_all().unwrap_err();

    match err {
        OrchestratorError::BatchError { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].service, "beta");
            assert!(matches!(
                failures[0].error,
                OrchestratorError::BuildError {
                    step: BuildStep::Compile,
                    ..
                }
            ));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert!(supervisor.is_running("alpha").unwrap());
    assert!(supervisor.is_running("gamma").unwrap());
    assert_eq!(supervisor.state("beta").unwrap(), None);

    supervisor.stop_all().unwrap();
}

#[test]
fn start_all_without_services_fails_before_starting() {
    let workspace = Workspace::new();
    let supervisor = workspace.supervisor();

    assert!(matches!(
        supervisor.start_all(),
        Err(OrchestratorError::NoServicesFound { .. })
    ));
}

#[test]
fn stop_all_empties_registry_even_with_forced_kill() {
    let workspace = Workspace::new();
    workspace
        .service("alpha", GRACEFUL_SERVICE)
        .service("mule", STUBBORN_SERVICE);
    let supervisor = workspace.supervisor();

    supervisor.start_all().unwrap();
    let alpha = wait_for_pids(&workspace.binary("alpha"), 1)[0];
    let mule = wait_for_pids(&workspace.binary("mule"), 1)[0];

    let outcomes = supervisor.stop_all().unwrap();

    assert_eq!(outcomes.len(), 2);
    let forced: Vec<_> = outcomes
        .iter()
        .filter(|outcome| outcome.forced)
        .map(|outcome| outcome.service.as_str())
        .collect();
    assert_eq!(forced, vec!["mule"]);
    assert!(supervisor.snapshot().unwrap().is_empty());
    assert!(!is_process_alive(alpha));
    assert!(!is_process_alive(mule));
}

#[test]
fn concurrent_start_stop_cycles_keep_registry_consistent() {
    const WORKERS: usize = 4;
    const CYCLES: usize = 3;

    let workspace = Workspace::new();
    for worker in 0..WORKERS {
        workspace.service(&format!("svc{worker}"), GRACEFUL_SERVICE);
    }
    workspace.service("shared", GRACEFUL_SERVICE);
    let supervisor = workspace.supervisor();

    thread::scope(|scope| {
        for worker in 0..WORKERS {
            let supervisor = &supervisor;
            let binary = workspace.binary(&format!("svc{worker}"));
            scope.spawn(move || {
                let name = format!("svc{worker}");
                for cycle in 0..CYCLES {
                    supervisor.start(&name).unwrap();
                    assert!(supervisor.is_running(&name).unwrap());
                    wait_for_pids(&binary, cycle + 1);
                    supervisor.stop(&name).unwrap();
                    assert_eq!(supervisor.state(&name).unwrap(), None);
                }
            });

            scope.spawn(move || {
                for _ in 0..CYCLES {
                    match supervisor.start("shared") {
                        Ok(())
                        | Err(OrchestratorError::AlreadyRunning { .. })
                        | Err(OrchestratorError::InProgress { .. }) => {}
                        Err(other) => panic!("unexpected start error: {other}"),
                    }
                    match supervisor.stop("shared") {
                        Ok(_)
                        | Err(OrchestratorError::NotRunning { .. })
                        | Err(OrchestratorError::InProgress { .. }) => {}
                        Err(other) => panic!("unexpected stop error: {other}"),
                    }
                }
            });
        }
    });

    for worker in 0..WORKERS {
        let pids = wait_for_pids(&workspace.binary(&format!("svc{worker}")), CYCLES);
        assert_eq!(pids.len(), CYCLES);
    }

    // At most one "shared" record may remain; stopping it must reap every
    // process that was ever spawned, so none of them was lost.
    let remaining = supervisor.snapshot().unwrap();
    assert!(remaining.iter().all(|status| status.name == "shared"));
    assert!(remaining.len() <= 1);
    supervisor.shutdown().unwrap();
    assert!(supervisor.snapshot().unwrap().is_empty());

    for pid in svcctl::test_utils::recorded_pids(&workspace.binary("shared")) {
        assert!(!is_process_alive(pid), "shared process {pid} was leaked");
    }
}

#[test]
fn discover_start_all_stop_all_scenario() {
    let workspace = Workspace::new();
    workspace
        .service("alpha", GRACEFUL_SERVICE)
        .service("beta", GRACEFUL_SERVICE)
        .service("auth_service", GRACEFUL_SERVICE);
    std::fs::create_dir_all(workspace.path().join("gamma")).unwrap();
    let supervisor = workspace.supervisor();

    let mut discovered = supervisor.discover().unwrap();
    discovered.sort();
    assert_eq!(discovered, vec!["alpha", "beta"]);

    supervisor.start_all().unwrap();
    assert!(supervisor.is_running("alpha").unwrap());
    assert!(supervisor.is_running("beta").unwrap());
    assert_eq!(supervisor.state("auth_service").unwrap(), None);
    wait_for_pids(&workspace.binary("alpha"), 1);
    wait_for_pids(&workspace.binary("beta"), 1);

    let outcomes = supervisor.stop_all().unwrap();

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|outcome| outcome.status.code() == Some(0)));
    assert!(supervisor.snapshot().unwrap().is_empty());
    assert!(!workspace.binary("auth_service").exists());
}
