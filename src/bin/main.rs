use std::{
    error::Error,
    path::Path,
    process,
    sync::{
        atomic::Ordering,
        mpsc::{self, Receiver, RecvTimeoutError},
    },
    time::Duration,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use svcctl::{
    cli::{
        Action, Cli, Invocation, Target, UsageError, available_services, parse_args, usage,
    },
    config::load_config,
    error::OrchestratorError,
    supervisor::Supervisor,
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(&args);

    let workspace = std::env::current_dir()?;
    let config = load_config(&workspace, args.config.as_deref().map(Path::new))?;
    let supervisor = Supervisor::new(workspace, config);

    if args.operands.len() != 2 {
        print!("{}", usage(&discoverable(&supervisor)));
        process::exit(1);
    }
    ensure_known_target(&supervisor, &args.operands[0]);

    let invocation = match Invocation::from_operands(&args.operands) {
        Ok(invocation) => invocation,
        Err(UsageError::UnknownAction(action)) => {
            println!("Unknown action: {action}");
            print!("{}", usage(&discoverable(&supervisor)));
            process::exit(1);
        }
        Err(UsageError::OperandCount(_)) => {
            print!("{}", usage(&discoverable(&supervisor)));
            process::exit(1);
        }
    };

    match (&invocation.target, invocation.action) {
        (Target::All, Action::Up) => {
            bring_up(&supervisor, "Failed to start all services", || {
                supervisor.start_all()
            })?;
        }
        (Target::Service(name), Action::Up) => {
            bring_up(&supervisor, &format!("Failed to start service {name}"), || {
                supervisor.start(name)
            })?;
        }
        (Target::All, Action::Down) => {
            if let Err(err) = supervisor.stop_all() {
                fatal(&format!("Failed to stop all services: {err}"));
            }
        }
        (Target::Service(name), Action::Down) => {
            if let Err(err) = supervisor.stop(name) {
                fatal(&format!("Failed to stop service {name}: {err}"));
            }
        }
    }

    Ok(())
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn fatal(message: &str) -> ! {
    error!("{message}");
    process::exit(1);
}

/// Stops anything a failed `up` did manage to start, then exits.
fn abort_up(supervisor: &Supervisor, message: &str) -> ! {
    error!("{message}");
    if let Err(err) = supervisor.shutdown() {
        warn!("Failed to stop services started before the error: {err}");
    }
    process::exit(1);
}

fn discoverable(supervisor: &Supervisor) -> Vec<String> {
    supervisor
        .discover()
        .unwrap_or_else(|err| fatal(&format!("Failed to find services: {err}")))
}

/// Runs `start` with the interrupt handler in place, then stays in the
/// foreground until the services exit or Ctrl-C arrives.
fn bring_up(
    supervisor: &Supervisor,
    failure: &str,
    start: impl FnOnce() -> Result<(), OrchestratorError>,
) -> Result<(), Box<dyn Error>> {
    let interrupts = register_interrupt_handler(supervisor)?;
    let result = start();
    if supervisor.is_interrupted() {
        stop_after_interrupt(supervisor);
        return Ok(());
    }
    if let Err(err) = result {
        abort_up(supervisor, &format!("{failure}: {err}"));
    }
    supervise_foreground(supervisor, &interrupts)
}

/// Exits with the service list unless `target` is `all` or discoverable.
fn ensure_known_target(supervisor: &Supervisor, target: &str) {
    if target == "all" {
        return;
    }
    let services = discoverable(supervisor);
    if !services.iter().any(|service| service == target) {
        println!("Unknown service: {target}");
        print!("{}", available_services(&services));
        process::exit(1);
    }
}

/// Routes Ctrl-C to the supervisor's interrupt flag and to the returned
/// channel. Installed before anything is started so no service is orphaned.
fn register_interrupt_handler(supervisor: &Supervisor) -> Result<Receiver<()>, Box<dyn Error>> {
    let interrupted = supervisor.interrupt_flag();
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        interrupted.store(true, Ordering::SeqCst);
        let _ = tx.send(());
    })?;
    Ok(rx)
}

fn stop_after_interrupt(supervisor: &Supervisor) {
    info!("Interrupt received; stopping services...");
    if let Err(err) = supervisor.shutdown() {
        fatal(&format!("Failed to stop services: {err}"));
    }
}

/// Keeps the controller alive while services run. Ctrl-C stops them all.
fn supervise_foreground(
    supervisor: &Supervisor,
    interrupts: &Receiver<()>,
) -> Result<(), Box<dyn Error>> {
    info!("Services are running; press Ctrl-C to stop them");
    loop {
        match interrupts.recv_timeout(Duration::from_millis(250)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                stop_after_interrupt(supervisor);
                return Ok(());
            }
            Err(RecvTimeoutError::Timeout) => {
                if !supervisor.has_running()? {
                    info!("All services have exited");
                    return Ok(());
                }
            }
        }
    }
}
