//! Registry of managed services and their start/stop lifecycle.
//!
//! All registry reads and writes, from callers and from watcher threads, go
//! through one mutex. A process handle has its own mutex and the two locks are
//! never held at the same time.
use std::{
    collections::{HashMap, HashSet},
    io,
    path::{Path, PathBuf},
    process::ExitStatus,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

use tracing::{debug, error, info, warn};

use crate::{
    build,
    config::Config,
    discovery::{self, ServiceDescriptor},
    error::{OrchestratorError, ServiceFailure},
    process::{self, BinaryLauncher, Launcher, SharedHandle},
};

/// Observable state of a registered service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// The process is alive as far as the supervisor knows.
    Running,
    /// The process exited on its own; the service may be started again.
    Exited,
    /// A forced kill or reap failed; the process may or may not be alive.
    Tainted,
}

/// Point-in-time view of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    /// Service name.
    pub name: String,
    /// PID of the most recent spawn.
    pub pid: u32,
    /// Current state.
    pub state: ServiceState,
    /// Source root the service was built from.
    pub root: PathBuf,
}

/// Result of a completed stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopOutcome {
    /// Service name.
    pub service: String,
    /// Exit status observed when the process was reaped.
    pub status: ExitStatus,
    /// Whether the grace timeout elapsed and the process had to be killed.
    pub forced: bool,
}

/// Live state of one managed service.
struct ProcessRecord {
    handle: SharedHandle,
    pid: u32,
    running: bool,
    tainted: bool,
    /// Identifies the spawn this record belongs to.
    generation: u64,
    root: PathBuf,
}

impl ProcessRecord {
    fn state(&self) -> ServiceState {
        if self.tainted {
            ServiceState::Tainted
        } else if self.running {
            ServiceState::Running
        } else {
            ServiceState::Exited
        }
    }
}

#[derive(Default)]
struct Registry {
    records: HashMap<String, ProcessRecord>,
    /// Names with a start or stop currently executing.
    in_flight: HashSet<String>,
}

/// Marks a name as busy for the lifetime of a start or stop.
struct Reservation {
    registry: Arc<Mutex<Registry>>,
    name: String,
}

impl Reservation {
    /// Must be called with `guard` locked from `registry`, and the guard must be
    /// released before the reservation is dropped.
    fn acquire(
        registry: &Arc<Mutex<Registry>>,
        guard: &mut Registry,
        name: &str,
    ) -> Self {
        guard.in_flight.insert(name.to_string());
        Self {
            registry: Arc::clone(registry),
            name: name.to_string(),
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let mut registry = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        registry.in_flight.remove(&self.name);
    }
}

/// Builds, starts, and stops the services of one workspace.
pub struct Supervisor {
    workspace: PathBuf,
    config: Config,
    launcher: Arc<dyn Launcher>,
    registry: Arc<Mutex<Registry>>,
    next_generation: AtomicU64,
    /// Set once an interrupt arrives; no further services are started.
    interrupted: Arc<AtomicBool>,
}

impl Supervisor {
    /// Creates a supervisor that launches compiled service binaries.
    pub fn new(workspace: impl Into<PathBuf>, config: Config) -> Self {
        Self::with_launcher(workspace, config, Arc::new(BinaryLauncher))
    }

    /// Creates a supervisor with a custom launcher.
    pub fn with_launcher(
        workspace: impl Into<PathBuf>,
        config: Config,
        launcher: Arc<dyn Launcher>,
    ) -> Self {
        let workspace = workspace.into();
        debug!("Initializing supervisor for {}", workspace.display());
        Self {
            workspace,
            config,
            launcher,
            registry: Arc::new(Mutex::new(Registry::default())),
            next_generation: AtomicU64::new(0),
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Directory scanned for services.
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Flag that, once set, makes every later `start` fail with `Interrupted`.
    ///
    /// Meant to be shared with a signal handler.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    /// Whether the interrupt flag has been set.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    fn ensure_not_interrupted(&self) -> Result<(), OrchestratorError> {
        if self.is_interrupted() {
            return Err(OrchestratorError::Interrupted);
        }
        Ok(())
    }

    /// Names of the services currently discoverable in the workspace.
    pub fn discover(&self) -> Result<Vec<String>, OrchestratorError> {
        discovery::discover_names(&self.workspace, &self.config)
    }

    /// Builds and spawns `name`.
    ///
    /// Returns once the process is spawned and registered; a watcher thread
    /// records its exit. Fails with `AlreadyRunning` if the service is running.
    pub fn start(&self, name: &str) -> Result<(), OrchestratorError> {
        self.ensure_not_interrupted()?;
        let descriptor = ServiceDescriptor::new(&self.workspace, name, &self.config);

        let _reservation = {
            let mut registry = self.registry.lock()?;
            if registry.in_flight.contains(name) {
                return Err(OrchestratorError::InProgress {
                    service: name.to_string(),
                });
            }
            if registry
                .records
                .get(name)
                .is_some_and(|record| record.running)
            {
                return Err(OrchestratorError::AlreadyRunning {
                    service: name.to_string(),
                });
            }
            Reservation::acquire(&self.registry, &mut registry, name)
        };

        build::build_service(&descriptor, &self.config.toolchain)?;
        self.ensure_not_interrupted()?;

        info!("Starting service '{name}'...");
        let handle = self
            .launcher
            .launch(&descriptor, &self.workspace)
            .map_err(|source| {
                error!("Failed to start service '{name}': {source}");
                OrchestratorError::SpawnError {
                    service: name.to_string(),
                    source,
                }
            })?;

        let pid = handle.id();
        let handle: SharedHandle = Arc::new(Mutex::new(handle));
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        self.registry.lock()?.records.insert(
            name.to_string(),
            ProcessRecord {
                handle: Arc::clone(&handle),
                pid,
                running: true,
                tainted: false,
                generation,
                root: descriptor.root().to_path_buf(),
            },
        );

        self.spawn_watcher(name, handle, generation);
        info!("Service '{name}' started with PID {pid}");
        Ok(())
    }

    /// Terminates `name`, escalating to a forced kill after the grace timeout.
    ///
    /// The registry entry is removed only once the exit has been observed.
    pub fn stop(&self, name: &str) -> Result<StopOutcome, OrchestratorError> {
        let (handle, generation, _reservation) = {
            let mut registry = self.registry.lock()?;
            if registry.in_flight.contains(name) {
                return Err(OrchestratorError::InProgress {
                    service: name.to_string(),
                });
            }
            let Some(record) = registry.records.get(name).filter(|record| record.running)
            else {
                return Err(OrchestratorError::NotRunning {
                    service: name.to_string(),
                });
            };
            let handle = Arc::clone(&record.handle);
            let generation = record.generation;
            let reservation = Reservation::acquire(&self.registry, &mut registry, name);
            (handle, generation, reservation)
        };

        info!("Stopping service '{name}'...");
        let result = terminate(name, &handle, self.config.grace_timeout);

        let mut registry = self.registry.lock()?;
        let record = registry
            .records
            .get_mut(name)
            .filter(|record| record.generation == generation);

        match result {
            Ok((status, forced)) => {
                if record.is_some() {
                    registry.records.remove(name);
                }
                drop(registry);
                info!("Service '{name}' stopped ({status})");
                Ok(StopOutcome {
                    service: name.to_string(),
                    status,
                    forced,
                })
            }
            Err(
                err @ (OrchestratorError::KillError { .. }
                | OrchestratorError::WaitError { .. }),
            ) => {
                if let Some(record) = record {
                    warn!("Service '{name}' left registered in an unknown state");
                    record.tainted = true;
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Starts every discovered service, one at a time, in discovery order.
    ///
    /// Individual failures are logged and do not stop the remaining starts; all
    /// of them are returned together as a `BatchError`.
    pub fn start_all(&self) -> Result<(), OrchestratorError> {
        let services = self.discover()?;
        if services.is_empty() {
            return Err(OrchestratorError::NoServicesFound {
                path: self.workspace.clone(),
            });
        }

        info!("Starting {} service(s)...", services.len());
        let mut failures = Vec::new();
        for name in services {
            if self.is_interrupted() {
                warn!("Interrupted; not starting the remaining services");
                return Err(OrchestratorError::Interrupted);
            }
            if let Err(error) = self.start(&name) {
                error!("Error starting '{name}': {error}");
                failures.push(ServiceFailure {
                    service: name,
                    error,
                });
            }
        }

        batch_result((), failures)
    }

    /// Stops every registered service, one at a time.
    ///
    /// Services that already exited on their own are dropped from the
    /// registry without being signaled.
    pub fn stop_all(&self) -> Result<Vec<StopOutcome>, OrchestratorError> {
        let services: Vec<String> = {
            let registry = self.registry.lock()?;
            if registry.records.is_empty() {
                return Err(OrchestratorError::NoServicesRunning);
            }
            let mut names: Vec<String> = registry.records.keys().cloned().collect();
            names.sort();
            names
        };

        info!("Stopping {} service(s)...", services.len());
        let mut outcomes = Vec::new();
        let mut failures = Vec::new();
        for name in services {
            match self.stop(&name) {
                Ok(outcome) => outcomes.push(outcome),
                Err(OrchestratorError::NotRunning { .. }) if self.discard_exited(&name)? => {
                    debug!("Service '{name}' had already exited");
                }
                Err(error) => {
                    error!("Error stopping '{name}': {error}");
                    failures.push(ServiceFailure {
                        service: name,
                        error,
                    });
                }
            }
        }

        batch_result(outcomes, failures)
    }

    /// Stops whatever is still registered. Unlike [`Supervisor::stop_all`], an
    /// empty registry is not an error.
    pub fn shutdown(&self) -> Result<Vec<StopOutcome>, OrchestratorError> {
        if self.registry.lock()?.records.is_empty() {
            return Ok(Vec::new());
        }
        self.stop_all()
    }

    /// State of `name`, or `None` if it is not registered.
    pub fn state(&self, name: &str) -> Result<Option<ServiceState>, OrchestratorError> {
        Ok(self.registry.lock()?.records.get(name).map(ProcessRecord::state))
    }

    /// Whether `name` is registered and running.
    pub fn is_running(&self, name: &str) -> Result<bool, OrchestratorError> {
        Ok(matches!(self.state(name)?, Some(ServiceState::Running)))
    }

    /// Whether any registered service is still running.
    pub fn has_running(&self) -> Result<bool, OrchestratorError> {
        Ok(self
            .registry
            .lock()?
            .records
            .values()
            .any(|record| record.running))
    }

    /// Every registry entry, sorted by name.
    pub fn snapshot(&self) -> Result<Vec<ServiceStatus>, OrchestratorError> {
        let registry = self.registry.lock()?;
        let mut statuses: Vec<ServiceStatus> = registry
            .records
            .iter()
            .map(|(name, record)| ServiceStatus {
                name: name.clone(),
                pid: record.pid,
                state: record.state(),
                root: record.root.clone(),
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(statuses)
    }

    /// Removes the record for `name` if its process has exited on its own.
    fn discard_exited(&self, name: &str) -> Result<bool, OrchestratorError> {
        let mut registry = self.registry.lock()?;
        if registry.in_flight.contains(name) {
            return Ok(false);
        }
        let exited = registry
            .records
            .get(name)
            .is_some_and(|record| !record.running && !record.tainted);
        if exited {
            registry.records.remove(name);
        }
        Ok(exited)
    }

    fn spawn_watcher(&self, name: &str, handle: SharedHandle, generation: u64) {
        let registry = Arc::clone(&self.registry);
        let name = name.to_string();
        thread::spawn(move || watch(name, handle, generation, registry));
    }
}

/// Blocks until the process behind `handle` exits, then clears the running
/// flag of the record that belongs to this spawn.
fn watch(
    name: String,
    handle: SharedHandle,
    generation: u64,
    registry: Arc<Mutex<Registry>>,
) {
    let outcome = process::wait(&handle);

    let mut registry = match registry.lock() {
        Ok(registry) => registry,
        Err(err) => {
            error!("Watcher for '{name}' cannot update the registry: {err}");
            return;
        }
    };

    let Some(record) = registry
        .records
        .get_mut(&name)
        .filter(|record| record.generation == generation && record.running)
    else {
        debug!("Watcher for '{name}' finished after the service was stopped");
        return;
    };

    match outcome {
        Ok(status) => {
            record.running = false;
            // An observed exit clears a failed kill.
            record.tainted = false;
            if status.success() {
                info!("Service '{name}' exited");
            } else {
                warn!("Service '{name}' exited with error: {status}");
            }
        }
        Err(err) => {
            record.tainted = true;
            error!("Lost track of service '{name}': {err}");
        }
    }
}

fn wait_error(name: &str, source: io::Error) -> OrchestratorError {
    OrchestratorError::WaitError {
        service: name.to_string(),
        source,
    }
}

/// Sends the graceful signal and waits up to `grace`, then kills and reaps.
///
/// Returns the exit status and whether the kill was needed.
fn terminate(
    name: &str,
    handle: &SharedHandle,
    grace: Duration,
) -> Result<(ExitStatus, bool), OrchestratorError> {
    {
        let mut process = handle.lock()?;
        if let Some(status) = process.try_wait().map_err(|e| wait_error(name, e))? {
            debug!("Service '{name}' exited before it could be signaled");
            return Ok((status, false));
        }
        process.signal_graceful().map_err(|source| {
            error!("Failed to signal service '{name}': {source}");
            OrchestratorError::SignalError {
                service: name.to_string(),
                source,
            }
        })?;
    }
    debug!("Sent SIGTERM to service '{name}'");

    if let Some(status) =
        process::wait_for_exit(handle, grace).map_err(|e| wait_error(name, e))?
    {
        return Ok((status, false));
    }

    warn!("Service '{name}' did not exit within {grace:?}; sending SIGKILL");
    let kill_result = handle.lock()?.kill();
    if let Err(source) = kill_result {
        // The process may have died on its own just before the kill.
        if let Ok(Some(status)) = handle.lock()?.try_wait() {
            warn!("Kill of service '{name}' failed ({source}) but it has exited");
            return Ok((status, true));
        }
        error!("Failed to forcefully terminate service '{name}': {source}");
        return Err(OrchestratorError::KillError {
            service: name.to_string(),
            source,
        });
    }

    let status = process::wait(handle).map_err(|e| wait_error(name, e))?;
    Ok((status, true))
}

fn batch_result<T>(value: T, failures: Vec<ServiceFailure>) -> Result<T, OrchestratorError> {
    if failures.is_empty() {
        Ok(value)
    } else {
        Err(OrchestratorError::BatchError { failures })
    }
}
