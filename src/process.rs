//! OS process control behind a small capability interface.
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::{
    io,
    path::Path,
    process::{Child, Command, ExitStatus, Stdio},
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use tracing::debug;

use crate::{constants::EXIT_POLL_INTERVAL, discovery::ServiceDescriptor};

/// Control over one spawned process.
///
/// Implementations must cache the exit status once observed so that repeated
/// `try_wait` calls keep returning it.
pub trait ProcessHandle: Send {
    /// OS process id.
    fn id(&self) -> u32;

    /// Asks the process to terminate (`SIGTERM` on Unix).
    fn signal_graceful(&mut self) -> io::Result<()>;

    /// Terminates the process forcefully.
    fn kill(&mut self) -> io::Result<()>;

    /// Reaps the process if it has exited, without blocking.
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>>;
}

/// A process handle shared between the supervisor and a watcher.
pub type SharedHandle = Arc<Mutex<Box<dyn ProcessHandle>>>;

/// Creates process handles for built services.
pub trait Launcher: Send + Sync {
    /// Spawns `service` with `workdir` as its working directory.
    fn launch(
        &self,
        service: &ServiceDescriptor,
        workdir: &Path,
    ) -> io::Result<Box<dyn ProcessHandle>>;
}

/// [`ProcessHandle`] backed by a [`std::process::Child`].
#[derive(Debug)]
pub struct ChildHandle {
    child: Child,
}

impl ChildHandle {
    /// Wraps an already spawned child.
    pub fn new(child: Child) -> Self {
        Self { child }
    }
}

impl ProcessHandle for ChildHandle {
    fn id(&self) -> u32 {
        self.child.id()
    }

    #[cfg(unix)]
    fn signal_graceful(&mut self) -> io::Result<()> {
        use nix::{
            sys::signal::{Signal, kill},
            unistd::Pid,
        };

        let pid = Pid::from_raw(self.child.id() as i32);
        kill(pid, Signal::SIGTERM).map_err(|err| io::Error::from_raw_os_error(err as i32))
    }

    #[cfg(not(unix))]
    fn signal_graceful(&mut self) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "graceful termination is not supported on this platform",
        ))
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.kill()
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }
}

/// Spawns the compiled binary of a service.
///
/// The child inherits the controller's standard streams. On Unix it is placed
/// in its own process group so terminal interrupts only reach the controller.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryLauncher;

impl Launcher for BinaryLauncher {
    fn launch(
        &self,
        service: &ServiceDescriptor,
        workdir: &Path,
    ) -> io::Result<Box<dyn ProcessHandle>> {
        let mut cmd = Command::new(service.binary_path());
        cmd.current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                if libc::setpgid(0, 0) < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        debug!("Executing command: {cmd:?}");
        let child = cmd.spawn()?;
        Ok(Box::new(ChildHandle::new(child)))
    }
}

/// Polls `handle` until the process exits or `timeout` elapses.
///
/// Returns `Ok(None)` on timeout. The handle lock is only held for each
/// individual check.
pub fn wait_for_exit(
    handle: &SharedHandle,
    timeout: Duration,
) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;

    loop {
        if let Some(status) = poll(handle)? {
            return Ok(Some(status));
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(EXIT_POLL_INTERVAL.min(deadline - now));
    }
}

/// Polls `handle` until the process exits.
pub fn wait(handle: &SharedHandle) -> io::Result<ExitStatus> {
    loop {
        if let Some(status) = poll(handle)? {
            return Ok(status);
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
}

fn poll(handle: &SharedHandle) -> io::Result<Option<ExitStatus>> {
    handle
        .lock()
        .map_err(|err| io::Error::other(err.to_string()))?
        .try_wait()
}
