//! Build pipeline that turns a service's source tree into an executable.
use std::{
    fs,
    io::{self, ErrorKind},
    process::{Command, Stdio},
};

use tracing::{debug, info};

use crate::{
    config::Toolchain,
    discovery::ServiceDescriptor,
    error::{BuildStep, OrchestratorError},
};

fn build_error(
    service: &ServiceDescriptor,
    step: BuildStep,
    source: io::Error,
) -> OrchestratorError {
    OrchestratorError::BuildError {
        service: service.name().to_string(),
        step,
        source,
    }
}

/// Runs an external tool to completion with inherited output streams.
fn run_step(
    service: &ServiceDescriptor,
    step: BuildStep,
    mut command: Command,
) -> Result<(), OrchestratorError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    debug!("Executing command: {command:?}");

    let status = command
        .status()
        .map_err(|source| build_error(service, step, source))?;

    if !status.success() {
        return Err(build_error(
            service,
            step,
            io::Error::other(format!("{} exited with {status}", step)),
        ));
    }

    Ok(())
}

/// Builds `service` into [`ServiceDescriptor::binary_path`].
///
/// Every step runs even when the output is up to date. The first failing step
/// aborts the pipeline; partial outputs are left in place.
pub fn build_service(
    service: &ServiceDescriptor,
    toolchain: &Toolchain,
) -> Result<(), OrchestratorError> {
    let name = service.name();
    let manifest = service.root().join(&toolchain.manifest);

    match fs::metadata(&manifest) {
        Ok(_) => debug!("Manifest for '{name}' already exists"),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("Initializing {} for '{name}'...", toolchain.manifest);
            let mut init = Command::new(&toolchain.program);
            init.args(["mod", "init", name]).current_dir(service.root());
            run_step(service, BuildStep::ManifestInit, init)?;
        }
        Err(e) => {
            return Err(build_error(
                service,
                BuildStep::ManifestInit,
                io::Error::new(
                    e.kind(),
                    format!("cannot check {}: {e}", manifest.display()),
                ),
            ));
        }
    }

    info!("Resolving dependencies for '{name}'...");
    let mut tidy = Command::new(&toolchain.program);
    tidy.args(["mod", "tidy"]).current_dir(service.root());
    run_step(service, BuildStep::DependencyResolve, tidy)?;

    info!("Building '{name}'...");
    fs::create_dir_all(service.bin_dir())
        .map_err(|source| build_error(service, BuildStep::Compile, source))?;

    let mut compile = Command::new(&toolchain.program);
    compile
        .arg("build")
        .arg("-o")
        .arg(service.binary_path())
        .arg(".")
        .current_dir(service.source_dir());
    run_step(service, BuildStep::Compile, compile)?;

    debug!(
        "Service '{name}' built at {}",
        service.binary_path().display()
    );
    Ok(())
}
