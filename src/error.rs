use crate::docker::DockerError;
use miette::Diagnostic;
use std::time::Duration;
use thiserror::Error;

/// Crate-level error taxonomy for the provisioning protocol.
///
/// Transient conditions (port mapping not yet registered, connection refused
/// while the engine starts up) are retried internally under bounded policies
/// and only surface here once those policies are exhausted.
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Failed to start container '{name}': {source}")]
    #[diagnostic(
        code(pgbox::provision::failed),
        help("Check that Docker is running with `docker ps` and that the image exists")
    )]
    Provisioning {
        name: String,
        #[source]
        source: DockerError,
    },

    #[error("Docker daemon is not responding")]
    #[diagnostic(
        code(pgbox::provision::daemon_unavailable),
        help("Start Docker, then verify with `docker info`")
    )]
    DaemonUnavailable,

    #[error("No host port mapping for container '{name}' after {attempts} attempts: {source}")]
    #[diagnostic(
        code(pgbox::discovery::failed),
        help("Inspect the container with `docker inspect {name}` — it may have exited on startup")
    )]
    Discovery {
        name: String,
        attempts: usize,
        #[source]
        source: DockerError,
    },

    #[error("Database in container '{name}' not ready within {}s: {source}", .waited.as_secs())]
    #[diagnostic(
        code(pgbox::readiness::timeout),
        help("Check the engine logs with `docker logs {name}` or increase the readiness deadline")
    )]
    ReadinessTimeout {
        name: String,
        waited: Duration,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Connection attempts on the reconnect path (after launch) ran out.
    #[error("Could not reconnect to database in container '{name}': {source}")]
    #[diagnostic(code(pgbox::readiness::reconnect_failed))]
    ReconnectFailed {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Failed to terminate container '{name}': {source}")]
    #[diagnostic(
        code(pgbox::teardown::failed),
        help("The container is still running — remove it manually with `docker rm -f {name}`")
    )]
    Teardown {
        name: String,
        #[source]
        source: DockerError,
    },

    #[error("Launch of container '{name}' was cancelled")]
    #[diagnostic(code(pgbox::launch::cancelled))]
    Cancelled { name: String },

    #[error("Instance '{name}' was already terminated; construct a fresh manager")]
    #[diagnostic(
        code(pgbox::instance::terminated),
        help("A manager is single-use — create a new InstanceManager for a new instance")
    )]
    Terminated { name: String },

    #[error("Instance '{name}' has not been launched")]
    #[diagnostic(
        code(pgbox::instance::not_launched),
        help("Call `InstanceManager::launch` before querying the port or client")
    )]
    NotLaunched { name: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for errors that leave a live container behind: the caller must
    /// still call `cleanup` to avoid leaking it across test runs.
    pub fn needs_cleanup(&self) -> bool {
        matches!(
            self,
            Error::Discovery { .. }
                | Error::ReadinessTimeout { .. }
                | Error::ReconnectFailed { .. }
                | Error::Teardown { .. }
                | Error::Cancelled { .. }
        )
    }
}
