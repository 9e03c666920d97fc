//! Container runtime capability.
//!
//! The provisioning protocol treats the runtime as an opaque capability with
//! three operations: start a container, report a host port mapping, and
//! terminate. [`ContainerRuntime`] is that seam; [`DockerClient`] is the
//! production implementation over the `docker` CLI, and test suites
//! substitute stubs with call counting.

pub mod client;
pub mod error;

pub use client::DockerClient;
pub use error::DockerError;

use async_trait::async_trait;

/// Everything the runtime needs to start one container.
#[derive(Debug, Clone)]
pub struct StartRequest {
    /// Container name; collisions with a live container are an error,
    /// collisions with a stopped leftover are resolved by removing it.
    pub name: String,
    /// Image reference, e.g. `postgres:16-alpine`.
    pub image: String,
    /// Environment assignments passed through `-e`.
    pub env: Vec<(String, String)>,
    /// Container-internal TCP port to publish on an ephemeral host port.
    pub internal_port: u16,
}

/// Opaque reference to a running container, valid from a successful start
/// until a successful terminate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    /// Full container ID as reported by the runtime.
    pub id: String,
    /// The name the container was started under.
    pub name: String,
}

/// A host-side endpoint for a published container port.
///
/// Typed accessor instead of splitting a `host:port` string positionally:
/// the runtime reports the pieces separately, so keep them separate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEndpoint {
    pub host: String,
    pub port: u16,
}

/// The runtime capability consumed by the instance manager.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Start a container with the internal port published to an ephemeral
    /// host-assigned port. Returns a handle for later inspection/teardown.
    async fn start(&self, req: &StartRequest) -> Result<ContainerHandle, DockerError>;

    /// Report the host endpoint bound to `internal_port`.
    ///
    /// May fail transiently right after start — the mapping is not always
    /// queryable the instant the container exists.
    async fn port_mapping(
        &self,
        handle: &ContainerHandle,
        internal_port: u16,
    ) -> Result<HostEndpoint, DockerError>;

    /// Terminate and remove the container. Succeeds if it is already gone.
    async fn terminate(&self, handle: &ContainerHandle) -> Result<(), DockerError>;

    /// Fetch the last `tail` log lines, for diagnostics on readiness failure.
    async fn logs(&self, handle: &ContainerHandle, tail: usize) -> Result<String, DockerError>;

    /// Best-effort synchronous terminate, for use from `Drop`.
    fn terminate_blocking(&self, handle: &ContainerHandle);
}
