//! # pgbox
//!
//! Disposable, network-isolated PostgreSQL instances for integration tests.
//!
//! Each [`InstanceManager`] owns one throwaway postgres container: it starts
//! the container with the service port published on an ephemeral host port
//! (so parallel test runs never fight over a fixed binding), discovers the
//! assigned port, polls until the database engine actually accepts
//! connections — the container existing is not enough — and hands back a
//! ready client. Teardown is explicit and idempotent.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pgbox::{CancellationToken, InstanceManager, InstanceSpec};
//!
//! # async fn example() -> Result<(), pgbox::Error> {
//! let spec = InstanceSpec::new("app", "app", "app_test", "billing", "integration");
//! let mut manager = InstanceManager::new(spec);
//!
//! let cancel = CancellationToken::new();
//! let pool = manager.launch(&cancel).await?;
//!
//! // ... run the test against `pool` ...
//!
//! manager.cleanup().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Call [`InstanceManager::cleanup`] even when `launch` fails: a readiness
//! timeout or cancellation leaves the container recorded precisely so it can
//! still be terminated instead of leaking across test runs.
//!
//! ## Capability seams
//!
//! The container runtime ([`ContainerRuntime`]) and the database driver
//! ([`Driver`]) are trait seams. Production code uses the `docker` CLI and a
//! sqlx pool; tests substitute stubs to exercise the retry and teardown
//! protocol without Docker or a real database.

pub mod docker;
pub mod driver;
pub mod error;
pub mod instance;
pub mod retry;

// Re-export commonly used types
pub use docker::{ContainerHandle, ContainerRuntime, DockerClient, DockerError, HostEndpoint, StartRequest};
pub use driver::{Driver, PgDriver, PoolLimits};
pub use error::{Error, Result};
pub use instance::{InstanceManager, InstanceSpec, DEFAULT_IMAGE};
pub use retry::{retry, RetryError, RetryPolicy};
pub use tokio_util::sync::CancellationToken;
