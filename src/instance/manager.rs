//! Launch, readiness polling, and teardown of one database instance.

use crate::docker::{ContainerHandle, ContainerRuntime, DockerClient, DockerError, HostEndpoint, StartRequest};
use crate::driver::{Driver, PgDriver, PoolLimits};
use crate::error::{Error, Result};
use crate::instance::InstanceSpec;
use crate::retry::{retry, RetryError, RetryPolicy};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Image the instance is provisioned from, overridable per manager.
pub const DEFAULT_IMAGE: &str = "postgres:16-alpine";

/// The port postgres listens on inside the container.
const POSTGRES_PORT: u16 = 5432;

// Readiness policy: the container existing does not mean the engine inside
// accepts connections yet; poll under a wall-clock deadline.
const READY_DEADLINE: Duration = Duration::from_secs(30);
const READY_DELAY: Duration = Duration::from_secs(2);

// Discovery policy: port-mapping registration can lag container start by
// tens of milliseconds to low seconds, so back off rather than fail outright.
const DISCOVERY_ATTEMPTS: usize = 5;
const DISCOVERY_DELAY: Duration = Duration::from_millis(100);
const DISCOVERY_MAX_DELAY: Duration = Duration::from_secs(2);

// Reconnect policy: re-opening a handle against an already-ready instance,
// distinct from (and much shorter than) the launch readiness policy.
const RECONNECT_ATTEMPTS: usize = 5;
const RECONNECT_DELAY: Duration = Duration::from_millis(250);

/// Log lines attached to diagnostics when readiness times out.
const LOG_TAIL: usize = 50;

/// Orchestrates one disposable database instance: start the container,
/// discover its host port, poll until the engine accepts connections, hand
/// out a client, and tear everything down.
///
/// One manager per instance, owned by one caller; methods take `&mut self`
/// and the manager does no internal locking. A manager is single-use — after
/// [`cleanup`](Self::cleanup) succeeds it cannot be relaunched.
///
/// On every failure path out of [`launch`](Self::launch) the container handle
/// stays recorded, so the caller can (and must) still call `cleanup`; a
/// drop guard force-removes anything left behind as a last resort.
pub struct InstanceManager<R: ContainerRuntime = DockerClient, D: Driver = PgDriver> {
    spec: InstanceSpec,
    runtime: R,
    driver: D,
    image: String,
    pool_limits: PoolLimits,
    ready_policy: RetryPolicy,
    discovery_policy: RetryPolicy,
    reconnect_policy: RetryPolicy,

    // Runtime state, populated in order: container, then endpoint, then
    // client. No container implies the other two are stale.
    container: Option<ContainerHandle>,
    endpoint: Option<HostEndpoint>,
    client: Option<D::Client>,
    terminated: bool,
}

impl InstanceManager {
    /// Manager over the production capabilities: the `docker` CLI and a
    /// sqlx Postgres pool.
    pub fn new(spec: InstanceSpec) -> Self {
        Self::with_capabilities(spec, DockerClient::new(), PgDriver::new())
    }
}

impl<R: ContainerRuntime, D: Driver> InstanceManager<R, D> {
    /// Manager over explicit capabilities. Test suites pass stubs here.
    pub fn with_capabilities(spec: InstanceSpec, runtime: R, driver: D) -> Self {
        InstanceManager {
            spec,
            runtime,
            driver,
            image: DEFAULT_IMAGE.to_string(),
            pool_limits: PoolLimits::default(),
            ready_policy: RetryPolicy::deadline(READY_DEADLINE, READY_DELAY),
            discovery_policy: RetryPolicy::backoff(
                DISCOVERY_ATTEMPTS,
                DISCOVERY_DELAY,
                DISCOVERY_MAX_DELAY,
            ),
            reconnect_policy: RetryPolicy::fixed(RECONNECT_ATTEMPTS, RECONNECT_DELAY),
            container: None,
            endpoint: None,
            client: None,
            terminated: false,
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_pool_limits(mut self, limits: PoolLimits) -> Self {
        self.pool_limits = limits;
        self
    }

    /// Replace the launch readiness policy (deadline / delay).
    pub fn with_ready_policy(mut self, policy: RetryPolicy) -> Self {
        self.ready_policy = policy;
        self
    }

    /// Replace the port-discovery policy.
    pub fn with_discovery_policy(mut self, policy: RetryPolicy) -> Self {
        self.discovery_policy = policy;
        self
    }

    /// Replace the reconnect policy used by [`get_client`](Self::get_client).
    pub fn with_reconnect_policy(mut self, policy: RetryPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }

    pub fn spec(&self) -> &InstanceSpec {
        &self.spec
    }

    /// Start the container, wait until the database inside it accepts
    /// connections, and return a live client handle.
    ///
    /// Order is strict: start, then port discovery (with backoff — the
    /// mapping is not always queryable immediately), then connection polling
    /// under the readiness deadline. The first successful connection is
    /// cached and the resolved endpoint memoized.
    ///
    /// On readiness timeout the error carries the last connection failure,
    /// and the container handle stays set so `cleanup` can terminate it.
    /// Cancelling `cancel` aborts promptly with the handle likewise set.
    pub async fn launch(&mut self, cancel: &CancellationToken) -> Result<D::Client> {
        let name = self.spec.instance_name();

        if self.terminated {
            return Err(Error::Terminated { name });
        }
        // Already ready: launch is idempotent once a client exists.
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }

        let req = StartRequest {
            name: name.clone(),
            image: self.image.clone(),
            env: self.spec.env_assignments(),
            internal_port: POSTGRES_PORT,
        };

        info!("Starting postgres container '{}' from {}", name, self.image);
        let handle = match self.runtime.start(&req).await {
            Ok(handle) => handle,
            Err(DockerError::DaemonUnavailable) => return Err(Error::DaemonUnavailable),
            Err(source) => return Err(Error::Provisioning { name, source }),
        };
        // Recorded before anything else so a failed launch is cleanable.
        self.container = Some(handle.clone());
        debug!("Container '{}' started with id {}", name, handle.id);

        let endpoint = self.discover_endpoint(&handle, cancel).await?;
        info!(
            "Container '{}' published on {}:{}",
            name, endpoint.host, endpoint.port
        );
        self.endpoint = Some(endpoint.clone());

        let conn_str = self.spec.connection_string(&endpoint.host, endpoint.port);
        let driver = &self.driver;
        let limits = self.pool_limits;
        let connected = retry(&self.ready_policy, cancel, || {
            let conn_str = conn_str.clone();
            async move { driver.connect(&conn_str, limits).await }
        })
        .await;

        match connected {
            Ok(client) => {
                info!("Database in '{}' is ready", name);
                self.client = Some(client.clone());
                Ok(client)
            }
            Err(RetryError::Cancelled) => Err(Error::Cancelled { name }),
            Err(RetryError::Exhausted {
                attempts,
                waited,
                last,
            }) => {
                warn!(
                    "Database in '{}' not ready after {} attempts over {:?}",
                    name, attempts, waited
                );
                if let Ok(tail) = self.runtime.logs(&handle, LOG_TAIL).await {
                    if !tail.is_empty() {
                        warn!("Last log lines from '{}':\n{}", name, tail.trim_end());
                    }
                }
                Err(Error::ReadinessTimeout {
                    name,
                    waited,
                    source: Box::new(last),
                })
            }
        }
    }

    /// Port-mapping discovery under the bounded backoff policy.
    async fn discover_endpoint(
        &self,
        handle: &ContainerHandle,
        cancel: &CancellationToken,
    ) -> Result<HostEndpoint> {
        let runtime = &self.runtime;
        let result = retry(&self.discovery_policy, cancel, || async move {
            runtime.port_mapping(handle, POSTGRES_PORT).await
        })
        .await;

        match result {
            Ok(endpoint) => Ok(endpoint),
            Err(RetryError::Cancelled) => Err(Error::Cancelled {
                name: handle.name.clone(),
            }),
            Err(RetryError::Exhausted { attempts, last, .. }) => Err(Error::Discovery {
                name: handle.name.clone(),
                attempts,
                source: last,
            }),
        }
    }

    /// The host port the instance is reachable on.
    ///
    /// Memoized: the first successful resolution is cached and never
    /// re-queried. Unlike the launch path this performs a single discovery
    /// query with no retries — a manager asked for its port is assumed
    /// already launched.
    pub async fn get_port(&mut self) -> Result<u16> {
        if let Some(endpoint) = &self.endpoint {
            return Ok(endpoint.port);
        }
        let Some(handle) = &self.container else {
            return Err(Error::NotLaunched {
                name: self.spec.instance_name(),
            });
        };

        let endpoint = self
            .runtime
            .port_mapping(handle, POSTGRES_PORT)
            .await
            .map_err(|source| Error::Discovery {
                name: handle.name.clone(),
                attempts: 1,
                source,
            })?;
        let port = endpoint.port;
        self.endpoint = Some(endpoint);
        Ok(port)
    }

    /// A client handle for the running instance.
    ///
    /// Returns the cached handle when present. Otherwise reconnects to the
    /// resolved endpoint under the short reconnect policy — this path exists
    /// for re-acquiring a handle without repeating the full launch sequence,
    /// and applies the same conservative pool bounds.
    pub async fn get_client(&mut self) -> Result<D::Client> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }

        let port = self.get_port().await?;
        let endpoint = match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            // get_port just memoized it; reaching here means no container.
            None => {
                return Err(Error::NotLaunched {
                    name: self.spec.instance_name(),
                })
            }
        };
        debug_assert_eq!(port, endpoint.port);

        let conn_str = self.spec.connection_string(&endpoint.host, endpoint.port);
        let driver = &self.driver;
        let limits = self.pool_limits;
        // Reconnection is not cancellable — it is short and bounded.
        let cancel = CancellationToken::new();
        let connected = retry(&self.reconnect_policy, &cancel, || {
            let conn_str = conn_str.clone();
            async move { driver.connect(&conn_str, limits).await }
        })
        .await;

        match connected {
            Ok(client) => {
                self.client = Some(client.clone());
                Ok(client)
            }
            Err(RetryError::Cancelled) => unreachable!("token is never cancelled"),
            Err(RetryError::Exhausted { last, .. }) => Err(Error::ReconnectFailed {
                name: self.spec.instance_name(),
                source: Box::new(last),
            }),
        }
    }

    /// Terminate the container and invalidate the cached port and client.
    ///
    /// Idempotent: succeeds trivially when nothing is recorded. On failure
    /// the state is left intact so the caller can retry — a non-terminated
    /// container is a resource leak across test runs. Callable from any
    /// state, including after a failed or cancelled launch.
    pub async fn cleanup(&mut self) -> Result<()> {
        let Some(handle) = &self.container else {
            return Ok(());
        };

        info!("Terminating container '{}'", handle.name);
        self.runtime
            .terminate(handle)
            .await
            .map_err(|source| Error::Teardown {
                name: handle.name.clone(),
                source,
            })?;

        self.container = None;
        self.endpoint = None;
        self.client = None;
        self.terminated = true;
        Ok(())
    }
}

impl<R: ContainerRuntime, D: Driver> Drop for InstanceManager<R, D> {
    /// Last-resort leak guard: a manager dropped with a live container (a
    /// panicking test, a forgotten `cleanup`) force-removes it synchronously.
    fn drop(&mut self) {
        if let Some(handle) = &self.container {
            warn!(
                "InstanceManager dropped with container '{}' still recorded; removing",
                handle.name
            );
            self.runtime.terminate_blocking(handle);
        }
    }
}
