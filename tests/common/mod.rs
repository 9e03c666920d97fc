//! Stub capabilities for exercising the provisioning protocol without
//! Docker or a real database. Both stubs count calls so tests can assert
//! exactly how many runtime queries and connection attempts happened.

#![allow(dead_code)]

use async_trait::async_trait;
use pgbox::{ContainerHandle, ContainerRuntime, DockerError, Driver, HostEndpoint, PoolLimits, StartRequest};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

// ============================================================================
// Stub container runtime
// ============================================================================

#[derive(Default)]
struct RuntimeState {
    port: u16,
    // Fail the first N port-mapping queries with PortNotPublished.
    mapping_failures: usize,
    fail_start: bool,
    // Fail the first N terminate calls.
    terminate_failures: usize,

    start_calls: AtomicUsize,
    mapping_calls: AtomicUsize,
    terminate_calls: AtomicUsize,
    blocking_terminate_calls: AtomicUsize,
}

/// Cloneable stub runtime; clones share state, so tests keep one clone for
/// assertions and hand the other to the manager.
#[derive(Clone)]
pub struct StubRuntime {
    state: Arc<RuntimeState>,
}

impl StubRuntime {
    pub fn new(port: u16) -> Self {
        StubRuntime {
            state: Arc::new(RuntimeState {
                port,
                ..Default::default()
            }),
        }
    }

    pub fn with_mapping_failures(port: u16, failures: usize) -> Self {
        StubRuntime {
            state: Arc::new(RuntimeState {
                port,
                mapping_failures: failures,
                ..Default::default()
            }),
        }
    }

    pub fn failing_start() -> Self {
        StubRuntime {
            state: Arc::new(RuntimeState {
                fail_start: true,
                ..Default::default()
            }),
        }
    }

    pub fn with_terminate_failures(port: u16, failures: usize) -> Self {
        StubRuntime {
            state: Arc::new(RuntimeState {
                port,
                terminate_failures: failures,
                ..Default::default()
            }),
        }
    }

    pub fn start_calls(&self) -> usize {
        self.state.start_calls.load(Ordering::SeqCst)
    }

    pub fn mapping_calls(&self) -> usize {
        self.state.mapping_calls.load(Ordering::SeqCst)
    }

    pub fn terminate_calls(&self) -> usize {
        self.state.terminate_calls.load(Ordering::SeqCst)
    }

    pub fn blocking_terminate_calls(&self) -> usize {
        self.state.blocking_terminate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerRuntime for StubRuntime {
    async fn start(&self, req: &StartRequest) -> Result<ContainerHandle, DockerError> {
        self.state.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_start {
            return Err(DockerError::CommandFailed {
                command: "docker run".to_string(),
                stderr: "no such image".to_string(),
                exit_code: Some(125),
            });
        }
        Ok(ContainerHandle {
            id: format!("stub-id-{}", req.name),
            name: req.name.clone(),
        })
    }

    async fn port_mapping(
        &self,
        handle: &ContainerHandle,
        internal_port: u16,
    ) -> Result<HostEndpoint, DockerError> {
        let n = self.state.mapping_calls.fetch_add(1, Ordering::SeqCst);
        if n < self.state.mapping_failures {
            return Err(DockerError::PortNotPublished {
                container: handle.name.clone(),
                port: internal_port,
            });
        }
        Ok(HostEndpoint {
            host: "127.0.0.1".to_string(),
            port: self.state.port,
        })
    }

    async fn terminate(&self, _handle: &ContainerHandle) -> Result<(), DockerError> {
        let n = self.state.terminate_calls.fetch_add(1, Ordering::SeqCst);
        if n < self.state.terminate_failures {
            return Err(DockerError::CommandFailed {
                command: "docker rm -f".to_string(),
                stderr: "cannot remove container".to_string(),
                exit_code: Some(1),
            });
        }
        Ok(())
    }

    async fn logs(&self, _handle: &ContainerHandle, _tail: usize) -> Result<String, DockerError> {
        Ok(String::new())
    }

    fn terminate_blocking(&self, _handle: &ContainerHandle) {
        self.state
            .blocking_terminate_calls
            .fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Stub driver
// ============================================================================

#[derive(Debug)]
pub struct ConnectRefused;

impl fmt::Display for ConnectRefused {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection refused")
    }
}

impl std::error::Error for ConnectRefused {}

/// The "client handle" a stub connection yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubClient {
    pub connection_string: String,
}

#[derive(Default)]
struct DriverState {
    // Fail the first N connection attempts.
    failures: usize,
    connect_calls: AtomicUsize,
    attempt_times: Mutex<Vec<Instant>>,
    connection_strings: Mutex<Vec<String>>,
}

/// Cloneable stub driver; fails the first `failures` attempts, then succeeds.
#[derive(Clone)]
pub struct StubDriver {
    state: Arc<DriverState>,
}

impl StubDriver {
    /// A driver that succeeds on the first attempt.
    pub fn ready() -> Self {
        Self::failing_times(0)
    }

    /// A driver that fails the first `failures` attempts, then succeeds.
    pub fn failing_times(failures: usize) -> Self {
        StubDriver {
            state: Arc::new(DriverState {
                failures,
                ..Default::default()
            }),
        }
    }

    /// A driver that never succeeds.
    pub fn never_ready() -> Self {
        Self::failing_times(usize::MAX)
    }

    pub fn connect_calls(&self) -> usize {
        self.state.connect_calls.load(Ordering::SeqCst)
    }

    /// Instants (paused-clock) at which each attempt was made.
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.state.attempt_times.lock().unwrap().clone()
    }

    pub fn last_connection_string(&self) -> Option<String> {
        self.state.connection_strings.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Driver for StubDriver {
    type Client = StubClient;
    type Error = ConnectRefused;

    async fn connect(
        &self,
        connection_string: &str,
        _limits: PoolLimits,
    ) -> Result<StubClient, ConnectRefused> {
        let n = self.state.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.state.attempt_times.lock().unwrap().push(Instant::now());
        self.state
            .connection_strings
            .lock()
            .unwrap()
            .push(connection_string.to_string());
        if n < self.state.failures {
            Err(ConnectRefused)
        } else {
            Ok(StubClient {
                connection_string: connection_string.to_string(),
            })
        }
    }
}

// ============================================================================
// Shared fixtures
// ============================================================================

pub fn test_spec() -> pgbox::InstanceSpec {
    pgbox::InstanceSpec::new("u", "p", "d", "svc", "unit")
}
