//! Docker CLI runtime implementation.
//!
//! All Docker interactions go through [`DockerClient`], which provides
//! consistent timeout handling, error mapping to [`DockerError`], and a
//! single point where `Command::new("docker")` is constructed.

use super::{ContainerHandle, ContainerRuntime, DockerError, HostEndpoint, StartRequest};
use async_trait::async_trait;
use std::process::Output;
use std::time::Duration;

// Docker operation timeouts. Start covers image bring-up only — waiting for
// the database inside the container is the manager's readiness loop, not a
// docker-level concern.
const START_TIMEOUT: Duration = Duration::from_secs(30);
const INSPECT_TIMEOUT: Duration = Duration::from_secs(10);
const REMOVE_TIMEOUT: Duration = Duration::from_secs(10);
const LOGS_TIMEOUT: Duration = Duration::from_secs(10);
const DAEMON_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Production [`ContainerRuntime`] over the `docker` CLI.
///
/// Construct once and thread through the manager — the struct is cheap
/// (zero-sized today).
#[derive(Debug, Clone, Default)]
pub struct DockerClient;

impl DockerClient {
    pub fn new() -> Self {
        DockerClient
    }

    /// Run a docker command with a timeout, returning raw Output.
    async fn run(&self, args: &[&str], timeout: Duration) -> Result<Output, DockerError> {
        let result = tokio::time::timeout(
            timeout,
            tokio::process::Command::new("docker").args(args).output(),
        )
        .await;

        let cmd_str = format!("docker {}", args.join(" "));

        match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(DockerError::exec_failed(cmd_str, e)),
            Err(_) => Err(DockerError::timeout(cmd_str, timeout)),
        }
    }

    /// Run a docker command with a timeout, returning Output only if exit 0.
    async fn run_success(&self, args: &[&str], timeout: Duration) -> Result<Output, DockerError> {
        let output = self.run(args, timeout).await?;
        if output.status.success() {
            Ok(output)
        } else {
            let cmd_str = format!("docker {}", args.join(" "));
            Err(DockerError::failed(cmd_str, &output))
        }
    }

    /// Run a docker command synchronously, returning raw Output.
    fn run_sync(&self, args: &[&str]) -> Result<Output, DockerError> {
        let cmd_str = format!("docker {}", args.join(" "));
        std::process::Command::new("docker")
            .args(args)
            .output()
            .map_err(|e| DockerError::exec_failed(cmd_str, e))
    }

    /// Check if the Docker daemon is healthy and responsive.
    pub async fn daemon_healthy(&self) -> bool {
        match self
            .run(
                &["info", "--format", "{{.ServerVersion}}"],
                DAEMON_PROBE_TIMEOUT,
            )
            .await
        {
            Ok(o) => o.status.success(),
            Err(_) => false,
        }
    }

    /// Force-remove a container. Returns `Ok(())` if it doesn't exist.
    async fn rm_force(&self, container: &str) -> Result<(), DockerError> {
        let output = self.run(&["rm", "-f", container], REMOVE_TIMEOUT).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("No such container") {
            return Ok(());
        }
        Err(DockerError::failed("docker rm -f", &output))
    }

    /// Force-remove a container (synchronous). Swallows "No such container".
    fn rm_force_sync(&self, container: &str) -> Result<(), DockerError> {
        let output = self.run_sync(&["rm", "-f", container])?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("No such container") {
            return Ok(());
        }
        Err(DockerError::failed("docker rm -f", &output))
    }

    /// Parse `docker inspect` port JSON into a typed endpoint.
    ///
    /// The JSON shape is `{"5432/tcp": [{"HostIp": "...", "HostPort": "..."}]}`.
    /// A missing key, `null` bindings, or an unparsable HostPort all mean the
    /// mapping isn't registered (yet).
    fn parse_port_binding(
        json_str: &str,
        container: &str,
        internal_port: u16,
    ) -> Result<HostEndpoint, DockerError> {
        let not_published = || DockerError::PortNotPublished {
            container: container.to_string(),
            port: internal_port,
        };

        let ports: serde_json::Value =
            serde_json::from_str(json_str).map_err(|_| not_published())?;
        let key = format!("{}/tcp", internal_port);
        let binding = ports
            .get(&key)
            .and_then(|b| b.as_array())
            .and_then(|a| a.first())
            .ok_or_else(not_published)?;

        let port = binding
            .get("HostPort")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(not_published)?;

        // Docker reports "0.0.0.0" (or "") for wildcard binds; connect over
        // loopback in that case.
        let host = match binding.get("HostIp").and_then(|v| v.as_str()) {
            Some("") | Some("0.0.0.0") | Some("::") | None => "127.0.0.1".to_string(),
            Some(ip) => ip.to_string(),
        };

        Ok(HostEndpoint { host, port })
    }
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn start(&self, req: &StartRequest) -> Result<ContainerHandle, DockerError> {
        if !self.daemon_healthy().await {
            return Err(DockerError::DaemonUnavailable);
        }

        // A crashed earlier run can leave a container under the same name;
        // replace it rather than failing on the name conflict.
        self.rm_force(&req.name).await?;

        let publish = format!("127.0.0.1::{}", req.internal_port);
        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            req.name.clone(),
            "-p".into(),
            publish,
        ];
        for (key, value) in &req.env {
            args.push("-e".into());
            args.push(format!("{}={}", key, value));
        }
        args.push(req.image.clone());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run_success(&arg_refs, START_TIMEOUT).await?;

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(ContainerHandle {
            id,
            name: req.name.clone(),
        })
    }

    async fn port_mapping(
        &self,
        handle: &ContainerHandle,
        internal_port: u16,
    ) -> Result<HostEndpoint, DockerError> {
        let output = self
            .run_success(
                &[
                    "inspect",
                    "--format={{json .NetworkSettings.Ports}}",
                    &handle.id,
                ],
                INSPECT_TIMEOUT,
            )
            .await?;

        let json_str = String::from_utf8_lossy(&output.stdout);
        Self::parse_port_binding(json_str.trim(), &handle.name, internal_port)
    }

    async fn terminate(&self, handle: &ContainerHandle) -> Result<(), DockerError> {
        self.rm_force(&handle.id).await
    }

    async fn logs(&self, handle: &ContainerHandle, tail: usize) -> Result<String, DockerError> {
        let tail_str = tail.to_string();
        let output = self
            .run(&["logs", "--tail", &tail_str, &handle.id], LOGS_TIMEOUT)
            .await?;
        // Postgres writes startup output to stderr; merge both streams.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        Ok(format!("{}{}", stdout, stderr))
    }

    fn terminate_blocking(&self, handle: &ContainerHandle) {
        if let Err(e) = self.rm_force_sync(&handle.id) {
            tracing::warn!("Drop-time removal of container '{}' failed: {}", handle.name, e);
        }
    }
}
