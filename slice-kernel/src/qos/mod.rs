/**
 * QOS BACKEND ADAPTER - Slice bandwidth enforcement on switch egress interfaces
 *
 * ROLE:
 * Turns "slice X needs pct% between src and dst on this path" into backend
 * ensure / remove calls, one per egress interface, each bounded by a timeout.
 *
 * BACKENDS:
 * - tc       : linux traffic control, HTB hierarchy per interface (tc.rs)
 * - script   : operator-provided create/delete command templates (script.rs)
 * - disabled : accepts everything, enforces nothing
 *
 * CONTRACT NOTES:
 * - class id = first character of the slice name, mod 50, plus 10. Names
 *   sharing a first character share a class.
 * - remove is interface-scoped: it strips rate limiting from every slice
 *   using that interface.
 */

pub mod script;
pub mod tc;

use crate::error::SliceError;
use crate::models::Endpoint;
use crate::path::ResolvedPath;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub use script::ScriptBackend;
pub use tc::{RemovalMode, TcBackend};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueRequest {
    pub slice: String,
    pub capacity_pct: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub interface: String,
}

#[async_trait]
pub trait QosBackend: Send + Sync {
    async fn ensure_queue(&self, request: &QueueRequest) -> anyhow::Result<()>;
    async fn remove_queue(&self, slice: &str, interface: &str) -> anyhow::Result<()>;
}

/// Numeric HTB class id for a slice.
pub fn class_id(slice: &str) -> u32 {
    slice.chars().next().map_or(10, |c| c as u32 % 50 + 10)
}

/// Which egress interfaces of a path receive a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QosScope {
    #[default]
    EveryHop,
    FirstHop,
}

pub struct QosAdapter {
    backend: Arc<dyn QosBackend>,
    timeout: Duration,
    interface_template: String,
    scope: QosScope,
}

impl QosAdapter {
    pub fn new(backend: Arc<dyn QosBackend>, timeout: Duration, interface_template: impl Into<String>, scope: QosScope) -> Self {
        Self { backend, timeout, interface_template: interface_template.into(), scope }
    }

    pub fn interface_name(&self, endpoint: Endpoint) -> String {
        self.interface_template
            .replace("{switch}", &endpoint.switch.0.to_string())
            .replace("{port}", &endpoint.port.0.to_string())
    }

    /// Egress interfaces of a path that get a queue. A path that never leaves
    /// its switch is shaped on the port facing the destination host.
    pub fn interfaces_for(&self, path: &ResolvedPath) -> Vec<String> {
        let mut egress: Vec<Endpoint> = path.hops.iter().map(|h| h.egress).collect();
        if egress.is_empty() {
            egress.push(path.dst.attachment);
        }
        if self.scope == QosScope::FirstHop {
            egress.truncate(1);
        }
        egress.into_iter().map(|e| self.interface_name(e)).collect()
    }

    pub async fn ensure(&self, request: &QueueRequest) -> Result<(), SliceError> {
        let outcome = tokio::time::timeout(self.timeout, self.backend.ensure_queue(request)).await;
        self.settle(&request.interface, outcome)?;
        debug!(
            "[qos] queue for '{}' ({}% {} -> {}) on {}",
            request.slice, request.capacity_pct, request.src, request.dst, request.interface
        );
        Ok(())
    }

    pub async fn remove(&self, slice: &str, interface: &str) -> Result<(), SliceError> {
        let outcome = tokio::time::timeout(self.timeout, self.backend.remove_queue(slice, interface)).await;
        self.settle(interface, outcome)?;
        debug!("[qos] removed queues on {} (slice '{}')", interface, slice);
        Ok(())
    }

    fn settle(
        &self,
        interface: &str,
        outcome: Result<anyhow::Result<()>, tokio::time::error::Elapsed>,
    ) -> Result<(), SliceError> {
        let reason = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => format!("{e:#}"),
            Err(_) => format!("timed out after {} ms", self.timeout.as_millis()),
        };
        Err(SliceError::QosBackendFailure { interface: interface.to_string(), reason })
    }
}

/// Backend used when enforcement is switched off.
pub struct NullBackend;

#[async_trait]
impl QosBackend for NullBackend {
    async fn ensure_queue(&self, request: &QueueRequest) -> anyhow::Result<()> {
        debug!("[qos] disabled, not shaping '{}' on {}", request.slice, request.interface);
        Ok(())
    }

    async fn remove_queue(&self, _slice: &str, _interface: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Process spawning seam for the command-driven backends.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> anyhow::Result<CommandOutput>;
}

pub struct TokioRunner;

#[async_trait]
impl CommandRunner for TokioRunner {
    async fn run(&self, program: &str, args: &[String]) -> anyhow::Result<CommandOutput> {
        use anyhow::Context;
        let output = tokio::process::Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to spawn {program}"))?;

        Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Runs a command and turns a non-zero exit into an error carrying stderr.
pub(crate) async fn run_checked(runner: &dyn CommandRunner, program: &str, args: Vec<String>) -> anyhow::Result<CommandOutput> {
    let output = runner.run(program, &args).await?;
    if !output.success() {
        anyhow::bail!(
            "`{} {}` exited with {}: {}",
            program,
            args.join(" "),
            output.code,
            output.stderr.trim()
        );
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Host, LinkId, SwitchId};
    use crate::path::Hop;

    struct Stuck;

    #[async_trait]
    impl QosBackend for Stuck {
        async fn ensure_queue(&self, _request: &QueueRequest) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }

        async fn remove_queue(&self, _slice: &str, interface: &str) -> anyhow::Result<()> {
            anyhow::bail!("RTNETLINK answers: No such file or directory ({interface})")
        }
    }

    fn two_hop_path() -> ResolvedPath {
        let host = |addr: &str, sw, port| Host { addr: addr.parse().unwrap(), attachment: Endpoint::new(sw, port) };
        ResolvedPath {
            src: host("10.0.0.1", 1, 3),
            dst: host("10.0.0.3", 3, 2),
            switches: vec![SwitchId(1), SwitchId(2), SwitchId(3)],
            hops: vec![
                Hop {
                    link: LinkId::new(Endpoint::new(1, 1), Endpoint::new(2, 1)),
                    egress: Endpoint::new(1, 1),
                    ingress: Endpoint::new(2, 1),
                },
                Hop {
                    link: LinkId::new(Endpoint::new(2, 2), Endpoint::new(3, 1)),
                    egress: Endpoint::new(2, 2),
                    ingress: Endpoint::new(3, 1),
                },
            ],
        }
    }

    fn request() -> QueueRequest {
        QueueRequest {
            slice: "gaming".into(),
            capacity_pct: 60,
            src: "10.0.0.1".parse().unwrap(),
            dst: "10.0.0.8".parse().unwrap(),
            interface: "s1-eth2".into(),
        }
    }

    #[test]
    fn class_id_only_looks_at_first_character() {
        assert_eq!(class_id("gaming"), 'g' as u32 % 50 + 10);
        assert_eq!(class_id("gaming"), 13);
        assert_eq!(class_id("guest"), class_id("gaming"));
        assert_eq!(class_id("emergency"), 11);
    }

    #[test]
    fn interfaces_follow_scope() {
        let every = QosAdapter::new(Arc::new(NullBackend), Duration::from_secs(1), "s{switch}-eth{port}", QosScope::EveryHop);
        assert_eq!(every.interfaces_for(&two_hop_path()), vec!["s1-eth1", "s2-eth2"]);

        let first = QosAdapter::new(Arc::new(NullBackend), Duration::from_secs(1), "s{switch}-eth{port}", QosScope::FirstHop);
        assert_eq!(first.interfaces_for(&two_hop_path()), vec!["s1-eth1"]);
    }

    #[tokio::test]
    async fn timeout_and_error_become_backend_failures() {
        let adapter = QosAdapter::new(Arc::new(Stuck), Duration::from_millis(20), "s{switch}-eth{port}", QosScope::EveryHop);

        let err = adapter.ensure(&request()).await.unwrap_err();
        match err {
            SliceError::QosBackendFailure { interface, reason } => {
                assert_eq!(interface, "s1-eth2");
                assert!(reason.contains("timed out"));
            }
            other => panic!("unexpected error {other:?}"),
        }

        let err = adapter.remove("gaming", "s1-eth2").await.unwrap_err();
        assert!(err.to_string().contains("RTNETLINK"));
    }
}
