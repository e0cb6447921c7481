//! Boundary to whatever actually starts and stops the backing instance.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::config::ControlConfig;

#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("command exited with {status}: {stderr}")]
    CommandFailed {
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Start, stop and address rebinding against the compute provider. Every
/// operation must be idempotent, the orchestrator retries freely, and must
/// only return `Ok` once the effect has actually landed (a started instance
/// is running, a rebound address resolves to its new target).
#[async_trait]
pub trait ControlPlane: Send + Sync + 'static {
    async fn start_instance(&self, instance_id: &str) -> Result<(), ControlPlaneError>;

    async fn stop_instance(&self, instance_id: &str) -> Result<(), ControlPlaneError>;

    /// Points `address` at `instance_id`, reassociating if it's currently
    /// bound to the other instance.
    async fn associate_address(
        &self,
        address: Ipv4Addr,
        instance_id: &str,
    ) -> Result<(), ControlPlaneError>;
}

/// Runs the operator-configured command for each operation, which keeps the
/// cloud CLI of choice (and its credentials) outside this process.
pub struct ExecControlPlane {
    config: ControlConfig,
}

impl ExecControlPlane {
    pub fn new(config: ControlConfig) -> Self {
        Self { config }
    }

    async fn run(&self, command: String) -> Result<(), ControlPlaneError> {
        debug!("running control plane command: {command}");
        let output = Command::new("sh").arg("-c").arg(&command).output().await?;
        if !output.status.success() {
            return Err(ControlPlaneError::CommandFailed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for ExecControlPlane {
    async fn start_instance(&self, instance_id: &str) -> Result<(), ControlPlaneError> {
        self.run(self.config.start_command.replace("{instance}", instance_id))
            .await
    }

    async fn stop_instance(&self, instance_id: &str) -> Result<(), ControlPlaneError> {
        self.run(self.config.stop_command.replace("{instance}", instance_id))
            .await
    }

    async fn associate_address(
        &self,
        address: Ipv4Addr,
        instance_id: &str,
    ) -> Result<(), ControlPlaneError> {
        self.run(
            self.config
                .rebind_command
                .replace("{instance}", instance_id)
                .replace("{address}", &address.to_string()),
        )
        .await
    }
}
