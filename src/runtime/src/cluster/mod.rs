//! Virtualization cluster access.
//!
//! Verification only needs to create a VM, watch its phase, talk to its
//! serial console, query its guest agent and delete it again. The `Cluster`
//! trait covers exactly that; `KubevirtCluster` implements it against the
//! Kubernetes API.

mod console;
mod kubevirt;
mod spec;

use std::fmt;

use async_trait::async_trait;
use containerdisks_core::error::Result;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

pub use console::VirtctlConsole;
pub use kubevirt::{ClusterConfig, KubevirtCluster};
pub use spec::{VmSpec, VolumeSource};

/// Lifecycle phase of a VirtualMachineInstance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum VmPhase {
    #[default]
    Pending,
    Scheduling,
    Scheduled,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl VmPhase {
    /// Parse the `status.phase` string. Unrecognised or empty phases are `Unknown`.
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => Self::Pending,
            "Scheduling" => Self::Scheduling,
            "Scheduled" => Self::Scheduled,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// Whether the VM can no longer reach `Running`.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for VmPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A VM as reported by the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmInstance {
    pub name: String,
    pub namespace: String,
    pub phase: VmPhase,
}

/// Bidirectional byte stream attached to a serial console.
pub trait ConsoleStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ConsoleStream for T {}

/// Operations on the virtualization cluster.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Create the VM described by `spec`.
    async fn create(&self, spec: &VmSpec) -> Result<VmInstance>;

    /// Current state of VM `name`.
    async fn get(&self, name: &str) -> Result<VmInstance>;

    /// Delete VM `name`.
    async fn delete(&self, name: &str) -> Result<()>;

    /// Open the serial console of VM `name`.
    async fn console(&self, name: &str) -> Result<Box<dyn ConsoleStream>>;

    /// Guest agent report of VM `name`.
    async fn guest_os_info(&self, name: &str) -> Result<serde_json::Value>;
}
