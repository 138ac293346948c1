//! Post-boot checks run against a verification VM.

use std::time::Duration;

use async_trait::async_trait;
use containerdisks_core::error::{DiskError, Result};
use regex::Regex;

use crate::cluster::{Cluster, VmInstance};
use crate::console::{Expecter, LoginAutomaton, LoginOptions, LoginTimeouts};

/// Kernel message printed when the guest booted with secure boot.
const SECURE_BOOT_ENABLED: &str = "secureboot: Secure boot enabled";
const SECURE_BOOT_TIMEOUT: Duration = Duration::from_secs(180);

/// A check proving a booted guest is usable.
#[async_trait]
pub trait GuestTest: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    async fn run(&self, vm: &VmInstance, cluster: &dyn Cluster) -> Result<()>;
}

/// The guest agent answers the cluster's OS info query.
#[derive(Debug, Clone, Default)]
pub struct GuestOsInfo;

#[async_trait]
impl GuestTest for GuestOsInfo {
    fn name(&self) -> &str {
        "guest-os-info"
    }

    async fn run(&self, vm: &VmInstance, cluster: &dyn Cluster) -> Result<()> {
        let info = cluster
            .guest_os_info(&vm.name)
            .await
            .map_err(|e| DiskError::GuestTestError {
                test: self.name().to_string(),
                message: e.to_string(),
            })?;

        let os = info
            .pointer("/os/prettyName")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        tracing::info!(vm = %vm.name, os, "Guest agent reported OS info");
        Ok(())
    }
}

/// The guest kernel reports secure boot on the serial console.
#[derive(Debug, Clone)]
pub struct SecureBootCheck {
    pub timeout: Duration,
}

impl Default for SecureBootCheck {
    fn default() -> Self {
        Self {
            timeout: SECURE_BOOT_TIMEOUT,
        }
    }
}

#[async_trait]
impl GuestTest for SecureBootCheck {
    fn name(&self) -> &str {
        "secure-boot"
    }

    async fn run(&self, vm: &VmInstance, cluster: &dyn Cluster) -> Result<()> {
        let console = cluster.console(&vm.name).await?;
        let mut expecter = Expecter::new(console);
        let pattern = Regex::new(SECURE_BOOT_ENABLED)
            .map_err(|e| DiskError::Other(format!("invalid pattern: {}", e)))?;

        expecter
            .expect(&pattern, self.timeout)
            .await
            .map_err(|e| DiskError::GuestTestError {
                test: self.name().to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }
}

/// Log in on the serial console and configure a root shell.
#[derive(Debug, Clone)]
pub struct ConsoleLogin {
    pub username: String,
    pub password: String,
    pub timeouts: LoginTimeouts,
}

impl ConsoleLogin {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            timeouts: LoginTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: LoginTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}

#[async_trait]
impl GuestTest for ConsoleLogin {
    fn name(&self) -> &str {
        "console-login"
    }

    async fn run(&self, vm: &VmInstance, cluster: &dyn Cluster) -> Result<()> {
        let options = LoginOptions::new(&self.username, &self.password, &vm.name)?;
        let console = cluster.console(&vm.name).await?;

        let mut automaton = LoginAutomaton::new(console, options).with_timeouts(self.timeouts);
        let state = automaton.run().await?;
        tracing::info!(
            vm = %vm.name,
            user = %self.username,
            state = %state,
            "Console login succeeded"
        );
        Ok(())
    }
}
