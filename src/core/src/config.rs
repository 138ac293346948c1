use serde::{Deserialize, Serialize};

/// Default target registry for pushed containerdisks.
pub const DEFAULT_REGISTRY: &str = "quay.io/containerdisks";

/// Default namespace the verification VMs are created in.
pub const DEFAULT_NAMESPACE: &str = "kubevirt";

/// Default number of seconds to wait for a VM to report running.
pub const DEFAULT_BOOT_TIMEOUT_SECS: u64 = 600;

/// Options shared by every pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    /// Registry path the images are pushed to (e.g., "quay.io/containerdisks")
    pub registry: String,

    /// Accept plain HTTP and invalid TLS certificates when talking to the registry
    pub allow_insecure_registry: bool,

    /// Perform every step except the final push
    pub dry_run: bool,

    /// Restrict the run to the artifact whose `name:version` matches
    pub focus: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            registry: DEFAULT_REGISTRY.to_string(),
            allow_insecure_registry: false,
            dry_run: false,
            focus: None,
        }
    }
}

impl Options {
    /// The focus key, with an empty string treated as "no focus".
    pub fn focus(&self) -> Option<&str> {
        self.focus.as_deref().filter(|f| !f.is_empty())
    }
}

/// Options of the publish pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishOptions {
    /// Rebuild and push even if the registry is up to date
    pub force_build: bool,

    /// Number of parallel workers
    pub workers: usize,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            force_build: false,
            workers: 1,
        }
    }
}

/// Options of the verify pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOptions {
    /// Number of parallel workers
    pub workers: usize,

    /// Registry the cluster pulls from, if it differs from the public one
    pub cluster_registry: Option<String>,

    /// Namespace to create the VMs in
    pub namespace: String,

    /// Seconds to wait for a VM to be running
    pub timeout_secs: u64,

    /// Seconds between two VM status polls
    pub poll_interval_secs: u64,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            cluster_registry: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            timeout_secs: DEFAULT_BOOT_TIMEOUT_SECS,
            poll_interval_secs: 1,
        }
    }
}

impl VerifyOptions {
    /// Registry host the cluster should pull from.
    ///
    /// Falls back to the public registry when no override is configured.
    pub fn cluster_registry_or<'a>(&'a self, registry: &'a str) -> &'a str {
        self.cluster_registry
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or(registry)
    }
}
