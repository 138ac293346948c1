//! KubeVirt client over the Kubernetes REST API.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use containerdisks_core::error::{DiskError, Result};
use serde::Deserialize;

use super::console::VirtctlConsole;
use super::spec::VmSpec;
use super::{Cluster, ConsoleStream, VmInstance, VmPhase};

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const VMI_API: &str = "apis/kubevirt.io/v1";
const SUBRESOURCE_API: &str = "apis/subresources.kubevirt.io/v1";

/// How to reach the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    /// API server base URL, e.g. `https://127.0.0.1:6443`
    pub api_server: String,
    /// Bearer token
    pub token: Option<String>,
    /// PEM bundle used to verify the API server certificate
    pub ca_file: Option<PathBuf>,
    /// Namespace the verification VMs are created in
    pub namespace: String,
    /// `virtctl` binary used for console access
    pub virtctl: String,
}

impl ClusterConfig {
    /// Resolve the connection from explicit flags, environment and, when
    /// running inside a pod, the mounted service account.
    ///
    /// - API server: `api_server`, `KUBE_API_SERVER`, then
    ///   `KUBERNETES_SERVICE_HOST`/`KUBERNETES_SERVICE_PORT`
    /// - Token: `token_file`, `KUBE_TOKEN`, then the service account token
    /// - CA: `ca_file`, then the service account CA
    pub fn resolve(
        api_server: Option<String>,
        token_file: Option<&Path>,
        ca_file: Option<PathBuf>,
        namespace: impl Into<String>,
    ) -> Result<Self> {
        let service_account = Path::new(SERVICE_ACCOUNT_DIR);

        let api_server = api_server
            .or_else(|| std::env::var("KUBE_API_SERVER").ok())
            .or_else(in_cluster_api_server)
            .ok_or_else(|| {
                DiskError::ConfigError(
                    "No Kubernetes API server configured (use --kube-api-server or KUBE_API_SERVER)"
                        .to_string(),
                )
            })?;

        let token = match token_file {
            Some(path) => Some(read_token(path)?),
            None => match std::env::var("KUBE_TOKEN") {
                Ok(token) => Some(token),
                Err(_) => {
                    let path = service_account.join("token");
                    if path.exists() {
                        Some(read_token(&path)?)
                    } else {
                        None
                    }
                }
            },
        };

        let ca_file = ca_file.or_else(|| {
            let path = service_account.join("ca.crt");
            path.exists().then_some(path)
        });

        Ok(Self {
            api_server: api_server.trim_end_matches('/').to_string(),
            token,
            ca_file,
            namespace: namespace.into(),
            virtctl: std::env::var("VIRTCTL").unwrap_or_else(|_| "virtctl".to_string()),
        })
    }
}

fn in_cluster_api_server() -> Option<String> {
    let host = std::env::var("KUBERNETES_SERVICE_HOST").ok()?;
    let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
    Some(format!("https://{}:{}", host, port))
}

fn read_token(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map(|t| t.trim().to_string())
        .map_err(|e| {
            DiskError::ConfigError(format!("Failed to read token file {}: {}", path.display(), e))
        })
}

/// `Cluster` implementation for KubeVirt.
pub struct KubevirtCluster {
    http: reqwest::Client,
    config: ClusterConfig,
}

/// The parts of a VirtualMachineInstance response that are read back.
#[derive(Debug, Deserialize)]
struct VmiObject {
    metadata: VmiMetadata,
    #[serde(default)]
    status: VmiStatus,
}

#[derive(Debug, Deserialize)]
struct VmiMetadata {
    name: String,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct VmiStatus {
    #[serde(default)]
    phase: Option<String>,
}

impl KubevirtCluster {
    pub fn new(config: ClusterConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(ca_file) = &config.ca_file {
            let pem = std::fs::read(ca_file).map_err(|e| {
                DiskError::ConfigError(format!(
                    "Failed to read CA file {}: {}",
                    ca_file.display(),
                    e
                ))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                DiskError::ConfigError(format!("Invalid CA file {}: {}", ca_file.display(), e))
            })?;
            builder = builder.add_root_certificate(cert);
        }
        let http = builder
            .build()
            .map_err(|e| DiskError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    fn vmi_url(&self, name: Option<&str>) -> String {
        let base = format!(
            "{}/{}/namespaces/{}/virtualmachineinstances",
            self.config.api_server, VMI_API, self.config.namespace
        );
        match name {
            Some(name) => format!("{}/{}", base, name),
            None => base,
        }
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let request = self.http.request(method, url);
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| DiskError::ClusterError(format!("{}: {}", what, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(DiskError::ClusterError(format!(
            "{}: {} {}",
            what,
            status,
            body.trim()
        )))
    }

    fn instance(&self, object: VmiObject) -> VmInstance {
        VmInstance {
            name: object.metadata.name,
            namespace: object
                .metadata
                .namespace
                .unwrap_or_else(|| self.config.namespace.clone()),
            phase: object
                .status
                .phase
                .as_deref()
                .map(VmPhase::parse)
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Cluster for KubevirtCluster {
    async fn create(&self, spec: &VmSpec) -> Result<VmInstance> {
        let spec = spec.clone().with_namespace(&self.config.namespace);
        tracing::debug!(vm = spec.name(), namespace = %self.config.namespace, "Creating VMI");

        let response = self
            .send(
                self.request(reqwest::Method::POST, &self.vmi_url(None)).json(&spec),
                &format!("Failed to create VMI {}", spec.name()),
            )
            .await?;
        let object: VmiObject = response
            .json()
            .await
            .map_err(|e| DiskError::ClusterError(format!("Invalid VMI response: {}", e)))?;
        Ok(self.instance(object))
    }

    async fn get(&self, name: &str) -> Result<VmInstance> {
        let response = self
            .send(
                self.request(reqwest::Method::GET, &self.vmi_url(Some(name))),
                &format!("Failed to get VMI {}", name),
            )
            .await?;
        let object: VmiObject = response
            .json()
            .await
            .map_err(|e| DiskError::ClusterError(format!("Invalid VMI response: {}", e)))?;
        Ok(self.instance(object))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let response = self
            .request(reqwest::Method::DELETE, &self.vmi_url(Some(name)))
            .send()
            .await
            .map_err(|e| DiskError::ClusterError(format!("Failed to delete VMI {}: {}", name, e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::debug!(vm = name, "VMI already gone");
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(DiskError::ClusterError(format!(
                "Failed to delete VMI {}: {}",
                name,
                response.status()
            )));
        }
        Ok(())
    }

    async fn console(&self, name: &str) -> Result<Box<dyn ConsoleStream>> {
        let console = VirtctlConsole::spawn(&self.config.virtctl, &self.config.namespace, name)?;
        Ok(Box::new(console))
    }

    async fn guest_os_info(&self, name: &str) -> Result<serde_json::Value> {
        let url = format!(
            "{}/{}/namespaces/{}/virtualmachineinstances/{}/guestosinfo",
            self.config.api_server, SUBRESOURCE_API, self.config.namespace, name
        );
        let response = self
            .send(
                self.request(reqwest::Method::GET, &url),
                &format!("Failed to get guest OS info of {}", name),
            )
            .await?;
        response
            .json()
            .await
            .map_err(|e| DiskError::ClusterError(format!("Invalid guest OS info: {}", e)))
    }
}
