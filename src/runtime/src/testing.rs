//! In-memory collaborators for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use containerdisks_core::error::{DiskError, Result};
use futures::stream::{self, StreamExt};
use oci_distribution::manifest::{OciDescriptor, OciImageManifest};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::artifact::{Artifact, ArtifactDetails, Metadata};
use crate::cluster::{Cluster, ConsoleStream, VmInstance, VmPhase, VmSpec};
use crate::guest::GuestTest;
use crate::http::{ByteStream, Getter};
use crate::oci::{
    DiskImage, ImageInfo, ImageReference, Repository, ANNOTATION_VERIFIED, LABEL_SHASUM,
    MEDIA_TYPE_CONFIG, MEDIA_TYPE_LAYER_GZIP,
};

const CHUNK: usize = 1024;

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Serves fixed bodies by URL.
#[derive(Default)]
pub struct StaticGetter {
    bodies: HashMap<String, Vec<u8>>,
    requests: Mutex<Vec<String>>,
}

impl StaticGetter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.bodies.insert(url.to_string(), body.into());
        self
    }

    /// Every requested URL, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    fn body(&self, url: &str) -> Result<Vec<u8>> {
        self.requests.lock().push(url.to_string());
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| DiskError::DownloadError {
                url: url.to_string(),
                message: "404 Not Found".to_string(),
            })
    }
}

#[async_trait]
impl Getter for StaticGetter {
    async fn get_all(&self, url: &str) -> Result<Vec<u8>> {
        self.body(url)
    }

    async fn get_stream(&self, url: &str) -> Result<ByteStream> {
        let body = self.body(url)?;
        let chunks: Vec<Result<Bytes>> = body
            .chunks(CHUNK)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}

/// Registry holding images in memory, keyed by full reference.
#[derive(Default)]
pub struct FakeRepository {
    images: Mutex<HashMap<String, DiskImage>>,
    failures: Mutex<HashMap<String, DiskError>>,
    pushed: Mutex<Vec<String>>,
}

impl FakeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a published image carrying `checksum` and the given verified flag.
    pub fn insert(&self, reference: &str, checksum: &str, verified: bool) {
        self.insert_with_annotation(reference, checksum, if verified { "true" } else { "false" });
    }

    pub fn insert_with_annotation(&self, reference: &str, checksum: &str, verified: &str) {
        let image = published_image(reference, checksum, verified);
        self.images.lock().insert(reference.to_string(), image);
    }

    /// Make metadata lookups of `reference` fail with `error`.
    pub fn fail_metadata(&self, reference: &str, error: DiskError) {
        self.failures.lock().insert(reference.to_string(), error);
    }

    pub fn image(&self, reference: &str) -> Option<DiskImage> {
        self.images.lock().get(reference).cloned()
    }

    pub fn metadata(&self, reference: &str) -> Option<ImageInfo> {
        let image = self.image(reference)?;
        ImageInfo::from_parts(reference, image.manifest(), image.config_bytes()).ok()
    }

    /// Every successful push, in order.
    pub fn pushed_references(&self) -> Vec<String> {
        self.pushed.lock().clone()
    }
}

#[async_trait]
impl Repository for FakeRepository {
    async fn image_metadata(&self, reference: &str, _insecure: bool) -> Result<ImageInfo> {
        if let Some(error) = self.failures.lock().get(reference) {
            return Err(copy_error(error));
        }
        let image = self
            .image(reference)
            .ok_or_else(|| DiskError::ManifestUnknown(reference.to_string()))?;
        let tag = ImageReference::parse(reference)?.tag;
        ImageInfo::from_parts(&tag, image.manifest(), image.config_bytes())
    }

    async fn pull_image(&self, reference: &str, _insecure: bool) -> Result<DiskImage> {
        self.image(reference)
            .ok_or_else(|| DiskError::ManifestUnknown(reference.to_string()))
    }

    async fn push_image(&self, image: &DiskImage, reference: &str, _insecure: bool) -> Result<()> {
        self.images.lock().insert(reference.to_string(), image.clone());
        self.pushed.lock().push(reference.to_string());
        Ok(())
    }
}

fn copy_error(error: &DiskError) -> DiskError {
    match error {
        DiskError::RepositoryUnknown(r) => DiskError::RepositoryUnknown(r.clone()),
        DiskError::ManifestUnknown(r) => DiskError::ManifestUnknown(r.clone()),
        DiskError::TagExpired(r) => DiskError::TagExpired(r.clone()),
        DiskError::RegistryError { registry, message } => DiskError::RegistryError {
            registry: registry.clone(),
            message: message.clone(),
        },
        other => DiskError::Other(other.to_string()),
    }
}

fn published_image(reference: &str, checksum: &str, verified: &str) -> DiskImage {
    let mut labels = serde_json::Map::new();
    labels.insert(LABEL_SHASUM.to_string(), checksum.into());
    let config = serde_json::json!({
        "architecture": "amd64",
        "os": "linux",
        "created": "2022-06-09T22:25:30Z",
        "config": {"Labels": labels},
        "rootfs": {
            "type": "layers",
            "diff_ids": [format!("sha256:{}", sha256_hex(checksum.as_bytes()))]
        }
    });
    let config = serde_json::to_vec(&config).unwrap();

    let manifest = OciImageManifest {
        config: OciDescriptor {
            media_type: MEDIA_TYPE_CONFIG.to_string(),
            digest: format!("sha256:{}", sha256_hex(&config)),
            size: config.len() as i64,
            ..Default::default()
        },
        layers: vec![OciDescriptor {
            media_type: MEDIA_TYPE_LAYER_GZIP.to_string(),
            digest: format!("sha256:{}", sha256_hex(reference.as_bytes())),
            size: 4096,
            ..Default::default()
        }],
        annotations: Some(
            [(ANNOTATION_VERIFIED.to_string(), verified.to_string())]
                .into_iter()
                .collect(),
        ),
        ..Default::default()
    };

    let source = ImageReference::parse(reference).unwrap();
    DiskImage::remote(manifest, config, &source)
}

/// Answers console input line by line.
pub type Responder = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Cluster whose VMs walk through a scripted phase sequence.
#[derive(Default)]
pub struct FakeCluster {
    /// Phases reported by successive `get` calls; the last one sticks.
    /// An empty script reports `Running`.
    phases: Mutex<VecDeque<VmPhase>>,
    get_error: Option<String>,
    guest_os_info: Option<serde_json::Value>,
    console: Option<(String, Responder)>,
    created: Mutex<Vec<VmSpec>>,
    deleted: Mutex<Vec<String>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_phases(self, phases: &[VmPhase]) -> Self {
        *self.phases.lock() = phases.iter().cloned().collect();
        self
    }

    pub fn with_get_error(mut self, message: &str) -> Self {
        self.get_error = Some(message.to_string());
        self
    }

    pub fn with_guest_os_info(mut self, info: serde_json::Value) -> Self {
        self.guest_os_info = Some(info);
        self
    }

    /// Console printing `banner` on connect and answering each line with `responder`.
    pub fn with_console(mut self, banner: &str, responder: Responder) -> Self {
        self.console = Some((banner.to_string(), responder));
        self
    }

    pub fn created(&self) -> Vec<VmSpec> {
        self.created.lock().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn create(&self, spec: &VmSpec) -> Result<VmInstance> {
        self.created.lock().push(spec.clone());
        Ok(VmInstance {
            name: spec.name().to_string(),
            namespace: "kubevirt".to_string(),
            phase: VmPhase::Pending,
        })
    }

    async fn get(&self, name: &str) -> Result<VmInstance> {
        if let Some(message) = &self.get_error {
            return Err(DiskError::ClusterError(message.clone()));
        }
        let phase = {
            let mut phases = self.phases.lock();
            if phases.len() > 1 {
                phases.pop_front().unwrap_or(VmPhase::Running)
            } else {
                phases.front().cloned().unwrap_or(VmPhase::Running)
            }
        };
        Ok(VmInstance {
            name: name.to_string(),
            namespace: "kubevirt".to_string(),
            phase,
        })
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.deleted.lock().push(name.to_string());
        Ok(())
    }

    async fn console(&self, name: &str) -> Result<Box<dyn ConsoleStream>> {
        let (banner, responder) = self
            .console
            .clone()
            .ok_or_else(|| DiskError::ConsoleError(format!("no console for {}", name)))?;

        let (console, guest) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let (reader, mut writer) = tokio::io::split(guest);
            if writer.write_all(banner.as_bytes()).await.is_err() {
                return;
            }
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let reply = responder(&line);
                if !reply.is_empty() && writer.write_all(reply.as_bytes()).await.is_err() {
                    break;
                }
            }
        });
        Ok(Box::new(console))
    }

    async fn guest_os_info(&self, name: &str) -> Result<serde_json::Value> {
        self.guest_os_info
            .clone()
            .ok_or_else(|| {
                DiskError::ClusterError(format!("guest agent of {} not connected", name))
            })
    }
}

/// Guest test that always fails.
pub struct FailingTest;

#[async_trait]
impl GuestTest for FailingTest {
    fn name(&self) -> &str {
        "failing"
    }

    async fn run(&self, _vm: &VmInstance, _cluster: &dyn Cluster) -> Result<()> {
        Err(DiskError::GuestTestError {
            test: "failing".to_string(),
            message: "guest said no".to_string(),
        })
    }
}

#[async_trait]
impl GuestTest for Arc<dyn GuestTest> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn run(&self, vm: &VmInstance, cluster: &dyn Cluster) -> Result<()> {
        (**self).run(vm, cluster).await
    }
}

/// Artifact with fixed details.
pub struct FakeArtifact {
    metadata: Metadata,
    details: Option<ArtifactDetails>,
    tests: Vec<Arc<dyn GuestTest>>,
}

impl FakeArtifact {
    /// An artifact whose inspection fails until details are set.
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            metadata: Metadata {
                name: name.to_string(),
                version: version.to_string(),
                description: String::new(),
                example_user_data: String::new(),
            },
            details: None,
            tests: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: ArtifactDetails) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_tests(mut self, tests: Vec<Arc<dyn GuestTest>>) -> Self {
        self.tests = tests;
        self
    }
}

#[async_trait]
impl Artifact for FakeArtifact {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    async fn inspect(&self) -> Result<ArtifactDetails> {
        self.details
            .clone()
            .ok_or_else(|| DiskError::Other("upstream unreachable".to_string()))
    }

    fn vm_spec(&self, image_ref: &str) -> VmSpec {
        VmSpec::new(&self.metadata.name)
            .with_container_disk(image_ref)
            .with_memory("1024M")
    }

    fn tests(&self) -> Vec<Box<dyn GuestTest>> {
        self.tests
            .iter()
            .map(|t| Box::new(t.clone()) as Box<dyn GuestTest>)
            .collect()
    }
}
