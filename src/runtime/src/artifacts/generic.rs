//! Artifacts with fixed, pre-known release details.
//!
//! Extra images are declared in a YAML catalog file:
//!
//! ```yaml
//! artifacts:
//!   - name: cirros
//!     version: "0.5.2"
//!     sha256_sum: 932fcae93574e242dc3d772d5235061747dfe537668443a1f0567d893614b464
//!     download_url: https://download.cirros-cloud.net/0.5.2/cirros-0.5.2-x86_64-disk.img
//!     additional_unique_tags: ["0.5.2-1"]
//! ```

use std::path::Path;

use async_trait::async_trait;
use containerdisks_core::error::{DiskError, Result};
use serde::{Deserialize, Serialize};

use super::base_vm;
use crate::artifact::{Artifact, ArtifactDetails, Metadata};
use crate::cluster::VmSpec;
use crate::guest::GuestTest;

/// One entry of a catalog file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericArtifactSpec {
    #[serde(flatten)]
    pub metadata: Metadata,
    #[serde(flatten)]
    pub details: ArtifactDetails,
    /// Only run when focused
    #[serde(default)]
    pub focused_only: bool,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    artifacts: Vec<GenericArtifactSpec>,
}

/// Read the artifacts declared in a catalog file.
pub fn load_generic_artifacts(path: &Path) -> Result<Vec<GenericArtifactSpec>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        DiskError::ConfigError(format!("Failed to read catalog file {}: {}", path.display(), e))
    })?;
    let file: CatalogFile = serde_yaml::from_str(&content).map_err(|e| {
        DiskError::ConfigError(format!("Invalid catalog file {}: {}", path.display(), e))
    })?;

    for spec in &file.artifacts {
        if spec.metadata.name.is_empty() || spec.metadata.version.is_empty() {
            return Err(DiskError::ConfigError(format!(
                "Catalog file {}: every artifact needs a name and a version",
                path.display()
            )));
        }
    }
    tracing::debug!(path = %path.display(), count = file.artifacts.len(), "Loaded catalog file");
    Ok(file.artifacts)
}

pub struct Generic {
    metadata: Metadata,
    details: ArtifactDetails,
}

impl Generic {
    pub fn new(metadata: Metadata, details: ArtifactDetails) -> Self {
        Self { metadata, details }
    }
}

impl From<GenericArtifactSpec> for Generic {
    fn from(spec: GenericArtifactSpec) -> Self {
        Self::new(spec.metadata, spec.details)
    }
}

#[async_trait]
impl Artifact for Generic {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    async fn inspect(&self) -> Result<ArtifactDetails> {
        Ok(self.details.clone())
    }

    fn vm_spec(&self, image_ref: &str) -> VmSpec {
        base_vm(&self.metadata.name, image_ref)
    }

    fn tests(&self) -> Vec<Box<dyn GuestTest>> {
        Vec::new()
    }
}
