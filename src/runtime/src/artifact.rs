//! Artifact contract - one implementation per supported distribution.
//!
//! An artifact knows how to describe itself, how to find its current upstream
//! release, how to boot an image of itself in the cluster and which guest
//! tests prove the booted VM is usable.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use containerdisks_core::error::{DiskError, Result};
use serde::{Deserialize, Serialize};

use crate::cluster::VmSpec;
use crate::guest::GuestTest;

/// Static description of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Image name, used as the repository path (e.g., "fedora")
    pub name: String,
    /// Release version, used as the canonical tag (e.g., "36")
    pub version: String,
    /// Human readable description (markdown)
    #[serde(default)]
    pub description: String,
    /// Example guest configuration payload (cloud-init or Ignition)
    #[serde(default)]
    pub example_user_data: String,
}

impl Metadata {
    /// `name:version`, the registry path and worker focus key.
    pub fn describe(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }
}

/// Compression codec of the upstream disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Gzip,
    Xz,
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gzip => write!(f, "gzip"),
            Self::Xz => write!(f, "xz"),
        }
    }
}

impl FromStr for Compression {
    type Err = DiskError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gzip" => Ok(Self::Gzip),
            "xz" => Ok(Self::Xz),
            other => Err(DiskError::ConfigError(format!(
                "unknown compression '{}' (supported: gzip, xz)",
                other
            ))),
        }
    }
}

/// Result of inspecting the upstream release of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDetails {
    /// SHA-256 checksum of the downloadable file
    pub sha256_sum: String,
    /// Download location of the disk
    pub download_url: String,
    /// Compression of the downloadable file, if any
    #[serde(default)]
    pub compression: Option<Compression>,
    /// Tags beyond the canonical `name:version`
    #[serde(default)]
    pub additional_unique_tags: Vec<String>,
}

/// A supported operating-system image.
#[async_trait]
pub trait Artifact: Send + Sync {
    /// Static metadata of the artifact.
    fn metadata(&self) -> &Metadata;

    /// Look up the current upstream release.
    async fn inspect(&self) -> Result<ArtifactDetails>;

    /// VM specification booting the given image reference.
    fn vm_spec(&self, image_ref: &str) -> VmSpec;

    /// Tests run in order against the booted VM.
    fn tests(&self) -> Vec<Box<dyn GuestTest>>;
}
