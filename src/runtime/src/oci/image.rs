//! Containerdisk image representation.
//!
//! A `DiskImage` is a manifest plus its config blob and the location of every
//! layer blob: either a file on local disk (freshly built) or a repository the
//! blob already lives in (pulled for re-tagging).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use containerdisks_core::error::{DiskError, Result};
use oci_distribution::manifest::{OciDescriptor, OciImageManifest};
use oci_spec::image::ImageConfiguration;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use super::reference::ImageReference;

/// Config label carrying the upstream checksum of the packaged disk.
pub const LABEL_SHASUM: &str = "shasum";

/// Manifest annotation set to `true` once the image booted successfully.
pub const ANNOTATION_VERIFIED: &str = "verified";

pub const MEDIA_TYPE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
pub const MEDIA_TYPE_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// Where the bytes of a layer blob can be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerSource {
    /// Blob file written by the builder
    Local(PathBuf),
    /// Blob already stored in this repository
    Remote(ImageReference),
}

/// An OCI image wrapping a single disk.
#[derive(Debug, Clone)]
pub struct DiskImage {
    manifest: OciImageManifest,
    config: Vec<u8>,
    layers: Vec<LayerSource>,
    /// Keeps local layer files alive as long as any clone of the image exists.
    _workdir: Option<Arc<TempDir>>,
}

impl DiskImage {
    /// Image whose layer blobs were written locally into `workdir`.
    pub(crate) fn local(
        manifest: OciImageManifest,
        config: Vec<u8>,
        layer_paths: Vec<PathBuf>,
        workdir: TempDir,
    ) -> Self {
        Self {
            manifest,
            config,
            layers: layer_paths.into_iter().map(LayerSource::Local).collect(),
            _workdir: Some(Arc::new(workdir)),
        }
    }

    /// Image pulled from `source`; its blobs stay in the registry.
    pub fn remote(manifest: OciImageManifest, config: Vec<u8>, source: &ImageReference) -> Self {
        let layers = manifest
            .layers
            .iter()
            .map(|_| LayerSource::Remote(source.clone()))
            .collect();
        Self {
            manifest,
            config,
            layers,
            _workdir: None,
        }
    }

    pub fn manifest(&self) -> &OciImageManifest {
        &self.manifest
    }

    pub fn config_bytes(&self) -> &[u8] {
        &self.config
    }

    /// Layer descriptors paired with where their blobs live.
    pub fn layers(&self) -> impl Iterator<Item = (&OciDescriptor, &LayerSource)> {
        self.manifest.layers.iter().zip(self.layers.iter())
    }

    /// Digests of all layers, bottom to top.
    pub fn layer_digests(&self) -> Vec<String> {
        self.manifest.layers.iter().map(|l| l.digest.clone()).collect()
    }

    /// Manifest digest as it will be computed by the registry.
    pub fn digest(&self) -> Result<String> {
        let bytes = serde_json::to_vec(&self.manifest)?;
        Ok(format!("sha256:{}", hex::encode(Sha256::digest(&bytes))))
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.manifest
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(|v| v.as_str())
    }

    /// Value of a config label.
    pub fn label(&self, key: &str) -> Result<Option<String>> {
        let info = ImageInfo::from_parts("", &self.manifest, &self.config)?;
        Ok(info.labels.get(key).cloned())
    }

    /// Copy of this image with `annotations` merged into the manifest.
    ///
    /// Config and layers are shared; only the manifest differs.
    pub fn with_annotations(&self, annotations: &HashMap<String, String>) -> Self {
        let mut image = self.clone();
        let target = image.manifest.annotations.get_or_insert_with(Default::default);
        for (key, value) in annotations {
            target.insert(key.clone(), value.clone());
        }
        image
    }
}

/// What the registry knows about one tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageInfo {
    pub tag: String,
    pub created: Option<DateTime<Utc>>,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub architecture: String,
    pub os: String,
    /// Layer digests, bottom to top
    pub layers: Vec<String>,
    pub env: Vec<String>,
}

impl ImageInfo {
    /// Combine a manifest and its raw config blob.
    pub fn from_parts(tag: &str, manifest: &OciImageManifest, config: &[u8]) -> Result<Self> {
        let config = parse_config(config)?;

        let inner = config.config().as_ref();
        let labels = inner
            .and_then(|c| c.labels().clone())
            .map(|l| l.into_iter().collect())
            .unwrap_or_default();
        let env = inner.and_then(|c| c.env().clone()).unwrap_or_default();

        let created = config
            .created()
            .as_deref()
            .and_then(|c| DateTime::parse_from_rfc3339(c).ok())
            .map(|c| c.with_timezone(&Utc));

        let annotations = manifest
            .annotations
            .as_ref()
            .map(|a| a.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        Ok(Self {
            tag: tag.to_string(),
            created,
            labels,
            annotations,
            architecture: config.architecture().to_string(),
            os: config.os().to_string(),
            layers: manifest.layers.iter().map(|l| l.digest.clone()).collect(),
            env,
        })
    }

    /// The `shasum` label, if present.
    pub fn checksum(&self) -> Option<&str> {
        self.labels.get(LABEL_SHASUM).map(|s| s.as_str())
    }

    /// Whether the image carries `verified=true`.
    ///
    /// A missing or unparsable annotation counts as unverified.
    pub fn is_verified(&self) -> bool {
        self.annotations
            .get(ANNOTATION_VERIFIED)
            .and_then(|v| v.trim().parse::<bool>().ok())
            .unwrap_or(false)
    }
}

/// Parse a config blob, filling in the fields OCI marks optional but
/// `ImageConfiguration` insists on.
fn parse_config(config: &[u8]) -> Result<ImageConfiguration> {
    let invalid = |e: serde_json::Error| {
        DiskError::OciImageError(format!("Failed to parse image config: {}", e))
    };

    let mut value: serde_json::Value = serde_json::from_slice(config).map_err(invalid)?;
    if let Some(object) = value.as_object_mut() {
        let defaults = [
            ("history", serde_json::json!([])),
            ("rootfs", serde_json::json!({"type": "layers", "diff_ids": []})),
        ];
        for (key, default) in defaults {
            if object.get(key).map_or(true, |v| v.is_null()) {
                object.insert(key.to_string(), default);
            }
        }
    }
    serde_json::from_value(value).map_err(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "architecture": "amd64",
        "os": "linux",
        "created": "2022-06-09T22:25:30Z",
        "config": {"Labels": {"shasum": "abc123"}, "Env": ["A=b"]},
        "rootfs": {"type": "layers", "diff_ids": ["sha256:00"]}
    }"#;

    fn manifest(annotations: &[(&str, &str)]) -> OciImageManifest {
        OciImageManifest {
            layers: vec![OciDescriptor {
                media_type: MEDIA_TYPE_LAYER_GZIP.to_string(),
                digest: "sha256:aa".to_string(),
                size: 10,
                ..Default::default()
            }],
            annotations: if annotations.is_empty() {
                None
            } else {
                Some(
                    annotations
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                )
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_image_info_from_parts() {
        let info =
            ImageInfo::from_parts("36", &manifest(&[("verified", "false")]), CONFIG.as_bytes())
                .unwrap();
        assert_eq!(info.tag, "36");
        assert_eq!(info.checksum(), Some("abc123"));
        assert_eq!(info.architecture, "amd64");
        assert_eq!(info.os, "linux");
        assert_eq!(info.layers, vec!["sha256:aa".to_string()]);
        assert_eq!(info.env, vec!["A=b".to_string()]);
        assert!(info.created.is_some());
        assert!(!info.is_verified());
    }

    #[test]
    fn test_is_verified_parsing() {
        let verified =
            ImageInfo::from_parts("t", &manifest(&[("verified", "true")]), CONFIG.as_bytes())
                .unwrap();
        assert!(verified.is_verified());

        let garbage =
            ImageInfo::from_parts("t", &manifest(&[("verified", "yes!")]), CONFIG.as_bytes())
                .unwrap();
        assert!(!garbage.is_verified());

        let missing = ImageInfo::from_parts("t", &manifest(&[]), CONFIG.as_bytes()).unwrap();
        assert!(!missing.is_verified());
    }

    #[test]
    fn test_config_without_history() {
        let config = r#"{
            "architecture": "amd64",
            "os": "linux",
            "config": {"Labels": {"shasum": "abc123"}},
            "rootfs": {"type": "layers", "diff_ids": ["sha256:00"]}
        }"#;
        let info = ImageInfo::from_parts("36", &manifest(&[]), config.as_bytes()).unwrap();
        assert_eq!(info.checksum(), Some("abc123"));

        let bare = r#"{"architecture": "amd64", "os": "linux", "history": null}"#;
        let info = ImageInfo::from_parts("36", &manifest(&[]), bare.as_bytes()).unwrap();
        assert!(info.labels.is_empty());
    }

    #[test]
    fn test_invalid_config() {
        let result = ImageInfo::from_parts("t", &manifest(&[]), b"not json");
        assert!(matches!(result, Err(DiskError::OciImageError(_))));
    }

    #[test]
    fn test_with_annotations_leaves_original() {
        let source = ImageReference::parse("quay.io/containerdisks/fedora:36").unwrap();
        let image = DiskImage::remote(
            manifest(&[("verified", "false")]),
            CONFIG.as_bytes().to_vec(),
            &source,
        );

        let mut update = HashMap::new();
        update.insert(ANNOTATION_VERIFIED.to_string(), "true".to_string());
        let mutated = image.with_annotations(&update);

        assert_eq!(image.annotation(ANNOTATION_VERIFIED), Some("false"));
        assert_eq!(mutated.annotation(ANNOTATION_VERIFIED), Some("true"));
        assert_eq!(image.layer_digests(), mutated.layer_digests());
        assert_eq!(image.config_bytes(), mutated.config_bytes());
        assert_ne!(image.digest().unwrap(), mutated.digest().unwrap());
        assert_eq!(mutated.label(LABEL_SHASUM).unwrap().as_deref(), Some("abc123"));
    }

    #[test]
    fn test_remote_layers_point_at_source() {
        let source = ImageReference::parse("quay.io/containerdisks/fedora:36").unwrap();
        let image = DiskImage::remote(manifest(&[]), CONFIG.as_bytes().to_vec(), &source);
        let (descriptor, location) = image.layers().next().unwrap();
        assert_eq!(descriptor.digest, "sha256:aa");
        assert_eq!(location, &LayerSource::Remote(source));
    }
}
