//! Registry access for containerdisks.
//!
//! Uses the `oci-distribution` crate to read image metadata, pull manifests
//! for re-tagging, and push built or re-annotated images.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use containerdisks_core::error::{DiskError, Result};
use oci_distribution::client::{ClientConfig, ClientProtocol, Config, ImageLayer};
use oci_distribution::errors::{OciDistributionError, OciErrorCode};
use oci_distribution::manifest::OciManifest;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};
use parking_lot::Mutex;

use super::credentials::RegistryAuth;
use super::error_body::{classify_body, fetch_error_body, TAG_EXPIRED_MARKER};
use super::image::{DiskImage, ImageInfo, LayerSource};
use super::reference::ImageReference;

/// Read and write access to the image registry.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Fetch manifest and config of `reference`.
    ///
    /// Fails with `RepositoryUnknown`, `ManifestUnknown` or `TagExpired` when
    /// there is no image, `RegistryError` for any other failure.
    async fn image_metadata(&self, reference: &str, insecure: bool) -> Result<ImageInfo>;

    /// Pull manifest and config of `reference`; layers stay in the registry.
    async fn pull_image(&self, reference: &str, insecure: bool) -> Result<DiskImage>;

    /// Push `image` under `reference`.
    ///
    /// Locally built layers are read fully into memory before upload, so
    /// each concurrent push holds its compressed disk layer in RAM.
    async fn push_image(&self, image: &DiskImage, reference: &str, insecure: bool) -> Result<()>;

    /// Copy of `image` with `annotations` merged into its manifest.
    fn mutate_annotations(
        &self,
        image: &DiskImage,
        annotations: &HashMap<String, String>,
    ) -> DiskImage {
        image.with_annotations(annotations)
    }
}

/// `Repository` backed by a real OCI registry.
pub struct RegistryClient {
    client: Client,
    insecure_client: Client,
    /// Plain HTTP clients for reading error bodies `oci-distribution` rejects.
    http: reqwest::Client,
    insecure_http: reqwest::Client,
    /// `repository@digest` pairs already present in the registry.
    uploaded: Mutex<HashSet<String>>,
}

impl RegistryClient {
    pub fn new() -> Self {
        let client = Client::new(ClientConfig {
            protocol: ClientProtocol::Https,
            ..Default::default()
        });
        let insecure_client = Client::new(ClientConfig {
            protocol: ClientProtocol::Http,
            accept_invalid_certificates: true,
            ..Default::default()
        });

        let http = reqwest::Client::new();
        let insecure_http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .unwrap_or_else(|_| http.clone());

        Self {
            client,
            insecure_client,
            http,
            insecure_http,
            uploaded: Mutex::new(HashSet::new()),
        }
    }

    fn client(&self, insecure: bool) -> &Client {
        if insecure {
            &self.insecure_client
        } else {
            &self.client
        }
    }

    async fn fetch(
        &self,
        reference: &ImageReference,
        insecure: bool,
    ) -> Result<(DiskImage, String)> {
        let oci_ref = to_oci_reference(reference)?;
        let auth = RegistryAuth::resolve(&reference.registry);

        let pulled = self
            .client(insecure)
            .pull_manifest_and_config(&oci_ref, &auth.to_oci_auth())
            .await;
        let (manifest, digest, config) = match pulled {
            Ok(parts) => parts,
            Err(e) => {
                return Err(self
                    .classify_failure(reference, &oci_ref, &auth, insecure, e)
                    .await)
            }
        };

        tracing::debug!(reference = %reference, digest = %digest, "Fetched manifest");
        Ok((
            DiskImage::remote(manifest, config.into_bytes(), reference),
            digest,
        ))
    }

    /// Classify a failed manifest fetch, reading the raw error body when
    /// the client could not decode it.
    async fn classify_failure(
        &self,
        reference: &ImageReference,
        oci_ref: &Reference,
        auth: &RegistryAuth,
        insecure: bool,
        err: OciDistributionError,
    ) -> DiskError {
        let body = match &err {
            OciDistributionError::ServerError { message, .. } => Some(message.clone()),
            OciDistributionError::JsonError(_) => {
                let http = if insecure { &self.insecure_http } else { &self.http };
                fetch_error_body(http, oci_ref, auth, insecure).await
            }
            _ => None,
        };

        match body.as_deref().and_then(|b| classify_body(reference, b)) {
            Some(absent) => absent,
            None => classify_error(reference, err),
        }
    }

    fn is_uploaded(&self, target: &ImageReference, digest: &str) -> bool {
        self.uploaded.lock().contains(&blob_key(target, digest))
    }

    fn mark_uploaded(&self, target: &ImageReference, digest: &str) {
        self.uploaded.lock().insert(blob_key(target, digest));
    }

    /// Upload a locally built image: config, layers and manifest in one go.
    async fn push_local(
        &self,
        image: &DiskImage,
        target: &ImageReference,
        oci_ref: &Reference,
        auth: &OciRegistryAuth,
        insecure: bool,
    ) -> Result<()> {
        let mut layers = Vec::new();
        for (descriptor, source) in image.layers() {
            let LayerSource::Local(path) = source else {
                return Err(DiskError::OciImageError(format!(
                    "Layer {} is not available locally",
                    descriptor.digest
                )));
            };
            let data = tokio::fs::read(path).await.map_err(|e| {
                DiskError::OciImageError(format!(
                    "Failed to read layer blob {}: {}",
                    descriptor.digest, e
                ))
            })?;

            tracing::debug!(
                digest = %descriptor.digest,
                size = data.len(),
                "Read layer for push"
            );
            layers.push(ImageLayer::new(data, descriptor.media_type.clone(), None));
        }

        let manifest = image.manifest();
        let config = Config::new(
            image.config_bytes().to_vec(),
            manifest.config.media_type.clone(),
            None,
        );

        self.client(insecure)
            .push(oci_ref, &layers, config, auth, Some(manifest.clone()))
            .await
            .map_err(|e| push_error(target, e))?;

        self.mark_uploaded(target, &manifest.config.digest);
        for (descriptor, _) in image.layers() {
            self.mark_uploaded(target, &descriptor.digest);
        }
        Ok(())
    }

    /// Push only the manifest, mounting blobs that live in other repositories.
    async fn push_manifest(
        &self,
        image: &DiskImage,
        target: &ImageReference,
        oci_ref: &Reference,
        auth: &OciRegistryAuth,
        insecure: bool,
    ) -> Result<()> {
        let client = self.client(insecure);
        client
            .auth(oci_ref, auth, RegistryOperation::Push)
            .await
            .map_err(|e| push_error(target, e))?;

        // The config blob lives wherever the first layer lives.
        let config_source = image.layers().next().map(|(_, source)| source.clone());
        let mut blobs = vec![(image.manifest().config.digest.clone(), config_source)];
        blobs.extend(
            image
                .layers()
                .map(|(d, source)| (d.digest.clone(), Some(source.clone()))),
        );

        for (digest, source) in blobs {
            if self.is_uploaded(target, &digest) {
                continue;
            }
            match source {
                Some(LayerSource::Remote(from)) if from.same_repository(target) => {}
                Some(LayerSource::Remote(from)) => {
                    let from_ref = to_oci_reference(&from)?;
                    tracing::debug!(digest = %digest, from = %from, to = %target, "Mounting blob");
                    client
                        .mount_blob(oci_ref, &from_ref, &digest)
                        .await
                        .map_err(|e| push_error(target, e))?;
                }
                Some(LayerSource::Local(_)) | None => {
                    return Err(DiskError::OciImageError(format!(
                        "Blob {} is missing from {}",
                        digest,
                        target.repository_path()
                    )));
                }
            }
            self.mark_uploaded(target, &digest);
        }

        client
            .push_manifest(oci_ref, &OciManifest::Image(image.manifest().clone()))
            .await
            .map_err(|e| push_error(target, e))?;
        Ok(())
    }
}

impl Default for RegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for RegistryClient {
    async fn image_metadata(&self, reference: &str, insecure: bool) -> Result<ImageInfo> {
        let reference = ImageReference::parse(reference)?;
        let (image, _) = self.fetch(&reference, insecure).await?;
        ImageInfo::from_parts(&reference.tag, image.manifest(), image.config_bytes())
    }

    async fn pull_image(&self, reference: &str, insecure: bool) -> Result<DiskImage> {
        let reference = ImageReference::parse(reference)?;
        tracing::info!(reference = %reference, "Pulling image manifest");
        let (image, _) = self.fetch(&reference, insecure).await?;
        Ok(image)
    }

    async fn push_image(&self, image: &DiskImage, reference: &str, insecure: bool) -> Result<()> {
        let target = ImageReference::parse(reference)?;
        let oci_ref = to_oci_reference(&target)?;
        let auth = RegistryAuth::resolve(&target.registry).to_oci_auth();

        tracing::info!(reference = %target, "Pushing image to registry");

        let has_local_layers = image.layers().any(|(d, source)| {
            matches!(source, LayerSource::Local(_)) && !self.is_uploaded(&target, &d.digest)
        });

        if has_local_layers {
            self.push_local(image, &target, &oci_ref, &auth, insecure).await?;
        } else {
            self.push_manifest(image, &target, &oci_ref, &auth, insecure).await?;
        }

        tracing::info!(reference = %target, "Image pushed successfully");
        Ok(())
    }
}

fn blob_key(target: &ImageReference, digest: &str) -> String {
    format!("{}@{}", target.repository_path(), digest)
}

/// Convert an ImageReference to an oci-distribution Reference.
fn to_oci_reference(reference: &ImageReference) -> Result<Reference> {
    let ref_str = reference.full_reference();
    ref_str.parse::<Reference>().map_err(|e| {
        DiskError::OciImageError(format!("Invalid OCI reference '{}': {}", ref_str, e))
    })
}

fn push_error(target: &ImageReference, err: OciDistributionError) -> DiskError {
    DiskError::RegistryError {
        registry: target.registry.clone(),
        message: format!("Failed to push {}: {}", target, err),
    }
}

/// Map a registry failure onto the error taxonomy.
///
/// Structured error codes are preferred; the expired-tag message is only
/// recognisable by its text.
fn classify_error(reference: &ImageReference, err: OciDistributionError) -> DiskError {
    let name = reference.full_reference();
    match &err {
        OciDistributionError::RegistryError { envelope, .. } => {
            for error in &envelope.errors {
                match error.code {
                    OciErrorCode::NameUnknown => return DiskError::RepositoryUnknown(name),
                    OciErrorCode::ManifestUnknown => {
                        if error.message.contains(TAG_EXPIRED_MARKER) {
                            return DiskError::TagExpired(name);
                        }
                        return DiskError::ManifestUnknown(name);
                    }
                    _ => {}
                }
            }
        }
        OciDistributionError::ImageManifestNotFoundError(_) => {
            return DiskError::ManifestUnknown(name)
        }
        _ => {}
    }

    let message = err.to_string();
    if message.contains(TAG_EXPIRED_MARKER) {
        return DiskError::TagExpired(name);
    }
    DiskError::RegistryError {
        registry: reference.registry.clone(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oci_distribution::errors::{OciEnvelope, OciError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn reference() -> ImageReference {
        ImageReference::parse("quay.io/containerdisks/fedora:36").unwrap()
    }

    fn registry_error(code: OciErrorCode, message: &str) -> OciDistributionError {
        OciDistributionError::RegistryError {
            envelope: OciEnvelope {
                errors: vec![OciError {
                    code,
                    message: message.to_string(),
                    detail: serde_json::Value::Null,
                }],
            },
            url: "https://quay.io/v2/containerdisks/fedora/manifests/36".to_string(),
        }
    }

    #[test]
    fn test_classify_name_unknown() {
        let err = classify_error(
            &reference(),
            registry_error(OciErrorCode::NameUnknown, "repository name not known"),
        );
        assert!(matches!(err, DiskError::RepositoryUnknown(_)));
        assert!(err.is_image_absent());
    }

    #[test]
    fn test_classify_manifest_unknown() {
        let err = classify_error(
            &reference(),
            registry_error(OciErrorCode::ManifestUnknown, "manifest unknown"),
        );
        assert!(matches!(err, DiskError::ManifestUnknown(_)));
        assert!(err.is_image_absent());
    }

    #[test]
    fn test_classify_tag_expired() {
        let message = format!("Tag 36 {}", TAG_EXPIRED_MARKER);
        let err = classify_error(
            &reference(),
            registry_error(OciErrorCode::ManifestUnknown, &message),
        );
        assert!(matches!(err, DiskError::TagExpired(_)));
        assert!(err.is_image_absent());
    }

    #[test]
    fn test_classify_other_registry_error() {
        let err = classify_error(
            &reference(),
            registry_error(OciErrorCode::Denied, "requested access to the resource is denied"),
        );
        assert!(matches!(err, DiskError::RegistryError { .. }));
        assert!(!err.is_image_absent());
    }

    const QUAY_EXPIRED: &str = concat!(
        r#"{"errors":[{"code":"UNKNOWN","detail":{},"#,
        r#""message":"Tag 36 was deleted or has expired. To pull, revive via time machine"}]}"#
    );

    /// Serve every request with quay's expired-tag answer.
    async fn expired_tag_registry() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let manifest_requests = Arc::new(AtomicUsize::new(0));
        let counter = manifest_requests.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let counter = counter.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    if String::from_utf8_lossy(&request).contains("/manifests/") {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                    let response = format!(
                        "HTTP/1.1 404 Not Found\r\nContent-Type: application/json\r\n\
                         Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                        QUAY_EXPIRED.len(),
                        QUAY_EXPIRED
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        (address.to_string(), manifest_requests)
    }

    #[test]
    fn test_unknown_code_is_undecodable_by_client() {
        let err = serde_json::from_str::<OciEnvelope>(QUAY_EXPIRED).unwrap_err();
        let classified = classify_error(&reference(), OciDistributionError::JsonError(err));
        assert!(matches!(classified, DiskError::RegistryError { .. }));
    }

    #[tokio::test]
    async fn test_server_error_body_classified() {
        let client = RegistryClient::new();
        let reference = reference();
        let oci_ref = to_oci_reference(&reference).unwrap();
        let err = OciDistributionError::ServerError {
            code: 500,
            url: "https://quay.io/v2/containerdisks/fedora/manifests/36".to_string(),
            message: QUAY_EXPIRED.to_string(),
        };

        let classified = client
            .classify_failure(&reference, &oci_ref, &RegistryAuth::anonymous(), false, err)
            .await;
        assert!(matches!(classified, DiskError::TagExpired(_)));
    }

    #[tokio::test]
    async fn test_expired_tag_with_unknown_code_is_absent() {
        let (registry, manifest_requests) = expired_tag_registry().await;
        let client = RegistryClient::new();

        let err = client
            .image_metadata(&format!("{}/containerdisks/fedora:36", registry), true)
            .await
            .unwrap_err();

        assert!(matches!(err, DiskError::TagExpired(_)), "{:?}", err);
        assert!(err.is_image_absent());
        assert!(manifest_requests.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_to_oci_reference() {
        let oci_ref = to_oci_reference(&reference()).unwrap();
        assert_eq!(oci_ref.registry(), "quay.io");
        assert_eq!(oci_ref.repository(), "containerdisks/fedora");
        assert_eq!(oci_ref.tag(), Some("36"));
    }

    #[test]
    fn test_uploaded_tracking_is_per_repository() {
        let client = RegistryClient::new();
        let fedora = reference();
        let rhcos = ImageReference::parse("quay.io/containerdisks/rhcos:4.10").unwrap();

        client.mark_uploaded(&fedora, "sha256:aa");
        assert!(client.is_uploaded(&fedora.with_tag("36-1.5"), "sha256:aa"));
        assert!(!client.is_uploaded(&rhcos, "sha256:aa"));
    }
}
