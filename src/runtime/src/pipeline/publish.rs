//! Publish pipeline: rebuild and push a containerdisk when upstream changed.

use std::sync::Arc;

use containerdisks_core::error::{DiskError, Result};
use containerdisks_core::{join_path, prepare_tags, Options, PublishOptions};

use crate::artifact::Artifact;
use crate::download::fetch_disk;
use crate::http::Getter;
use crate::oci::{build_container_disk, Repository};

/// What a publish run did for one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The registry already holds an image of the upstream checksum
    UpToDate,
    /// A new image was pushed under these references
    Published { tags: Vec<String> },
    /// A new image was built but not pushed
    DryRun { tags: Vec<String> },
}

/// Keeps registry images in sync with upstream releases.
#[derive(Clone)]
pub struct Publisher {
    repository: Arc<dyn Repository>,
    getter: Arc<dyn Getter>,
    options: Options,
    publish_options: PublishOptions,
}

impl Publisher {
    pub fn new(
        repository: Arc<dyn Repository>,
        getter: Arc<dyn Getter>,
        options: Options,
        publish_options: PublishOptions,
    ) -> Self {
        Self {
            repository,
            getter,
            options,
            publish_options,
        }
    }

    /// Bring the registry image of `artifact` up to date.
    pub async fn publish(&self, artifact: &dyn Artifact) -> Result<PublishOutcome> {
        let metadata = artifact.metadata();
        let describe = metadata.describe();
        let insecure = self.options.allow_insecure_registry;

        let details = artifact
            .inspect()
            .await
            .map_err(|e| DiskError::InspectError {
                artifact: describe.clone(),
                message: e.to_string(),
            })?;
        tracing::info!(checksum = %details.sha256_sum, "Remote artifact checksum");

        let image_name = join_path(&self.options.registry, &describe);
        let current = match self.repository.image_metadata(&image_name, insecure).await {
            Ok(info) => {
                let checksum = info.checksum().unwrap_or_default().to_string();
                tracing::info!(checksum = %checksum, "Latest containerdisk checksum");
                Some(checksum)
            }
            Err(e @ DiskError::RepositoryUnknown(_)) => {
                tracing::info!(reason = %e, "Repository does not yet exist, it will be created");
                None
            }
            Err(e @ DiskError::ManifestUnknown(_)) => {
                tracing::info!(reason = %e, "Tag does not yet exist, it will be created");
                None
            }
            Err(e @ DiskError::TagExpired(_)) => {
                tracing::info!(
                    reason = %e,
                    "Tag is gone but seems to have existed already, it will be created"
                );
                None
            }
            Err(e) => return Err(e),
        };

        let up_to_date = current.as_deref() == Some(details.sha256_sum.as_str());
        if up_to_date && !self.publish_options.force_build {
            tracing::info!("Nothing to do.");
            return Ok(PublishOutcome::UpToDate);
        }

        tracing::info!(url = %details.download_url, "Rebuild needed, downloading");
        // Removed on drop, whichever way this function returns.
        let disk = tempfile::Builder::new()
            .prefix("containerdisks")
            .tempfile()?;

        let download = fetch_disk(
            self.getter.as_ref(),
            &details.download_url,
            details.compression,
            disk.path(),
        )
        .await?;

        if download.checksum != details.sha256_sum {
            return Err(DiskError::ChecksumMismatch {
                expected: details.sha256_sum.clone(),
                actual: download.checksum,
            });
        }

        tracing::info!("Building containerdisk");
        let image = build_container_disk(disk.path(), &download.checksum).await?;

        let tags = prepare_tags(
            &self.options.registry,
            &metadata.name,
            &describe,
            &details.additional_unique_tags,
        );
        for tag in &tags {
            if self.options.dry_run {
                tracing::info!(reference = %tag, "Dry run enabled, not pushing");
                continue;
            }
            tracing::info!(reference = %tag, "Pushing");
            self.repository.push_image(&image, tag, insecure).await?;
        }

        if self.options.dry_run {
            Ok(PublishOutcome::DryRun { tags })
        } else {
            Ok(PublishOutcome::Published { tags })
        }
    }
}
