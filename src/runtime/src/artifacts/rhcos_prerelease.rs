//! Pre-release RHCOS builds.

use std::sync::Arc;

use async_trait::async_trait;
use containerdisks_core::error::Result;

use super::rhcos::{fetch_checksums, missing_variant, VARIANT};
use super::{base_vm, EXAMPLE_IGNITION};
use crate::artifact::{Artifact, ArtifactDetails, Compression, Metadata};
use crate::cluster::VmSpec;
use crate::guest::GuestTest;
use crate::http::Getter;

const DESCRIPTION: &str = "RHCOS prerelease images for KubeVirt.
<br />
<br />
Visit [https://docs.openshift.com/container-platform/latest/architecture/architecture-rhcos.html) to learn more about Red Hat Enterprise Linux CoreOS.";

pub struct RhcosPrerelease {
    /// Mirror directory, e.g. `latest-4.11`
    release: String,
    metadata: Metadata,
    getter: Arc<dyn Getter>,
}

impl RhcosPrerelease {
    /// `release` names the mirror directory; `latest-4.11` is published as
    /// `rhcos:4.11-pre-release`.
    pub fn new(release: impl Into<String>, getter: Arc<dyn Getter>) -> Self {
        let release = release.into();
        let version = format!(
            "{}-pre-release",
            release.strip_prefix("latest-").unwrap_or(&release)
        );
        Self {
            release,
            metadata: Metadata {
                name: "rhcos".to_string(),
                version,
                description: DESCRIPTION.to_string(),
                example_user_data: EXAMPLE_IGNITION.to_string(),
            },
            getter,
        }
    }

    fn base_url(&self) -> String {
        format!(
            "https://mirror.openshift.com/pub/openshift-v4/x86_64/dependencies/rhcos/pre-release/{}/",
            self.release
        )
    }
}

/// Release candidate name of a versioned variant, e.g. `4.11.0-rc.2`.
fn rc_tag(variant: &str) -> Option<&str> {
    let tag = variant.strip_prefix("rhcos-").unwrap_or(variant);
    let tag = tag
        .strip_suffix("-x86_64-openstack.x86_64.qcow2.gz")
        .unwrap_or(tag);
    tag.contains("rc.").then_some(tag)
}

#[async_trait]
impl Artifact for RhcosPrerelease {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    async fn inspect(&self) -> Result<ArtifactDetails> {
        let base_url = self.base_url();
        let checksums = fetch_checksums(self.getter.as_ref(), &base_url).await?;
        let checksum = checksums.get(VARIANT).ok_or_else(missing_variant)?.clone();

        // Versioned copies of the same disk name the release candidate.
        let mut tags: Vec<String> = checksums
            .iter()
            .filter(|(variant, sum)| variant.as_str() != VARIANT && **sum == checksum)
            .filter_map(|(variant, _)| rc_tag(variant).map(str::to_string))
            .collect();
        tags.sort();
        tags.push(checksum.clone());

        Ok(ArtifactDetails {
            sha256_sum: checksum,
            download_url: format!("{}{}", base_url, VARIANT),
            compression: Some(Compression::Gzip),
            additional_unique_tags: tags,
        })
    }

    fn vm_spec(&self, image_ref: &str) -> VmSpec {
        base_vm(&self.metadata.name, image_ref)
    }

    fn tests(&self) -> Vec<Box<dyn GuestTest>> {
        Vec::new()
    }
}
