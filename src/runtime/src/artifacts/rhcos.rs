//! Red Hat Enterprise Linux CoreOS images from the OpenShift mirror.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use containerdisks_core::error::{DiskError, Result};

use super::{base_vm, EXAMPLE_IGNITION};
use crate::artifact::{Artifact, ArtifactDetails, Compression, Metadata};
use crate::cluster::VmSpec;
use crate::guest::{ConsoleLogin, GuestTest};
use crate::hashsum::{self, ChecksumFormat};
use crate::http::Getter;

/// OpenStack flavour of the disk, the one that boots on KubeVirt.
pub(super) const VARIANT: &str = "rhcos-openstack.x86_64.qcow2.gz";

const DESCRIPTION: &str = "RHCOS images for KubeVirt.
<br />
<br />
Visit [https://docs.openshift.com/container-platform/latest/architecture/architecture-rhcos.html) to learn more about Red Hat Enterprise Linux CoreOS.";

/// Ignition config setting the password of `core` to `core`.
const IGNITION: &str = r#"{"ignition":{"version":"3.3.0"},"passwd":{"users":[{"name":"core","passwordHash":"$6$51NnxXi3NPrGjYor$IkMdwpTH8e1I3TsD2ZBvJHKlmIWhO9cqazTO2lApjdwqNorVuD8SbHFRdOLVslkO1FoghWYirCMWSUsqz3R0b0"}]}}"#;

pub struct Rhcos {
    metadata: Metadata,
    getter: Arc<dyn Getter>,
}

impl Rhcos {
    pub fn new(version: impl Into<String>, getter: Arc<dyn Getter>) -> Self {
        Self {
            metadata: Metadata {
                name: "rhcos".to_string(),
                version: version.into(),
                description: DESCRIPTION.to_string(),
                example_user_data: EXAMPLE_IGNITION.to_string(),
            },
            getter,
        }
    }

    fn base_url(&self) -> String {
        format!(
            "https://mirror.openshift.com/pub/openshift-v4/dependencies/rhcos/{}/latest/",
            self.metadata.version
        )
    }
}

/// Download and parse the `sha256sum.txt` below `base_url`.
pub(super) async fn fetch_checksums(
    getter: &dyn Getter,
    base_url: &str,
) -> Result<HashMap<String, String>> {
    let url = format!("{}sha256sum.txt", base_url);
    let raw = getter.get_all(&url).await.map_err(|e| {
        DiskError::Other(format!("error downloading the rhcos sha256sum.txt file: {}", e))
    })?;
    hashsum::parse(raw.as_slice(), ChecksumFormat::Gnu).map_err(|e| {
        DiskError::SerializationError(format!("error reading the sha256sum.txt file: {}", e))
    })
}

pub(super) fn missing_variant() -> DiskError {
    DiskError::Other(format!(
        "file {:?} does not exist in the sha256sum file",
        VARIANT
    ))
}

#[async_trait]
impl Artifact for Rhcos {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    async fn inspect(&self) -> Result<ArtifactDetails> {
        let base_url = self.base_url();
        let checksums = fetch_checksums(self.getter.as_ref(), &base_url).await?;
        let checksum = checksums.get(VARIANT).ok_or_else(missing_variant)?;

        Ok(ArtifactDetails {
            sha256_sum: checksum.clone(),
            download_url: format!("{}{}", base_url, VARIANT),
            compression: Some(Compression::Gzip),
            additional_unique_tags: vec![checksum.clone()],
        })
    }

    fn vm_spec(&self, image_ref: &str) -> VmSpec {
        base_vm(&self.metadata.name, image_ref).with_cloud_init_config_drive(IGNITION)
    }

    fn tests(&self) -> Vec<Box<dyn GuestTest>> {
        vec![Box::new(ConsoleLogin::new("core", "core"))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::VolumeSource;
    use crate::testing::StaticGetter;

    const SUMS_URL: &str =
        "https://mirror.openshift.com/pub/openshift-v4/dependencies/rhcos/4.10/latest/sha256sum.txt";

    const SUMS: &str = "\
1111111111111111111111111111111111111111111111111111111111111111  rhcos-4.10.16-x86_64-live.x86_64.iso
2222222222222222222222222222222222222222222222222222222222222222  rhcos-4.10.16-x86_64-openstack.x86_64.qcow2.gz
2222222222222222222222222222222222222222222222222222222222222222  rhcos-openstack.x86_64.qcow2.gz
3333333333333333333333333333333333333333333333333333333333333333  rhcos-qemu.x86_64.qcow2.gz
";

    #[tokio::test]
    async fn test_inspect() {
        let getter = StaticGetter::new().with_body(SUMS_URL, SUMS);
        let details = Rhcos::new("4.10", Arc::new(getter)).inspect().await.unwrap();

        let checksum = "2".repeat(64);
        assert_eq!(details.sha256_sum, checksum);
        assert_eq!(
            details.download_url,
            "https://mirror.openshift.com/pub/openshift-v4/dependencies/rhcos/4.10/latest/rhcos-openstack.x86_64.qcow2.gz"
        );
        assert_eq!(details.compression, Some(Compression::Gzip));
        assert_eq!(details.additional_unique_tags, vec![checksum]);
    }

    #[tokio::test]
    async fn test_inspect_missing_variant() {
        let getter = StaticGetter::new().with_body(
            SUMS_URL,
            "3333333333333333333333333333333333333333333333333333333333333333  rhcos-qemu.x86_64.qcow2.gz\n",
        );
        let err = Rhcos::new("4.10", Arc::new(getter)).inspect().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "file \"rhcos-openstack.x86_64.qcow2.gz\" does not exist in the sha256sum file"
        );
    }

    #[tokio::test]
    async fn test_inspect_unreachable_mirror() {
        let err = Rhcos::new("4.10", Arc::new(StaticGetter::new()))
            .inspect()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("sha256sum.txt"));
    }

    #[test]
    fn test_vm_spec_uses_ignition_config_drive() {
        let rhcos = Rhcos::new("4.10", Arc::new(StaticGetter::new()));
        let spec = rhcos.vm_spec("quay.io/containerdisks/rhcos:4.10");
        assert!(spec.name().starts_with("rhcos-"));
        assert!(spec.spec.domain.firmware.is_none());
        assert!(spec.spec.volumes.iter().any(|v| matches!(
            &v.source,
            VolumeSource::CloudInitConfigDrive { user_data } if user_data.contains("\"name\":\"core\"")
        )));
        let names: Vec<_> = rhcos.tests().iter().map(|t| t.name().to_string()).collect();
        assert_eq!(names, vec!["console-login"]);
    }
}
