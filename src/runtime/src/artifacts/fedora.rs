//! Fedora Cloud images.

use std::sync::Arc;

use async_trait::async_trait;
use containerdisks_core::error::{DiskError, Result};
use serde::Deserialize;

use super::{base_vm, file_name, EXAMPLE_CLOUD_INIT};
use crate::artifact::{Artifact, ArtifactDetails, Metadata};
use crate::cluster::VmSpec;
use crate::guest::{ConsoleLogin, GuestOsInfo, GuestTest, SecureBootCheck};
use crate::http::Getter;

const RELEASES_URL: &str = "https://getfedora.org/releases.json";
const ARCH: &str = "x86_64";
const VARIANT: &str = "Cloud";

const DESCRIPTION: &str = r#"<img src="https://upload.wikimedia.org/wikipedia/commons/thumb/3/3f/Fedora_logo.svg/240px-Fedora_logo.svg.png" alt="drawing" width="15"/> Fedora [Cloud](https://alt.fedoraproject.org/cloud/) images for KubeVirt.
<br />
<br />
Visit [getfedora.org](https://getfedora.org/) to learn more about the Fedora project."#;

/// Creates the `fedora` user and disables bracketed paste, which garbles console matching.
const USER_DATA: &str = "#cloud-config\nsystem_info:\n  default_user:\n    name: fedora\n    plain_text_passwd: fedora\n    lock_passwd: False\nwrite_files:\n  - path: /etc/profile.d/disable-bracketed-paste.sh\n    content: |\n      bind 'set enable-bracketed-paste off'\n    permissions: '0755'\n";

/// One entry of `releases.json`.
#[derive(Debug, Clone, Deserialize)]
struct Release {
    #[serde(default)]
    variant: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    sha256: String,
    #[serde(default)]
    arch: String,
}

pub struct Fedora {
    metadata: Metadata,
    getter: Arc<dyn Getter>,
}

impl Fedora {
    pub fn new(version: impl Into<String>, getter: Arc<dyn Getter>) -> Self {
        Self {
            metadata: Metadata {
                name: "fedora".to_string(),
                version: version.into(),
                description: DESCRIPTION.to_string(),
                example_user_data: EXAMPLE_CLOUD_INIT.to_string(),
            },
            getter,
        }
    }

    fn matches(&self, release: &Release) -> bool {
        release.version == self.metadata.version
            && release.arch == ARCH
            && release.variant == VARIANT
            && release.link.ends_with("qcow2")
    }
}

#[async_trait]
impl Artifact for Fedora {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    async fn inspect(&self) -> Result<ArtifactDetails> {
        let raw = self.getter.get_all(RELEASES_URL).await.map_err(|e| {
            DiskError::Other(format!("error downloading the fedora releases.json file: {}", e))
        })?;
        let releases: Vec<Release> = serde_json::from_slice(&raw).map_err(|e| {
            DiskError::SerializationError(format!("error parsing the releases.json file: {}", e))
        })?;

        let release = releases
            .iter()
            .find(|r| self.matches(r))
            .ok_or_else(|| {
                DiskError::Other(format!(
                    "no release information in releases.json for fedora:{:?} found",
                    self.metadata.version
                ))
            })?;

        let name = file_name(&release.link);
        let name = name.strip_prefix("Fedora-Cloud-Base-").unwrap_or(name);
        let tag = name.strip_suffix(".x86_64.qcow2").unwrap_or(name).to_string();

        Ok(ArtifactDetails {
            sha256_sum: release.sha256.clone(),
            download_url: release.link.clone(),
            compression: None,
            additional_unique_tags: vec![tag],
        })
    }

    fn vm_spec(&self, image_ref: &str) -> VmSpec {
        base_vm(&self.metadata.name, image_ref)
            .with_smm()
            .with_uefi(true)
            .with_cloud_init_no_cloud(USER_DATA)
    }

    fn tests(&self) -> Vec<Box<dyn GuestTest>> {
        vec![
            Box::new(SecureBootCheck::default()),
            Box::new(ConsoleLogin::new("fedora", "fedora")),
            Box::new(GuestOsInfo),
        ]
    }
}
