//! VirtualMachineInstance definitions.
//!
//! Only the subset of the KubeVirt API the verification VMs need is modelled.
//! Specs are assembled with chained option methods:
//!
//! ```ignore
//! let spec = VmSpec::new("fedora")
//!     .with_container_disk("quay.io/containerdisks/fedora:36")
//!     .with_memory("1024M")
//!     .with_rng();
//! ```

use rand::distributions::Alphanumeric;
use rand::Rng as _;
use serde::{Deserialize, Serialize};

const API_VERSION: &str = "kubevirt.io/v1";
const KIND: &str = "VirtualMachineInstance";
const DISK_BUS: &str = "virtio";
const NAME_SUFFIX_LEN: usize = 5;

/// A VirtualMachineInstance manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmSpec {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: VmiSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmiSpec {
    pub domain: DomainSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_grace_period_seconds: Option<i64>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainSpec {
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub devices: Devices,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Features>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware: Option<Firmware>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub requests: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Devices {
    #[serde(default)]
    pub disks: Vec<Disk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rng: Option<RngDevice>,
}

/// Empty marker enabling the virtio RNG device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RngDevice {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disk {
    pub name: String,
    pub disk: DiskTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskTarget {
    pub bus: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Features {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smm: Option<FeatureState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureState {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Firmware {
    pub bootloader: Bootloader,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bootloader {
    pub efi: Efi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Efi {
    pub secure_boot: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    #[serde(flatten)]
    pub source: VolumeSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VolumeSource {
    ContainerDisk { image: String },
    #[serde(rename_all = "camelCase")]
    CloudInitNoCloud { user_data: String },
    #[serde(rename_all = "camelCase")]
    CloudInitConfigDrive { user_data: String },
}

impl VmSpec {
    /// New instance named `<prefix>-<random suffix>`.
    pub fn new(prefix: &str) -> Self {
        Self::named(random_name(prefix))
    }

    /// New instance with an exact name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ObjectMeta {
                name: name.into(),
                namespace: None,
            },
            spec: VmiSpec::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.metadata.namespace = Some(namespace.into());
        self
    }

    /// Boot from a containerdisk.
    pub fn with_container_disk(self, image: impl Into<String>) -> Self {
        self.with_volume(VolumeSource::ContainerDisk {
            image: image.into(),
        })
    }

    pub fn with_memory(mut self, memory: impl Into<String>) -> Self {
        self.spec
            .domain
            .resources
            .requests
            .insert("memory".to_string(), memory.into());
        self
    }

    pub fn with_rng(mut self) -> Self {
        self.spec.domain.devices.rng = Some(RngDevice {});
        self
    }

    /// UEFI firmware, optionally with secure boot.
    pub fn with_uefi(mut self, secure_boot: bool) -> Self {
        self.spec.domain.firmware = Some(Firmware {
            bootloader: Bootloader {
                efi: Efi { secure_boot },
            },
        });
        self
    }

    /// System management mode, needed for secure boot.
    pub fn with_smm(mut self) -> Self {
        self.spec
            .domain
            .features
            .get_or_insert_with(Features::default)
            .smm = Some(FeatureState { enabled: true });
        self
    }

    pub fn with_cloud_init_no_cloud(self, user_data: impl Into<String>) -> Self {
        self.with_volume(VolumeSource::CloudInitNoCloud {
            user_data: user_data.into(),
        })
    }

    /// Config drive user data, used for Ignition.
    pub fn with_cloud_init_config_drive(self, user_data: impl Into<String>) -> Self {
        self.with_volume(VolumeSource::CloudInitConfigDrive {
            user_data: user_data.into(),
        })
    }

    pub fn with_termination_grace_period(mut self, seconds: i64) -> Self {
        self.spec.termination_grace_period_seconds = Some(seconds);
        self
    }

    /// The containerdisk image this instance boots from.
    pub fn container_disk_image(&self) -> Option<&str> {
        self.spec.volumes.iter().find_map(|v| match &v.source {
            VolumeSource::ContainerDisk { image } => Some(image.as_str()),
            _ => None,
        })
    }

    /// Attach `source` as the next `diskN` virtio disk.
    fn with_volume(mut self, source: VolumeSource) -> Self {
        let name = format!("disk{}", self.spec.volumes.len());
        self.spec.domain.devices.disks.push(Disk {
            name: name.clone(),
            disk: DiskTarget {
                bus: DISK_BUS.to_string(),
            },
        });
        self.spec.volumes.push(Volume { name, source });
        self
    }
}

fn random_name(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NAME_SUFFIX_LEN)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("{}-{}", prefix, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_name() {
        let spec = VmSpec::new("fedora");
        let suffix = spec.name().strip_prefix("fedora-").unwrap();
        assert_eq!(suffix.len(), NAME_SUFFIX_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_disks_follow_volumes() {
        let spec = VmSpec::named("fedora-abcde")
            .with_container_disk("quay.io/containerdisks/fedora:36")
            .with_cloud_init_no_cloud("#cloud-config\n");

        let disks: Vec<_> = spec
            .spec
            .domain
            .devices
            .disks
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        let volumes: Vec<_> = spec.spec.volumes.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(disks, vec!["disk0", "disk1"]);
        assert_eq!(volumes, disks);
        assert_eq!(
            spec.container_disk_image(),
            Some("quay.io/containerdisks/fedora:36")
        );
    }

    #[test]
    fn test_serialized_shape() {
        let spec = VmSpec::named("fedora-abcde")
            .with_namespace("kubevirt")
            .with_smm()
            .with_rng()
            .with_uefi(true)
            .with_container_disk("registry:5000/fedora:36")
            .with_memory("1024M")
            .with_termination_grace_period(0)
            .with_cloud_init_config_drive("{\"ignition\":{}}");

        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["apiVersion"], "kubevirt.io/v1");
        assert_eq!(value["kind"], "VirtualMachineInstance");
        assert_eq!(value["metadata"]["namespace"], "kubevirt");
        assert_eq!(value["spec"]["domain"]["resources"]["requests"]["memory"], "1024M");
        assert_eq!(value["spec"]["domain"]["features"]["smm"]["enabled"], true);
        assert_eq!(value["spec"]["domain"]["firmware"]["bootloader"]["efi"]["secureBoot"], true);
        assert!(value["spec"]["domain"]["devices"]["rng"].is_object());
        assert_eq!(value["spec"]["terminationGracePeriodSeconds"], 0);
        assert_eq!(
            value["spec"]["volumes"][0]["containerDisk"]["image"],
            "registry:5000/fedora:36"
        );
        assert_eq!(
            value["spec"]["volumes"][1]["cloudInitConfigDrive"]["userData"],
            "{\"ignition\":{}}"
        );
        assert_eq!(value["spec"]["domain"]["devices"]["disks"][1]["disk"]["bus"], "virtio");
    }

    #[test]
    fn test_rng_device() {
        let spec = VmSpec::named("fedora-abcde").with_rng();
        assert_eq!(spec.spec.domain.devices.rng, Some(RngDevice {}));

        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["spec"]["domain"]["devices"]["rng"], serde_json::json!({}));
        assert!(VmSpec::new("fedora").spec.domain.devices.rng.is_none());
    }

    #[test]
    fn test_roundtrip_from_json() {
        let spec = VmSpec::named("rhcos-xyz12")
            .with_rng()
            .with_container_disk("quay.io/containerdisks/rhcos:4.10");
        let json = serde_json::to_string(&spec).unwrap();
        let parsed: VmSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, spec);
    }
}
