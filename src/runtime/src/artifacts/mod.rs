//! Supported distributions.

mod fedora;
mod generic;
mod rhcos;
mod rhcos_prerelease;

pub use fedora::Fedora;
pub use generic::{load_generic_artifacts, Generic, GenericArtifactSpec};
pub use rhcos::Rhcos;
pub use rhcos_prerelease::RhcosPrerelease;

use crate::cluster::VmSpec;

/// Memory request of every verification VM.
const VM_MEMORY: &str = "1024M";

/// Example cloud-init payload published with cloud-init based images.
pub const EXAMPLE_CLOUD_INIT: &str = "#cloud-config
password: changeme
chpasswd: { expire: False }
ssh_authorized_keys:
  - ssh-rsa AAAA... user@example.com
";

/// Example Ignition payload published with Ignition based images.
pub const EXAMPLE_IGNITION: &str = r#"{
  "ignition": {"version": "3.3.0"},
  "passwd": {
    "users": [
      {"name": "core", "sshAuthorizedKeys": ["ssh-rsa AAAA... user@example.com"]}
    ]
  }
}
"#;

/// VM booting `image_ref` with the settings shared by all distributions.
fn base_vm(name: &str, image_ref: &str) -> VmSpec {
    VmSpec::new(name)
        .with_rng()
        .with_container_disk(image_ref)
        .with_memory(VM_MEMORY)
        .with_termination_grace_period(0)
}

/// Last path segment of a URL.
fn file_name(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}
