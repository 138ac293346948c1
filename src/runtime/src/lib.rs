//! containerdisks runtime - publish and verify pipelines.
//!
//! This crate turns upstream VM disk images into containerdisks: it inspects
//! upstream releases, packages disks into OCI images, talks to container
//! registries, boots images in a KubeVirt cluster and drives guest consoles.

#![allow(clippy::result_large_err)]

pub mod artifact;
pub mod artifacts;
pub mod cluster;
pub mod console;
pub mod download;
pub mod guest;
pub mod hashsum;
pub mod http;
pub mod oci;
pub mod pipeline;

#[cfg(test)]
pub(crate) mod testing;

// Re-export common types
pub use artifact::{Artifact, ArtifactDetails, Compression, Metadata};
pub use artifacts::{Fedora, Generic, GenericArtifactSpec, Rhcos, RhcosPrerelease};
pub use cluster::{Cluster, ClusterConfig, KubevirtCluster, VmInstance, VmPhase, VmSpec};
pub use console::{LoginAutomaton, LoginOptions, LoginState, LoginTimeouts};
pub use guest::{ConsoleLogin, GuestOsInfo, GuestTest, SecureBootCheck};
pub use http::{Getter, HttpGetter};
pub use oci::{
    build_container_disk, DiskImage, ImageInfo, ImageReference, RegistryClient, Repository,
};
pub use pipeline::{
    Catalog, CatalogEntry, PublishOutcome, Publisher, RunReport, Verifier, VerifyOutcome,
    WorkerPool,
};

/// containerdisks runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
