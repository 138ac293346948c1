//! OCI packaging and registry access for containerdisks.
//!
//! A containerdisk is an OCI image with a single layer holding
//! `disk/disk.img`. The config label `shasum` records the upstream checksum
//! of the disk, the manifest annotation `verified` records whether the image
//! booted.

mod build;
pub mod credentials;
mod error_body;
mod image;
pub mod reference;
pub mod registry;

pub use build::build_container_disk;
pub use credentials::{AuthFile, RegistryAuth};
pub use image::{
    DiskImage, ImageInfo, LayerSource, ANNOTATION_VERIFIED, LABEL_SHASUM, MEDIA_TYPE_CONFIG,
    MEDIA_TYPE_LAYER_GZIP, MEDIA_TYPE_MANIFEST,
};
pub use reference::{substitute_registry, ImageReference};
pub use registry::{RegistryClient, Repository};
