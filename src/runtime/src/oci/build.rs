//! Packages a raw disk file into a containerdisk image.
//!
//! The layer is a gzip compressed tar with the disk at `disk/disk.img`, owned
//! by the qemu user (uid/gid 107) and read-only. Layer digest and diff id are
//! computed while streaming, so the disk is read exactly once.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use containerdisks_core::error::{DiskError, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use oci_distribution::manifest::{OciDescriptor, OciImageManifest};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use super::image::{
    DiskImage, ANNOTATION_VERIFIED, LABEL_SHASUM, MEDIA_TYPE_CONFIG, MEDIA_TYPE_LAYER_GZIP,
    MEDIA_TYPE_MANIFEST,
};

/// Owner of the disk inside the guest launcher pod.
const QEMU_UID: u64 = 107;

const DISK_DIR: &str = "disk/";
const DISK_PATH: &str = "disk/disk.img";

/// Build a containerdisk around `disk_path`.
///
/// The returned image keeps its layer blob in a private temporary directory
/// that lives as long as the image.
pub async fn build_container_disk(disk_path: &Path, checksum: &str) -> Result<DiskImage> {
    let disk_path = disk_path.to_path_buf();
    let checksum = checksum.to_string();

    tokio::task::spawn_blocking(move || build_blocking(&disk_path, &checksum))
        .await
        .map_err(|e| DiskError::BuildError(format!("Build task failed: {}", e)))?
}

fn build_blocking(disk_path: &Path, checksum: &str) -> Result<DiskImage> {
    let workdir = TempDir::new()
        .map_err(|e| DiskError::BuildError(format!("Failed to create build directory: {}", e)))?;
    let layer_path = workdir.path().join("layer.tar.gz");

    let layer = write_layer(disk_path, &layer_path).map_err(|e| {
        DiskError::BuildError(format!(
            "Failed to create the image layer from {}: {}",
            disk_path.display(),
            e
        ))
    })?;

    tracing::debug!(
        disk = %disk_path.display(),
        digest = %layer.digest,
        diff_id = %layer.diff_id,
        size = layer.size,
        "Disk layer written"
    );

    let config = serde_json::json!({
        "architecture": "amd64",
        "os": "linux",
        "created": chrono::Utc::now().to_rfc3339(),
        "config": {
            "Labels": { LABEL_SHASUM: checksum }
        },
        "rootfs": {
            "type": "layers",
            "diff_ids": [layer.diff_id.clone()]
        },
        "history": []
    });
    let config_bytes = serde_json::to_vec(&config)?;

    let manifest = OciImageManifest {
        schema_version: 2,
        media_type: Some(MEDIA_TYPE_MANIFEST.to_string()),
        config: OciDescriptor {
            media_type: MEDIA_TYPE_CONFIG.to_string(),
            digest: sha256_digest(&config_bytes),
            size: config_bytes.len() as i64,
            ..Default::default()
        },
        layers: vec![OciDescriptor {
            media_type: MEDIA_TYPE_LAYER_GZIP.to_string(),
            digest: layer.digest,
            size: layer.size as i64,
            ..Default::default()
        }],
        annotations: Some(
            [(ANNOTATION_VERIFIED.to_string(), "false".to_string())]
                .into_iter()
                .collect(),
        ),
        ..Default::default()
    };

    Ok(DiskImage::local(
        manifest,
        config_bytes,
        vec![layer.path],
        workdir,
    ))
}

struct WrittenLayer {
    path: PathBuf,
    /// Digest of the compressed blob
    digest: String,
    /// Digest of the uncompressed tar
    diff_id: String,
    size: u64,
}

fn write_layer(disk_path: &Path, layer_path: &Path) -> io::Result<WrittenLayer> {
    let mut disk = File::open(disk_path)?;
    let disk_size = disk.metadata()?.len();

    let blob = HashingWriter::new(BufWriter::new(File::create(layer_path)?));
    let gzip = GzEncoder::new(blob, Compression::default());
    let mut tar = tar::Builder::new(HashingWriter::new(gzip));

    let mut dir = tar::Header::new_gnu();
    dir.set_entry_type(tar::EntryType::Directory);
    dir.set_path(DISK_DIR)?;
    dir.set_size(0);
    dir.set_mode(0o555);
    dir.set_uid(QEMU_UID);
    dir.set_gid(QEMU_UID);
    dir.set_cksum();
    tar.append(&dir, io::empty())?;

    let mut file = tar::Header::new_gnu();
    file.set_entry_type(tar::EntryType::Regular);
    file.set_path(DISK_PATH)?;
    file.set_size(disk_size);
    file.set_mode(0o440);
    file.set_uid(QEMU_UID);
    file.set_gid(QEMU_UID);
    file.set_cksum();
    tar.append(&file, &mut disk)?;

    let uncompressed = tar.into_inner()?;
    let diff_id = uncompressed.digest();
    let mut blob = uncompressed.into_inner().finish()?;
    blob.flush()?;
    let digest = blob.digest();
    let size = blob.written;
    blob.into_inner()
        .into_inner()
        .map_err(|e| e.into_error())?
        .sync_all()?;

    Ok(WrittenLayer {
        path: layer_path.to_path_buf(),
        digest,
        diff_id,
        size,
    })
}

/// Writer adapter computing SHA-256 and byte count of everything written.
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    fn digest(&self) -> String {
        format!("sha256:{}", hex::encode(self.hasher.clone().finalize()))
    }

    fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}
