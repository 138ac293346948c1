//! Checksumming download transport.
//!
//! The body of an upstream disk is hashed exactly as it comes off the wire,
//! while a blocking writer decompresses it (gzip or xz) into a local file.
//! The two sides are connected by a bounded channel, so memory use is capped
//! by the channel depth and not by the disk size.

use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use bytes::Bytes;
use containerdisks_core::error::{DiskError, Result};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use crate::artifact::Compression;
use crate::http::Getter;

/// Number of body chunks buffered between the network and the file writer.
const CHANNEL_DEPTH: usize = 16;

/// Outcome of a completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    /// Hex encoded SHA-256 of the transported (still compressed) bytes
    pub checksum: String,
    /// Bytes received from upstream
    pub bytes_received: u64,
    /// Bytes written to the destination after decompression
    pub bytes_written: u64,
}

/// Download `url` into `dest`, decompressing on the fly.
///
/// The returned checksum covers the bytes as transported. The caller compares
/// it to the declared checksum; the destination is left for the caller to clean up.
pub async fn fetch_disk(
    getter: &dyn Getter,
    url: &str,
    compression: Option<Compression>,
    dest: &Path,
) -> Result<Download> {
    let mut body = getter.get_stream(url).await?;

    let (tx, rx) = mpsc::channel::<Bytes>(CHANNEL_DEPTH);
    let dest_path = dest.to_path_buf();
    let writer = tokio::task::spawn_blocking(move || write_body(rx, compression, &dest_path));

    let mut hasher = Sha256::new();
    let mut bytes_received = 0u64;
    let mut writer_closed = false;
    let mut stream_result = Ok(());

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                stream_result = Err(e);
                break;
            }
        };
        hasher.update(&chunk);
        bytes_received += chunk.len() as u64;

        // Keep hashing after an early writer exit so the checksum still
        // covers the whole body.
        if !writer_closed && tx.send(chunk).await.is_err() {
            writer_closed = true;
        }
    }
    drop(tx);

    let written = writer
        .await
        .map_err(|e| DiskError::Other(format!("Download writer task failed: {}", e)))?;
    stream_result?;
    let bytes_written = written.map_err(|e| DiskError::DownloadError {
        url: url.to_string(),
        message: format!("error writing the image to the destination file: {}", e),
    })?;

    let checksum = hex::encode(hasher.finalize());
    tracing::debug!(
        url,
        checksum = %checksum,
        bytes_received,
        bytes_written,
        "Download complete"
    );

    Ok(Download {
        checksum,
        bytes_received,
        bytes_written,
    })
}

/// Drain the channel through the decompressor into `dest`.
fn write_body(
    rx: mpsc::Receiver<Bytes>,
    compression: Option<Compression>,
    dest: &Path,
) -> io::Result<u64> {
    let source = ChannelReader::new(rx);
    let mut reader: Box<dyn Read> = match compression {
        None => Box::new(source),
        Some(Compression::Gzip) => Box::new(flate2::read::MultiGzDecoder::new(source)),
        Some(Compression::Xz) => Box::new(xz2::read::XzDecoder::new_multi_decoder(source)),
    };

    let mut file = BufWriter::new(std::fs::File::create(dest)?);
    let written = io::copy(&mut reader, &mut file)?;
    file.flush()?;
    file.into_inner()
        .map_err(|e| e.into_error())?
        .sync_all()?;
    Ok(written)
}

/// Blocking `Read` over the chunks sent by the network side.
struct ChannelReader {
    rx: mpsc::Receiver<Bytes>,
    current: Bytes,
}

impl ChannelReader {
    fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            rx,
            current: Bytes::new(),
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.current.is_empty() {
            match self.rx.blocking_recv() {
                Some(chunk) => self.current = chunk,
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.current.len());
        let chunk = self.current.split_to(n);
        buf[..n].copy_from_slice(&chunk);
        Ok(n)
    }
}
