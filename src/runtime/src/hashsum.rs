//! Parser for checksum listings published next to upstream disks.

use std::collections::HashMap;
use std::io::BufRead;

use containerdisks_core::error::{DiskError, Result};

/// Layout of a checksum listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumFormat {
    /// `sha256sum` output: `<hex>  <file>` or `<hex> *<file>`
    Gnu,
    /// `shasum --tag` output: `SHA256 (<file>) = <hex>`
    Bsd,
}

/// Parse a checksum listing into a file name → checksum map.
///
/// Blank lines and `#` comments are skipped; any other malformed line is an error.
pub fn parse(reader: impl BufRead, format: ChecksumFormat) -> Result<HashMap<String, String>> {
    let mut checksums = HashMap::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parsed = match format {
            ChecksumFormat::Gnu => parse_gnu(line),
            ChecksumFormat::Bsd => parse_bsd(line),
        };
        let (file, checksum) = parsed.ok_or_else(|| {
            DiskError::SerializationError(format!(
                "malformed checksum line {}: {:?}",
                index + 1,
                line
            ))
        })?;
        checksums.insert(file.to_string(), checksum.to_lowercase());
    }

    Ok(checksums)
}

fn parse_gnu(line: &str) -> Option<(&str, &str)> {
    let (checksum, file) = line.split_once(char::is_whitespace)?;
    let file = file.trim_start();
    let file = file.strip_prefix('*').unwrap_or(file);
    if !is_hex(checksum) || file.is_empty() {
        return None;
    }
    Some((file, checksum))
}

fn parse_bsd(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix("SHA256 (")?;
    let (file, checksum) = rest.rsplit_once(") = ")?;
    if !is_hex(checksum) || file.is_empty() {
        return None;
    }
    Some((file, checksum))
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}
