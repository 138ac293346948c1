//! OCI image reference parsing.
//!
//! Parses push targets like `quay.io/containerdisks/fedora:36` into registry,
//! repository and tag so they can be compared, rewritten and handed to the
//! registry transport.

use containerdisks_core::error::{DiskError, Result};

/// Default tag when none is specified.
const DEFAULT_TAG: &str = "latest";

/// Parsed OCI image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry hostname, possibly with port (e.g., "quay.io", "registry:5000")
    pub registry: String,
    /// Repository path (e.g., "containerdisks/fedora")
    pub repository: String,
    /// Tag (e.g., "36")
    pub tag: String,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// The first path component is the registry host; references without a
    /// host are rejected because containerdisks are always pushed to an explicit
    /// registry. A missing tag defaults to `latest`. Digests are not accepted.
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(DiskError::OciImageError("Empty image reference".to_string()));
        }
        if reference.contains('@') {
            return Err(DiskError::OciImageError(format!(
                "Digest references are not supported: '{}'",
                reference
            )));
        }

        let (registry, rest) = reference.split_once('/').ok_or_else(|| {
            DiskError::OciImageError(format!(
                "Reference '{}' has no registry host",
                reference
            ))
        })?;
        if registry.is_empty() {
            return Err(DiskError::OciImageError(format!(
                "Reference '{}' has an empty registry host",
                reference
            )));
        }

        // Tag separator is the last colon after the last slash
        let last_slash = rest.rfind('/').map(|p| p + 1).unwrap_or(0);
        let (repository, tag) = match rest[last_slash..].rfind(':') {
            Some(colon) => {
                let colon = last_slash + colon;
                (&rest[..colon], &rest[colon + 1..])
            }
            None => (rest, DEFAULT_TAG),
        };

        if repository.is_empty() {
            return Err(DiskError::OciImageError(format!(
                "Empty repository in reference '{}'",
                reference
            )));
        }
        if tag.is_empty() {
            return Err(DiskError::OciImageError(format!(
                "Empty tag in reference '{}'",
                reference
            )));
        }

        Ok(Self {
            registry: registry.to_string(),
            repository: repository.to_string(),
            tag: tag.to_string(),
        })
    }

    /// `registry/repository`, without the tag.
    pub fn repository_path(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Same repository, different tag.
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..self.clone()
        }
    }

    /// Whether both references point into the same repository.
    pub fn same_repository(&self, other: &ImageReference) -> bool {
        self.registry == other.registry && self.repository == other.repository
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        format!("{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

impl std::str::FromStr for ImageReference {
    type Err = DiskError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Replace the leading `from` registry path of a reference string with `to`.
///
/// Used to point the cluster at an in-cluster mirror of the public registry.
/// References outside `from` are returned unchanged.
pub fn substitute_registry(reference: &str, from: &str, to: &str) -> String {
    if from == to || from.is_empty() {
        return reference.to_string();
    }
    match reference.strip_prefix(from) {
        Some(rest) if rest.starts_with('/') => format!("{}{}", to.trim_end_matches('/'), rest),
        _ => reference.to_string(),
    }
}
