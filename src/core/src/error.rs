use thiserror::Error;

/// containerdisks error types
#[derive(Error, Debug)]
pub enum DiskError {
    /// Upstream release lookup failed (network or parse failure)
    #[error("Error introspecting artifact {artifact:?}: {message}")]
    InspectError { artifact: String, message: String },

    /// The registry does not know the repository yet
    #[error("Repository unknown: {0}")]
    RepositoryUnknown(String),

    /// The registry does not know the manifest or tag
    #[error("Manifest unknown: {0}")]
    ManifestUnknown(String),

    /// The tag existed once but was deleted or has expired
    #[error("Tag deleted or expired: {0}")]
    TagExpired(String),

    /// Any other container registry fault
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// Upstream download failed
    #[error("Download failed: {url} - {message}")]
    DownloadError { url: String, message: String },

    /// Downloaded content does not match the declared checksum
    #[error("Expected checksum {expected:?} but got {actual:?}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Streaming the disk into an image layer failed
    #[error("Build error: {0}")]
    BuildError(String),

    /// OCI image content error
    #[error("OCI image error: {0}")]
    OciImageError(String),

    /// Virtualization cluster API error
    #[error("Cluster error: {0}")]
    ClusterError(String),

    /// VM failed to start
    #[error("VM boot failed: {message}")]
    BootError {
        message: String,
        hint: Option<String>,
    },

    /// Timeout error
    #[error("Timeout: {0}")]
    TimeoutError(String),

    /// The guest rejected the supplied credentials
    #[error("Login incorrect: {0}")]
    LoginIncorrect(String),

    /// Guest console session error
    #[error("Console error: {0}")]
    ConsoleError(String),

    /// A post-boot guest test failed
    #[error("Guest test {test} failed: {message}")]
    GuestTestError { test: String, message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl DiskError {
    /// Whether the error means "no image has been pushed under this reference yet".
    ///
    /// Repository-unknown, manifest-unknown and tag-expired are not failures for
    /// the pipelines: all three trigger a build and push.
    pub fn is_image_absent(&self) -> bool {
        matches!(
            self,
            DiskError::RepositoryUnknown(_)
                | DiskError::ManifestUnknown(_)
                | DiskError::TagExpired(_)
        )
    }

    /// Whether the error is a timeout rather than a definitive failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, DiskError::TimeoutError(_))
    }
}

impl From<serde_json::Error> for DiskError {
    fn from(err: serde_json::Error) -> Self {
        DiskError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for DiskError {
    fn from(err: serde_yaml::Error) -> Self {
        DiskError::SerializationError(err.to_string())
    }
}

/// Result type alias for containerdisks operations
pub type Result<T> = std::result::Result<T, DiskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspect_error_display() {
        let error = DiskError::InspectError {
            artifact: "fedora:36".to_string(),
            message: "no release found".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Error introspecting artifact \"fedora:36\": no release found"
        );
    }

    #[test]
    fn test_checksum_mismatch_display() {
        let error = DiskError::ChecksumMismatch {
            expected: "abc123".to_string(),
            actual: "def456".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Expected checksum \"abc123\" but got \"def456\""
        );
    }

    #[test]
    fn test_registry_error_display() {
        let error = DiskError::RegistryError {
            registry: "quay.io".to_string(),
            message: "Authentication failed".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Registry error: quay.io - Authentication failed"
        );
    }

    #[test]
    fn test_is_image_absent() {
        assert!(DiskError::RepositoryUnknown("quay.io/x/fedora:36".into()).is_image_absent());
        assert!(DiskError::ManifestUnknown("quay.io/x/fedora:36".into()).is_image_absent());
        assert!(DiskError::TagExpired("quay.io/x/fedora:36".into()).is_image_absent());
        assert!(!DiskError::RegistryError {
            registry: "quay.io".into(),
            message: "500".into(),
        }
        .is_image_absent());
        assert!(!DiskError::Other("x".into()).is_image_absent());
    }

    #[test]
    fn test_login_incorrect_is_not_timeout() {
        assert!(!DiskError::LoginIncorrect("fedora".into()).is_timeout());
        assert!(DiskError::TimeoutError("login".into()).is_timeout());
    }

    #[test]
    fn test_boot_error_display() {
        let error = DiskError::BootError {
            message: "VMI fedora-abcde failed".to_string(),
            hint: Some("Check the virt-launcher pod".to_string()),
        };
        assert_eq!(error.to_string(), "VM boot failed: VMI fedora-abcde failed");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: DiskError = io_error.into();
        assert!(matches!(error, DiskError::IoError(_)));
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope");
        let error: DiskError = result.unwrap_err().into();
        assert!(matches!(error, DiskError::SerializationError(_)));
    }

    #[test]
    fn test_serde_yaml_error_conversion() {
        let result: std::result::Result<serde_yaml::Value, _> =
            serde_yaml::from_str("invalid: yaml: content:");
        let error: DiskError = result.unwrap_err().into();
        assert!(matches!(error, DiskError::SerializationError(_)));
    }
}
