//! Registry credential lookup.
//!
//! Credentials are resolved per registry host from, in order:
//! 1. `REGISTRY_USERNAME` / `REGISTRY_PASSWORD`
//! 2. a containers/docker auth file (`REGISTRY_AUTH_FILE`,
//!    `$XDG_RUNTIME_DIR/containers/auth.json`, `~/.docker/config.json`)
//! 3. anonymous access

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::Engine;
use containerdisks_core::error::{DiskError, Result};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use serde::Deserialize;

/// Authentication credentials for a container registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Create authentication from environment variables, if both are set.
    pub fn from_env() -> Option<Self> {
        let username = std::env::var("REGISTRY_USERNAME").ok()?;
        let password = std::env::var("REGISTRY_PASSWORD").ok()?;
        Some(Self::basic(username, password))
    }

    /// Resolve credentials for a registry host.
    pub fn resolve(registry: &str) -> Self {
        if let Some(auth) = Self::from_env() {
            return auth;
        }

        for path in AuthFile::default_paths() {
            match AuthFile::load(&path).and_then(|file| file.get(registry)) {
                Ok(Some(auth)) => {
                    tracing::debug!(
                        registry,
                        path = %path.display(),
                        "Using registry credentials from auth file"
                    );
                    return auth;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Ignoring unreadable auth file"
                    );
                }
            }
        }

        Self::anonymous()
    }

    /// Username and password, when both are known.
    pub(crate) fn credentials(&self) -> Option<(&str, &str)> {
        Some((self.username.as_deref()?, self.password.as_deref()?))
    }

    /// Convert to oci-distribution auth type.
    pub(crate) fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// One entry of the `auths` map.
#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// containers-auth.json / docker config.json
#[derive(Debug, Default, Deserialize)]
pub struct AuthFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

impl AuthFile {
    /// Candidate auth file locations, most specific first.
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(path) = std::env::var("REGISTRY_AUTH_FILE") {
            paths.push(PathBuf::from(path));
        }
        if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
            paths.push(PathBuf::from(runtime_dir).join("containers").join("auth.json"));
        }
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".docker").join("config.json"));
        }
        paths
    }

    /// Load an auth file. A missing file is an empty file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path).map_err(|e| {
            DiskError::ConfigError(format!("Failed to read auth file {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            DiskError::ConfigError(format!("Failed to parse auth file {}: {}", path.display(), e))
        })
    }

    /// Get credentials for a registry host.
    pub fn get(&self, registry: &str) -> Result<Option<RegistryAuth>> {
        let wanted = normalize_registry(registry);
        let entry = self
            .auths
            .iter()
            .find(|(key, _)| normalize_registry(key) == wanted)
            .map(|(_, entry)| entry);

        let Some(entry) = entry else {
            return Ok(None);
        };

        if let (Some(u), Some(p)) = (&entry.username, &entry.password) {
            return Ok(Some(RegistryAuth::basic(u.clone(), p.clone())));
        }

        let Some(encoded) = entry.auth.as_deref().filter(|a| !a.is_empty()) else {
            return Ok(None);
        };
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| {
                DiskError::ConfigError(format!("Invalid auth entry for {}: {}", registry, e))
            })?;
        let decoded = String::from_utf8(decoded)
            .map_err(|e| {
                DiskError::ConfigError(format!("Invalid auth entry for {}: {}", registry, e))
            })?;
        let (username, password) = decoded.split_once(':').ok_or_else(|| {
            DiskError::ConfigError(format!("Auth entry for {} is not user:password", registry))
        })?;

        Ok(Some(RegistryAuth::basic(username, password)))
    }
}

/// Reduce an auth file key or registry host to a bare host name.
fn normalize_registry(registry: &str) -> String {
    let host = registry
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or(registry);

    match host {
        "docker.io" | "registry-1.docker.io" | "index.docker.io" => "docker.io".to_string(),
        other => other.to_string(),
    }
}
