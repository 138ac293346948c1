//! Raw registry error bodies.
//!
//! `oci-distribution` only understands the error codes defined by the OCI
//! distribution API. quay.io reports expired tags with code `UNKNOWN`, which
//! makes the client fail while decoding the envelope and drops the message.
//! These helpers re-read the manifest endpoint directly so the body can still
//! be classified.

use containerdisks_core::error::DiskError;
use oci_distribution::Reference;
use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use serde::Deserialize;

use super::credentials::RegistryAuth;
use super::reference::ImageReference;

/// Message returned by quay.io for tags removed by garbage collection.
pub(crate) const TAG_EXPIRED_MARKER: &str =
    "was deleted or has expired. To pull, revive via time machine";

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
    application/vnd.docker.distribution.manifest.v2+json, \
    application/vnd.oci.image.index.v1+json";

#[derive(Debug, Default, Deserialize)]
struct Envelope {
    #[serde(default)]
    errors: Vec<EnvelopeError>,
}

#[derive(Debug, Default, Deserialize)]
struct EnvelopeError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Classify an error body by code, accepting non-standard codes.
///
/// Returns `None` when the body says nothing about a missing image.
pub(crate) fn classify_body(reference: &ImageReference, body: &str) -> Option<DiskError> {
    let name = reference.full_reference();
    let envelope: Envelope = serde_json::from_str(body).unwrap_or_default();

    for error in &envelope.errors {
        if error.message.contains(TAG_EXPIRED_MARKER) {
            return Some(DiskError::TagExpired(name));
        }
        match error.code.as_str() {
            "NAME_UNKNOWN" => return Some(DiskError::RepositoryUnknown(name)),
            "MANIFEST_UNKNOWN" => return Some(DiskError::ManifestUnknown(name)),
            _ => {}
        }
    }

    if body.contains(TAG_EXPIRED_MARKER) {
        return Some(DiskError::TagExpired(name));
    }
    None
}

/// Parameters of a `WWW-Authenticate: Bearer ...` challenge.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl BearerChallenge {
    pub(crate) fn parse(header: &str) -> Option<Self> {
        let params = header.trim().strip_prefix("Bearer ")?;
        let mut challenge = Self::default();
        for part in params.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            let value = value.trim_matches('"').to_string();
            match key {
                "realm" => challenge.realm = value,
                "service" => challenge.service = Some(value),
                "scope" => challenge.scope = Some(value),
                _ => {}
            }
        }
        (!challenge.realm.is_empty()).then_some(challenge)
    }

    fn query(&self, repository: &str) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(service) = &self.service {
            query.push(("service", service.clone()));
        }
        let scope = self
            .scope
            .clone()
            .unwrap_or_else(|| format!("repository:{}:pull", repository));
        query.push(("scope", scope));
        query
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// GET the manifest of `reference` and return the body of a failed response.
///
/// Follows one bearer challenge. Any transport problem yields `None`.
pub(crate) async fn fetch_error_body(
    http: &reqwest::Client,
    reference: &Reference,
    auth: &RegistryAuth,
    insecure: bool,
) -> Option<String> {
    let scheme = if insecure { "http" } else { "https" };
    let url = format!(
        "{}://{}/v2/{}/manifests/{}",
        scheme,
        reference.resolve_registry(),
        reference.repository(),
        reference.tag().unwrap_or("latest")
    );

    let mut response = manifest_request(http, &url, None).await?;
    if response.status() == StatusCode::UNAUTHORIZED {
        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|h| h.to_str().ok())
            .and_then(BearerChallenge::parse)?;
        let token = fetch_token(http, &challenge, reference.repository(), auth).await?;
        response = manifest_request(http, &url, Some(&token)).await?;
    }

    if response.status().is_success() {
        return None;
    }
    let status = response.status();
    let body = response.text().await.ok()?;
    tracing::debug!(url = %url, status = %status, body = %body, "Registry error body");
    Some(body)
}

async fn manifest_request(
    http: &reqwest::Client,
    url: &str,
    token: Option<&str>,
) -> Option<reqwest::Response> {
    let mut request = http.get(url).header(ACCEPT, MANIFEST_ACCEPT);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    match request.send().await {
        Ok(response) => Some(response),
        Err(e) => {
            tracing::debug!(url, error = %e, "Manifest request failed");
            None
        }
    }
}

async fn fetch_token(
    http: &reqwest::Client,
    challenge: &BearerChallenge,
    repository: &str,
    auth: &RegistryAuth,
) -> Option<String> {
    let mut request = http
        .get(&challenge.realm)
        .query(&challenge.query(repository));
    if let Some((username, password)) = auth.credentials() {
        request = request.basic_auth(username, Some(password));
    }

    let response = request.send().await.ok()?;
    if !response.status().is_success() {
        tracing::debug!(
            realm = %challenge.realm,
            status = %response.status(),
            "Token request refused"
        );
        return None;
    }
    let token: TokenResponse = response.json().await.ok()?;
    token.token.or(token.access_token)
}
