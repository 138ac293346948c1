//! Tag math for pushed containerdisks.
//!
//! Every artifact is pushed under `registry/name:version` plus one tag per
//! additional unique tag reported by the upstream release. The least specific
//! tag is always last; callers that need "the stable tag" read the last element.

use chrono::{DateTime, Utc};

/// Format of the audit trail tag minted after a successful verification.
const TIMESTAMP_FORMAT: &str = "%y%m%d%H%M";

/// Join a registry path and an image path, collapsing duplicate separators.
pub fn join_path(registry: &str, path: &str) -> String {
    let registry = registry.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if registry.is_empty() {
        return path.to_string();
    }
    format!("{}/{}", registry, path)
}

/// Build the ordered push targets for an artifact.
///
/// * `describe` - the canonical `name:version` of the artifact
/// * `additional_tags` - extra unique tags; empty strings are dropped
pub fn prepare_tags(
    registry: &str,
    name: &str,
    describe: &str,
    additional_tags: &[String],
) -> Vec<String> {
    let mut names: Vec<String> = additional_tags
        .iter()
        .filter(|tag| !tag.is_empty())
        .map(|tag| format!("{}:{}", join_path(registry, name), tag))
        .collect();

    // the least specific tag is last
    names.push(join_path(registry, describe));
    names
}

/// Build the timestamp tag recording when the content last proved to boot.
pub fn prepare_timestamp_tag(registry: &str, describe: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}-{}",
        join_path(registry, describe),
        now.format(TIMESTAMP_FORMAT)
    )
}
