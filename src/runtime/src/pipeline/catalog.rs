//! The immutable set of artifacts a run works on.

use std::sync::Arc;

use crate::artifact::Artifact;

/// One catalog entry.
#[derive(Clone)]
pub struct CatalogEntry {
    pub artifact: Arc<dyn Artifact>,
    /// Only run this entry when it is explicitly focused
    pub skip_when_not_focused: bool,
}

impl CatalogEntry {
    pub fn new(artifact: Arc<dyn Artifact>) -> Self {
        Self {
            artifact,
            skip_when_not_focused: false,
        }
    }

    pub fn focused_only(artifact: Arc<dyn Artifact>) -> Self {
        Self {
            artifact,
            skip_when_not_focused: true,
        }
    }
}

/// Ordered list of supported artifacts.
#[derive(Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Artifacts a run should process.
    ///
    /// With a focus only the artifact whose `name:version` equals it is
    /// selected. Without one, entries marked focused-only are left out.
    pub fn select(&self, focus: Option<&str>) -> Vec<Arc<dyn Artifact>> {
        self.entries
            .iter()
            .filter(|entry| match focus {
                Some(focus) => entry.artifact.metadata().describe() == focus,
                None => !entry.skip_when_not_focused,
            })
            .map(|entry| entry.artifact.clone())
            .collect()
    }
}
