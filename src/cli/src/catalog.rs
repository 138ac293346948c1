//! The artifacts this tool publishes.

use std::path::Path;
use std::sync::Arc;

use containerdisks_core::Result;
use containerdisks_runtime::artifacts::load_generic_artifacts;
use containerdisks_runtime::{
    Artifact, Catalog, CatalogEntry, Fedora, Generic, Getter, Rhcos, RhcosPrerelease,
};

/// Built-in artifacts plus the generic ones declared in `catalog_file`.
pub fn build_catalog(getter: Arc<dyn Getter>, catalog_file: Option<&Path>) -> Result<Catalog> {
    let mut entries = vec![
        CatalogEntry::new(Arc::new(Fedora::new("35", getter.clone()))),
        CatalogEntry::new(Arc::new(Fedora::new("36", getter.clone()))),
        CatalogEntry::new(Arc::new(Rhcos::new("4.9", getter.clone()))),
        CatalogEntry::new(Arc::new(Rhcos::new("4.10", getter.clone()))),
        CatalogEntry::focused_only(Arc::new(RhcosPrerelease::new("latest-4.11", getter))),
    ];

    if let Some(path) = catalog_file {
        for spec in load_generic_artifacts(path)? {
            let focused_only = spec.focused_only;
            let artifact: Arc<dyn Artifact> = Arc::new(Generic::from(spec));
            entries.push(if focused_only {
                CatalogEntry::focused_only(artifact)
            } else {
                CatalogEntry::new(artifact)
            });
        }
    }

    Ok(Catalog::new(entries))
}
