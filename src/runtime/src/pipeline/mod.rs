//! Publish and verify pipelines and the worker pool driving them.

mod catalog;
mod publish;
mod verify;
mod workers;

pub use catalog::{Catalog, CatalogEntry};
pub use publish::{PublishOutcome, Publisher};
pub use verify::{VerifyOutcome, Verifier};
pub use workers::{JobReport, RunReport, WorkerPool};
