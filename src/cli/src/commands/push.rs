//! `containerdisks push`: publish containerdisks of new upstream releases.

use std::sync::Arc;

use clap::Args;
use containerdisks_core::PublishOptions;
use containerdisks_runtime::{HttpGetter, Publisher, RegistryClient, WorkerPool};

use super::GlobalArgs;
use crate::catalog::build_catalog;
use crate::output::report_table;

#[derive(Args)]
pub struct PushArgs {
    /// Rebuild and push even if the registry is up to date
    #[arg(long)]
    pub force: bool,

    /// Number of parallel workers
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    pub workers: u16,
}

pub async fn execute(
    global: &GlobalArgs,
    args: PushArgs,
) -> Result<i32, Box<dyn std::error::Error>> {
    let options = global.options();
    let publish_options = PublishOptions {
        force_build: args.force,
        workers: usize::from(args.workers),
    };

    let getter = Arc::new(HttpGetter::new());
    let catalog = build_catalog(getter.clone(), global.catalog_file.as_deref())?;
    let artifacts = catalog.select(options.focus());
    tracing::info!(
        artifacts = artifacts.len(),
        workers = publish_options.workers,
        dry_run = options.dry_run,
        "Publishing containerdisks"
    );

    let publisher = Publisher::new(
        Arc::new(RegistryClient::new()),
        getter,
        options,
        publish_options.clone(),
    );

    let report = WorkerPool::new(publish_options.workers)
        .run(artifacts, move |artifact| {
            let publisher = publisher.clone();
            async move { publisher.publish(artifact.as_ref()).await }
        })
        .await;

    println!("{}", report_table(&report));
    Ok(report.exit_code())
}
