//! `containerdisks verify`: boot containerdisks and mark them verified.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use containerdisks_core::config::{DEFAULT_BOOT_TIMEOUT_SECS, DEFAULT_NAMESPACE};
use containerdisks_core::VerifyOptions;
use containerdisks_runtime::{
    ClusterConfig, HttpGetter, KubevirtCluster, RegistryClient, Verifier, WorkerPool,
};

use super::GlobalArgs;
use crate::catalog::build_catalog;
use crate::output::report_table;

#[derive(Args)]
pub struct VerifyArgs {
    /// Number of parallel workers
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    pub workers: u16,

    /// Registry to use inside the cluster (defaults to --registry)
    #[arg(long)]
    pub cluster_registry: Option<String>,

    /// Namespace to run verify in
    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Maximum seconds to wait for a VM to be running
    #[arg(long, default_value_t = DEFAULT_BOOT_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Kubernetes API server URL
    #[arg(long)]
    pub kube_api_server: Option<String>,

    /// File holding the bearer token for the API server
    #[arg(long)]
    pub kube_token_file: Option<PathBuf>,

    /// CA bundle used to verify the API server
    #[arg(long)]
    pub kube_ca_file: Option<PathBuf>,
}

impl VerifyArgs {
    pub fn verify_options(&self) -> VerifyOptions {
        VerifyOptions {
            workers: usize::from(self.workers),
            cluster_registry: self.cluster_registry.clone(),
            namespace: self.namespace.clone(),
            timeout_secs: self.timeout,
            ..Default::default()
        }
    }
}

pub async fn execute(
    global: &GlobalArgs,
    args: VerifyArgs,
) -> Result<i32, Box<dyn std::error::Error>> {
    let options = global.options();
    let verify_options = args.verify_options();

    let cluster_config = ClusterConfig::resolve(
        args.kube_api_server.clone(),
        args.kube_token_file.as_deref(),
        args.kube_ca_file.clone(),
        verify_options.namespace.clone(),
    )?;
    let cluster = Arc::new(KubevirtCluster::new(cluster_config)?);

    let catalog = build_catalog(Arc::new(HttpGetter::new()), global.catalog_file.as_deref())?;
    let artifacts = catalog.select(options.focus());
    tracing::info!(
        artifacts = artifacts.len(),
        workers = verify_options.workers,
        namespace = %verify_options.namespace,
        dry_run = options.dry_run,
        "Verifying containerdisks"
    );

    let workers = verify_options.workers;
    let verifier = Verifier::new(
        Arc::new(RegistryClient::new()),
        cluster,
        options,
        verify_options,
    );

    let report = WorkerPool::new(workers)
        .run(artifacts, move |artifact| {
            let verifier = verifier.clone();
            async move { verifier.verify(artifact.as_ref()).await }
        })
        .await;

    println!("{}", report_table(&report));
    Ok(report.exit_code())
}
