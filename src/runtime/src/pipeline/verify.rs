//! Verify pipeline: boot unverified containerdisks and mark them verified.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use containerdisks_core::error::{DiskError, Result};
use containerdisks_core::{prepare_tags, prepare_timestamp_tag, Options, VerifyOptions};
use futures::FutureExt;
use tokio::time::Instant;

use crate::artifact::Artifact;
use crate::cluster::{Cluster, VmInstance, VmPhase, VmSpec};
use crate::oci::{substitute_registry, Repository, ANNOTATION_VERIFIED};

/// What a verify run did for one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// No pushed image of the current upstream release awaits verification
    NothingToVerify,
    /// The image booted, passed its tests and was re-pushed as verified
    Verified { vm: String, tags: Vec<String> },
    /// The image booted and passed its tests; nothing was pushed
    DryRun { vm: String, tags: Vec<String> },
}

/// Boots pushed containerdisks in a cluster and records the result in the registry.
#[derive(Clone)]
pub struct Verifier {
    repository: Arc<dyn Repository>,
    cluster: Arc<dyn Cluster>,
    options: Options,
    verify_options: VerifyOptions,
    boot_timeout: Duration,
    poll_interval: Duration,
}

impl Verifier {
    pub fn new(
        repository: Arc<dyn Repository>,
        cluster: Arc<dyn Cluster>,
        options: Options,
        verify_options: VerifyOptions,
    ) -> Self {
        let boot_timeout = Duration::from_secs(verify_options.timeout_secs);
        let poll_interval = Duration::from_secs(verify_options.poll_interval_secs.max(1));
        Self {
            repository,
            cluster,
            options,
            verify_options,
            boot_timeout,
            poll_interval,
        }
    }

    /// Override the boot wait with sub-second precision.
    pub fn with_boot_timing(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.boot_timeout = timeout;
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    pub async fn verify(&self, artifact: &dyn Artifact) -> Result<VerifyOutcome> {
        let mut refs = self.find_unverified_refs(artifact).await?;
        let Some(first) = refs.first().cloned() else {
            tracing::info!("Found no containerdisks to verify");
            return Ok(VerifyOutcome::NothingToVerify);
        };

        let cluster_ref = substitute_registry(
            &first,
            &self.options.registry,
            self.verify_options.cluster_registry_or(&self.options.registry),
        );

        tracing::info!(image = %cluster_ref, "Creating VMI");
        let spec = artifact.vm_spec(&cluster_ref);
        let vm = self
            .with_vm(&spec, |vm| async move {
                tracing::info!(vm = %vm.name, "Waiting for VMI to be running");
                let vm = self.wait_running(&vm.name).await?;

                tracing::info!(vm = %vm.name, "Running tests on VMI");
                for test in artifact.tests() {
                    tracing::debug!(vm = %vm.name, test = test.name(), "Running guest test");
                    test.run(&vm, self.cluster.as_ref()).await?;
                }
                Ok(vm)
            })
            .await?;

        refs.push(prepare_timestamp_tag(
            &self.options.registry,
            &artifact.metadata().describe(),
            Utc::now(),
        ));
        self.mark_verified(&refs).await?;

        if self.options.dry_run {
            Ok(VerifyOutcome::DryRun { vm: vm.name, tags: refs })
        } else {
            Ok(VerifyOutcome::Verified { vm: vm.name, tags: refs })
        }
    }

    /// Tags of the current upstream release that were pushed but never verified.
    pub async fn find_unverified_refs(&self, artifact: &dyn Artifact) -> Result<Vec<String>> {
        let metadata = artifact.metadata();
        let describe = metadata.describe();
        let details = artifact
            .inspect()
            .await
            .map_err(|e| DiskError::InspectError {
                artifact: describe.clone(),
                message: e.to_string(),
            })?;
        tracing::info!(checksum = %details.sha256_sum, "Remote artifact checksum");

        let tags = prepare_tags(
            &self.options.registry,
            &metadata.name,
            &describe,
            &details.additional_unique_tags,
        );

        let mut refs = Vec::new();
        for tag in tags {
            let info = match self
                .repository
                .image_metadata(&tag, self.options.allow_insecure_registry)
                .await
            {
                Ok(info) => info,
                Err(e) => {
                    tracing::error!(reference = %tag, error = %e, "Failed to get metadata");
                    continue;
                }
            };

            if info.checksum() == Some(details.sha256_sum.as_str()) && !info.is_verified() {
                refs.push(tag);
            }
        }
        Ok(refs)
    }

    /// Create the VM, run `body` against it and delete it on every exit path.
    ///
    /// A panic in `body` is re-raised after the VM is deleted.
    async fn with_vm<F, Fut, T>(&self, spec: &VmSpec, body: F) -> Result<T>
    where
        F: FnOnce(VmInstance) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let vm = self.cluster.create(spec).await?;
        let result = AssertUnwindSafe(body(vm.clone())).catch_unwind().await;

        if let Err(e) = self.cluster.delete(&vm.name).await {
            tracing::error!(vm = %vm.name, error = %e, "Failed to delete VMI");
        }

        match result {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Poll until the VM runs; the first poll is immediate.
    async fn wait_running(&self, name: &str) -> Result<VmInstance> {
        let deadline = Instant::now() + self.boot_timeout;
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            interval.tick().await;
            let vm = self.cluster.get(name).await?;
            if vm.phase == VmPhase::Running {
                return Ok(vm);
            }
            if vm.phase.is_final() {
                return Err(DiskError::BootError {
                    message: format!("VMI {} reached phase {}", name, vm.phase),
                    hint: Some("Check the virt-launcher pod of the VMI".to_string()),
                });
            }
            if Instant::now() >= deadline {
                return Err(DiskError::TimeoutError(format!(
                    "VMI {} not running after {:?} (phase {})",
                    name, self.boot_timeout, vm.phase
                )));
            }
        }
    }

    /// Re-push the first reference with `verified=true` under every reference.
    async fn mark_verified(&self, refs: &[String]) -> Result<()> {
        let insecure = self.options.allow_insecure_registry;
        let Some(source) = refs.first() else {
            return Ok(());
        };

        let image = self.repository.pull_image(source, insecure).await?;
        let annotations = HashMap::from([(ANNOTATION_VERIFIED.to_string(), "true".to_string())]);
        let image = self.repository.mutate_annotations(&image, &annotations);

        for reference in refs {
            if self.options.dry_run {
                tracing::info!(reference = %reference, "Dry run enabled, not pushing");
                continue;
            }
            tracing::info!(reference = %reference, "Pushing");
            self.repository.push_image(&image, reference, insecure).await?;
        }
        Ok(())
    }
}
