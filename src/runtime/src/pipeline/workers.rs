//! Fixed-size worker pool fanning artifacts out to pipeline runs.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use containerdisks_core::error::{DiskError, Result};
use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tracing::Instrument;

use crate::artifact::Artifact;

/// Result of one artifact's job.
#[derive(Debug)]
pub struct JobReport<T> {
    /// `name:version` of the artifact
    pub artifact: String,
    pub result: Result<T>,
}

/// Results of a pool run, in catalog order.
#[derive(Debug)]
pub struct RunReport<T> {
    pub jobs: Vec<JobReport<T>>,
}

impl<T> RunReport<T> {
    pub fn failures(&self) -> impl Iterator<Item = &JobReport<T>> {
        self.jobs.iter().filter(|j| j.result.is_err())
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Process exit status: 1 if any job failed.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

/// Runs a job per artifact on a fixed number of tokio tasks.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    /// A pool of `workers` tasks; at least one.
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `job` for every artifact and wait for all of them.
    ///
    /// Failures and panics are contained to the job that caused them.
    pub async fn run<T, F, Fut>(&self, artifacts: Vec<Arc<dyn Artifact>>, job: F) -> RunReport<T>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn Artifact>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let count = artifacts.len();
        let capacity = count.max(1);
        let (job_tx, job_rx) = mpsc::channel::<(usize, Arc<dyn Artifact>)>(capacity);
        let (report_tx, mut report_rx) = mpsc::channel::<(usize, JobReport<T>)>(capacity);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let job = Arc::new(job);

        let mut handles = Vec::with_capacity(self.workers);
        for worker in 0..self.workers {
            let job_rx = job_rx.clone();
            let report_tx = report_tx.clone();
            let job = job.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let next = job_rx.lock().await.recv().await;
                    let Some((index, artifact)) = next else {
                        break;
                    };

                    let describe = artifact.metadata().describe();
                    let span = tracing::info_span!("artifact", artifact = %describe, worker);
                    let result = AssertUnwindSafe(job(artifact).instrument(span.clone()))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| Err(DiskError::Other("worker panicked".to_string())));

                    if let Err(e) = &result {
                        span.in_scope(|| tracing::error!(error = %e, "Artifact failed"));
                    }

                    let report = JobReport {
                        artifact: describe,
                        result,
                    };
                    if report_tx.send((index, report)).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(report_tx);

        for job in artifacts.into_iter().enumerate() {
            if job_tx.send(job).await.is_err() {
                break;
            }
        }
        drop(job_tx);

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task failed");
            }
        }

        let mut reports = Vec::with_capacity(count);
        while let Some(report) = report_rx.recv().await {
            reports.push(report);
        }
        reports.sort_by_key(|(index, _)| *index);

        RunReport {
            jobs: reports.into_iter().map(|(_, report)| report).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeArtifact;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn artifacts(n: usize) -> Vec<Arc<dyn Artifact>> {
        (0..n)
            .map(|i| Arc::new(FakeArtifact::new("fake", &i.to_string())) as Arc<dyn Artifact>)
            .collect()
    }

    #[tokio::test]
    async fn test_every_artifact_runs_once() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let recorder = seen.clone();

        let report = WorkerPool::new(3)
            .run(artifacts(7), move |artifact| {
                let recorder = recorder.clone();
                async move {
                    recorder.lock().push(artifact.metadata().describe());
                    Ok(())
                }
            })
            .await;

        assert!(report.is_success());
        assert_eq!(report.exit_code(), 0);
        let mut seen = seen.lock().clone();
        seen.sort();
        assert_eq!(seen.len(), 7);
        seen.dedup();
        assert_eq!(seen.len(), 7);
        // Reports come back in catalog order.
        let order: Vec<_> = report.jobs.iter().map(|j| j.artifact.clone()).collect();
        assert_eq!(order, (0..7).map(|i| format!("fake:{}", i)).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_failure_is_contained() {
        let report = WorkerPool::new(2)
            .run(artifacts(4), |artifact| async move {
                if artifact.metadata().version == "2" {
                    return Err(DiskError::Other("boom".to_string()));
                }
                Ok(artifact.metadata().version.clone())
            })
            .await;

        assert_eq!(report.exit_code(), 1);
        let failures: Vec<_> = report.failures().map(|j| j.artifact.as_str()).collect();
        assert_eq!(failures, vec!["fake:2"]);
        assert_eq!(report.jobs.iter().filter(|j| j.result.is_ok()).count(), 3);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let report = WorkerPool::new(1)
            .run(artifacts(2), |artifact| async move {
                if artifact.metadata().version == "0" {
                    panic!("job exploded");
                }
                Ok(())
            })
            .await;

        assert_eq!(report.jobs.len(), 2);
        assert!(report.jobs[0].result.is_err());
        assert!(report.jobs[1].result.is_ok());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (running.clone(), peak.clone());

        WorkerPool::new(2)
            .run(artifacts(6), move |_| {
                let (running, peak) = (r.clone(), p.clone());
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_zero_workers_still_runs() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.workers(), 1);
        let report = pool.run(artifacts(1), |_| async { Ok(()) }).await;
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_empty_catalog() {
        let report: RunReport<()> = WorkerPool::new(4).run(Vec::new(), |_| async { Ok(()) }).await;
        assert!(report.jobs.is_empty());
        assert_eq!(report.exit_code(), 0);
    }
}
