//! Bounded-concurrency abort execution with per-item outcome capture.

use crate::metrics::ReaperMetrics;
use crate::policy::Decision;
use crate::report::{AbortResult, Outcome};
use crate::retry::{self, RetryConfig};
use common::config::ReaperConfig;
use common::{ProviderError, StorageClient, UploadDescriptor};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Execution knobs for one bucket's abort pool.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Concurrent abort calls within one bucket. Each abort targets a
    /// distinct upload id, so no ordering is needed between them.
    pub workers: usize,
    /// Deadline for a single provider call.
    pub call_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            call_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

impl From<&ReaperConfig> for ExecutorConfig {
    fn from(config: &ReaperConfig) -> Self {
        Self {
            workers: config.abort_workers,
            call_timeout: config.call_timeout,
            retry: RetryConfig::from(config),
        }
    }
}

/// Issues abort calls for one bucket through a bounded worker pool.
pub struct AbortExecutor {
    client: Arc<dyn StorageClient>,
    config: ExecutorConfig,
    dry_run: bool,
    metrics: ReaperMetrics,
}

impl AbortExecutor {
    pub fn new(
        client: Arc<dyn StorageClient>,
        config: ExecutorConfig,
        dry_run: bool,
        metrics: ReaperMetrics,
    ) -> Self {
        Self {
            client,
            config,
            dry_run,
            metrics,
        }
    }

    /// Abort every descriptor with at most `workers` calls in flight.
    ///
    /// Cancellation is checked between dispatches: in-flight aborts run to
    /// completion, undispatched descriptors come back `Skipped`. Every
    /// descriptor passed in is present in the returned outcomes.
    pub async fn abort_all(
        &self,
        descriptors: Vec<UploadDescriptor>,
        cancel: &CancellationToken,
    ) -> Vec<Outcome> {
        let mut outcomes = Vec::with_capacity(descriptors.len());
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut tasks: JoinSet<Outcome> = JoinSet::new();
        let mut queue = VecDeque::from(descriptors);

        while let Some(descriptor) = queue.pop_front() {
            if cancel.is_cancelled() {
                outcomes.push(skipped(descriptor));
                continue;
            }

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                outcomes.push(skipped(descriptor));
                continue;
            };

            let client = self.client.clone();
            let config = self.config.clone();
            let dry_run = self.dry_run;
            let metrics = self.metrics.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let result = abort_one(client.as_ref(), &config, dry_run, &descriptor, &metrics).await;
                Outcome {
                    descriptor,
                    decision: Decision::Abort,
                    result: Some(result),
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!(error = %e, "abort task panicked"),
            }
        }

        outcomes
    }
}

fn skipped(descriptor: UploadDescriptor) -> Outcome {
    Outcome {
        descriptor,
        decision: Decision::Abort,
        result: Some(AbortResult::Skipped {
            reason: "cancelled".to_string(),
        }),
    }
}

async fn abort_one(
    client: &dyn StorageClient,
    config: &ExecutorConfig,
    dry_run: bool,
    descriptor: &UploadDescriptor,
    metrics: &ReaperMetrics,
) -> AbortResult {
    metrics.record_abort_attempt();

    if dry_run {
        tracing::info!(
            bucket = %descriptor.bucket,
            key = %descriptor.key,
            upload_id = %descriptor.upload_id,
            initiated = %descriptor.initiated.to_rfc3339(),
            "[DRY-RUN] would abort multipart upload"
        );
        metrics.record_abort_success();
        return AbortResult::Success {
            already_gone: false,
        };
    }

    let (result, retries) = retry::with_retry(&config.retry, config.call_timeout, || {
        client.abort_upload(&descriptor.bucket, &descriptor.key, &descriptor.upload_id)
    })
    .await;
    metrics.record_retries(retries);

    match result {
        Ok(()) => {
            tracing::info!(
                bucket = %descriptor.bucket,
                key = %descriptor.key,
                upload_id = %descriptor.upload_id,
                retries,
                "aborted multipart upload"
            );
            metrics.record_abort_success();
            if retries > 0 {
                AbortResult::Retried { count: retries }
            } else {
                AbortResult::Success {
                    already_gone: false,
                }
            }
        }
        Err(ProviderError::NotFound) => {
            // Another janitor got there first, or the upload completed.
            tracing::info!(
                bucket = %descriptor.bucket,
                key = %descriptor.key,
                upload_id = %descriptor.upload_id,
                "upload already gone"
            );
            metrics.record_already_gone();
            metrics.record_abort_success();
            AbortResult::Success { already_gone: true }
        }
        Err(err) => {
            tracing::error!(
                bucket = %descriptor.bucket,
                key = %descriptor.key,
                upload_id = %descriptor.upload_id,
                error = %err,
                "failed to abort multipart upload"
            );
            metrics.record_abort_failure();
            AbortResult::Failed {
                reason: err.to_string(),
            }
        }
    }
}
