//! Fans bucket reapers across the full (profile × bucket) target set.

use crate::bucket::BucketReaper;
use crate::executor::ExecutorConfig;
use crate::metrics::ReaperMetrics;
use crate::policy::Policy;
use crate::report::{Report, TargetFailure, TargetReport};
use chrono::Utc;
use common::config::{ReaperConfig, TargetConfig};
use common::{ClientFactory, Target, TargetError};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// One profile worth of buckets to reap.
#[derive(Debug, Clone)]
pub struct TargetSpec {
    pub profile: String,
    pub region: Option<String>,
    /// Explicit bucket list; empty means "discover every visible bucket".
    pub buckets: Vec<String>,
}

impl From<&TargetConfig> for TargetSpec {
    fn from(config: &TargetConfig) -> Self {
        Self {
            profile: config.profile.clone(),
            region: config.region.clone(),
            buckets: config.buckets.clone(),
        }
    }
}

/// Fleet-level knobs, distinct from the per-bucket executor width.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Concurrent bucket reapers across all profiles, bounding total
    /// simultaneous provider connections.
    pub global_parallelism: usize,
    pub dry_run: bool,
    pub executor: ExecutorConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            global_parallelism: 8,
            dry_run: true,
            executor: ExecutorConfig::default(),
        }
    }
}

impl From<&ReaperConfig> for FleetConfig {
    fn from(config: &ReaperConfig) -> Self {
        Self {
            global_parallelism: config.global_parallelism,
            dry_run: config.dry_run,
            executor: ExecutorConfig::from(config),
        }
    }
}

/// Runs the whole fleet and merges everything into one [`Report`].
pub struct FleetCoordinator {
    factory: Arc<dyn ClientFactory>,
    policy: Policy,
    config: FleetConfig,
    metrics: ReaperMetrics,
}

impl FleetCoordinator {
    pub fn new(factory: Arc<dyn ClientFactory>, policy: Policy, config: FleetConfig) -> Self {
        Self {
            factory,
            policy,
            config,
            metrics: ReaperMetrics::new(),
        }
    }

    pub fn metrics(&self) -> &ReaperMetrics {
        &self.metrics
    }

    /// Reap every target. Always produces a report: authentication and
    /// discovery failures become zero-outcome failed targets, and one
    /// bucket's failure never blocks another's processing.
    pub async fn run(&self, specs: Vec<TargetSpec>, cancel: CancellationToken) -> Report {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        tracing::info!(
            run_id = %run_id,
            profiles = specs.len(),
            dry_run = self.config.dry_run,
            min_age = %humantime::format_duration(self.policy.min_age),
            "starting reap run"
        );

        let mut failed_targets = Vec::new();
        let mut work: Vec<(Target, Arc<dyn common::StorageClient>)> = Vec::new();

        for spec in &specs {
            let client = match self
                .factory
                .client_for(&spec.profile, spec.region.as_deref())
                .await
            {
                Ok(client) => client,
                Err(err) => {
                    tracing::warn!(profile = %spec.profile, error = %err, "target resolution failed");
                    failed_targets.push(TargetFailure {
                        profile: spec.profile.clone(),
                        region: spec.region.clone(),
                        bucket: None,
                        error: err.to_string(),
                    });
                    continue;
                }
            };

            let buckets = if spec.buckets.is_empty() {
                match client.list_buckets().await {
                    Ok(buckets) => {
                        tracing::info!(
                            profile = %spec.profile,
                            buckets = buckets.len(),
                            "discovered buckets"
                        );
                        buckets
                    }
                    Err(err) => {
                        let err = TargetError::Discovery {
                            profile: spec.profile.clone(),
                            message: err.to_string(),
                        };
                        tracing::warn!(profile = %spec.profile, error = %err, "target resolution failed");
                        failed_targets.push(TargetFailure {
                            profile: spec.profile.clone(),
                            region: spec.region.clone(),
                            bucket: None,
                            error: err.to_string(),
                        });
                        continue;
                    }
                }
            } else {
                spec.buckets.clone()
            };

            for bucket in buckets {
                work.push((
                    Target::new(spec.profile.clone(), spec.region.clone(), bucket),
                    client.clone(),
                ));
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.config.global_parallelism.max(1)));
        let mut tasks: JoinSet<TargetReport> = JoinSet::new();
        for (target, client) in work {
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let reaper = BucketReaper::new(
                client,
                self.policy.clone(),
                self.config.executor.clone(),
                self.config.dry_run,
                self.metrics.clone(),
            );
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                reaper.reap(&target, None, &cancel).await
            });
        }

        let mut targets = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => targets.push(report),
                Err(e) => tracing::error!(error = %e, "bucket reaper task panicked"),
            }
        }
        targets.sort_by(|a, b| {
            (&a.target.profile, &a.target.bucket).cmp(&(&b.target.profile, &b.target.bucket))
        });

        let report = Report::build(run_id, started_at, self.config.dry_run, targets, failed_targets);
        report.log_summary();
        self.metrics.summary().log();
        report
    }
}

/// Single entry point: reap `specs` under `policy` and return the report.
pub async fn run(
    factory: Arc<dyn ClientFactory>,
    specs: Vec<TargetSpec>,
    policy: Policy,
    config: FleetConfig,
    cancel: CancellationToken,
) -> Report {
    FleetCoordinator::new(factory, policy, config).run(specs, cancel).await
}
