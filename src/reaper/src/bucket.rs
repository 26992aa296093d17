//! Per-bucket reap orchestration: cursor → classifier → executor.

use crate::cursor::UploadCursor;
use crate::executor::{AbortExecutor, ExecutorConfig};
use crate::metrics::ReaperMetrics;
use crate::policy::{Decision, Policy, classify};
use crate::report::{AbortResult, Outcome, ReaperState, TargetReport};
use chrono::Utc;
use common::{ListingToken, StorageClient, Target, UploadDescriptor};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Prior-run state for idempotent resumption.
///
/// A reaper given this state never re-aborts an upload a prior run already
/// recorded as successful, and resumes listing from where the prior run
/// stopped instead of the first page.
#[derive(Debug, Clone, Default)]
pub struct ResumeState {
    /// (key, upload id) pairs aborted successfully by a prior run.
    pub completed: HashSet<(String, String)>,
    /// Listing position the prior run reached.
    pub listing_token: Option<ListingToken>,
}

impl ResumeState {
    /// Collect resumption state from a prior run's report for this bucket.
    pub fn from_prior(report: &TargetReport) -> Self {
        let completed = report
            .outcomes
            .iter()
            .filter(|o| {
                o.decision == Decision::Abort
                    && matches!(
                        o.result,
                        Some(AbortResult::Success { .. } | AbortResult::Retried { .. })
                    )
            })
            .map(|o| (o.descriptor.key.clone(), o.descriptor.upload_id.clone()))
            .collect();
        Self {
            completed,
            listing_token: report.resume_token.clone(),
        }
    }
}

/// Reaps one bucket: Listing → Classifying → Aborting → Done, with Failed
/// as the terminal state for an unrecoverable listing error.
///
/// Never returns an error: every failure lands in the returned
/// [`TargetReport`], so one bucket's trouble cannot stop the fleet.
pub struct BucketReaper {
    client: Arc<dyn StorageClient>,
    policy: Policy,
    config: ExecutorConfig,
    dry_run: bool,
    metrics: ReaperMetrics,
}

impl BucketReaper {
    pub fn new(
        client: Arc<dyn StorageClient>,
        policy: Policy,
        config: ExecutorConfig,
        dry_run: bool,
        metrics: ReaperMetrics,
    ) -> Self {
        Self {
            client,
            policy,
            config,
            dry_run,
            metrics,
        }
    }

    pub async fn reap(
        &self,
        target: &Target,
        resume: Option<ResumeState>,
        cancel: &CancellationToken,
    ) -> TargetReport {
        self.metrics.record_bucket_start();
        let resume = resume.unwrap_or_default();

        let mut state = ReaperState::Listing;
        tracing::debug!(target = %target, state = ?state, "reaping bucket");

        let mut cursor = match resume.listing_token.clone() {
            Some(token) => UploadCursor::resume(
                self.client.clone(),
                &target.bucket,
                self.config.retry.clone(),
                self.config.call_timeout,
                token,
            ),
            None => UploadCursor::new(
                self.client.clone(),
                &target.bucket,
                self.config.retry.clone(),
                self.config.call_timeout,
            ),
        };

        // Phase 1: drain the listing. Sequential by contract: resume tokens
        // are opaque and ordered.
        let mut descriptors: Vec<UploadDescriptor> = Vec::new();
        let mut cancelled = false;
        loop {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            match cursor.try_next().await {
                Ok(Some(descriptor)) => {
                    self.metrics.record_upload_listed();
                    descriptors.push(descriptor);
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::error!(
                        target = %target,
                        error = %err,
                        "listing failed, abandoning bucket"
                    );
                    self.metrics.record_bucket_failure();
                    // Descriptors already yielded still have to show up in
                    // the report; none of them were attempted.
                    let outcomes =
                        self.classify_all(descriptors, &resume, Some("listing failed"));
                    return TargetReport {
                        target: target.clone(),
                        state: ReaperState::Failed,
                        outcomes,
                        error: Some(err.to_string()),
                        resume_token: cursor.resume_token().cloned(),
                        cancelled: false,
                    };
                }
            }
        }

        state = ReaperState::Classifying;
        tracing::debug!(
            target = %target,
            state = ?state,
            listed = descriptors.len(),
            pages = cursor.pages(),
            "classifying uploads"
        );

        let now = Utc::now();
        let mut outcomes = Vec::new();
        let mut to_abort = Vec::new();
        for descriptor in descriptors {
            if resume
                .completed
                .contains(&(descriptor.key.clone(), descriptor.upload_id.clone()))
            {
                tracing::debug!(
                    target = %target,
                    key = %descriptor.key,
                    upload_id = %descriptor.upload_id,
                    "already aborted in a prior run"
                );
                continue;
            }
            match classify(&descriptor, &self.policy, now) {
                Decision::Abort => to_abort.push(descriptor),
                decision => outcomes.push(Outcome {
                    descriptor,
                    decision,
                    result: None,
                }),
            }
        }

        state = ReaperState::Aborting;
        tracing::debug!(
            target = %target,
            state = ?state,
            eligible = to_abort.len(),
            "aborting eligible uploads"
        );

        let executor = AbortExecutor::new(
            self.client.clone(),
            self.config.clone(),
            self.dry_run,
            self.metrics.clone(),
        );
        outcomes.extend(executor.abort_all(to_abort, cancel).await);
        cancelled = cancelled || cancel.is_cancelled();

        state = ReaperState::Done;
        self.metrics.record_bucket_complete();
        tracing::info!(
            target = %target,
            state = ?state,
            outcomes = outcomes.len(),
            cancelled,
            "bucket reap complete"
        );

        TargetReport {
            target: target.clone(),
            state,
            outcomes,
            error: None,
            resume_token: cursor.resume_token().cloned(),
            cancelled,
        }
    }

    /// Classify descriptors without executing anything; abort-eligible ones
    /// are marked skipped with `skip_reason`.
    fn classify_all(
        &self,
        descriptors: Vec<UploadDescriptor>,
        resume: &ResumeState,
        skip_reason: Option<&str>,
    ) -> Vec<Outcome> {
        let now = Utc::now();
        let mut outcomes = Vec::new();
        for descriptor in descriptors {
            if resume
                .completed
                .contains(&(descriptor.key.clone(), descriptor.upload_id.clone()))
            {
                continue;
            }
            match classify(&descriptor, &self.policy, now) {
                Decision::Abort => outcomes.push(Outcome {
                    descriptor,
                    decision: Decision::Abort,
                    result: skip_reason.map(|reason| AbortResult::Skipped {
                        reason: reason.to_string(),
                    }),
                }),
                decision => outcomes.push(Outcome {
                    descriptor,
                    decision,
                    result: None,
                }),
            }
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::ProviderError;
    use common::testing::FakeStorageClient;
    use std::time::Duration;

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            workers: 2,
            call_timeout: Duration::from_secs(1),
            retry: crate::retry::RetryConfig {
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                ..Default::default()
            },
        }
    }

    fn day_policy() -> Policy {
        Policy {
            min_age: Duration::from_secs(24 * 3600),
            key_prefix: None,
            owner_allow_list: Vec::new(),
        }
    }

    fn reaper(client: Arc<FakeStorageClient>) -> BucketReaper {
        BucketReaper::new(client, day_policy(), fast_config(), false, ReaperMetrics::new())
    }

    fn target() -> Target {
        Target::new("prod", None, "b")
    }

    #[tokio::test]
    async fn test_reap_aborts_old_and_keeps_young() {
        let client = Arc::new(FakeStorageClient::new());
        let old = Utc::now() - chrono::Duration::days(7);
        let young = Utc::now() - chrono::Duration::hours(1);
        client.seed_upload("b", "old-key", "old-id", old, None);
        client.seed_upload("b", "young-key", "young-id", young, None);

        let report = reaper(client.clone())
            .reap(&target(), None, &CancellationToken::new())
            .await;

        assert_eq!(report.state, ReaperState::Done);
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(client.aborted_ids(), vec!["old-id".to_string()]);
        let young_outcome = report
            .outcomes
            .iter()
            .find(|o| o.descriptor.upload_id == "young-id")
            .unwrap();
        assert_eq!(young_outcome.decision, Decision::Keep);
        assert!(young_outcome.result.is_none());
    }

    #[tokio::test]
    async fn test_transient_listing_failures_do_not_fail_the_bucket() {
        let client = Arc::new(FakeStorageClient::new());
        let old = Utc::now() - chrono::Duration::days(7);
        client.seed_upload("b", "key", "id-1", old, None);
        client.fail_next_listings(
            "b",
            vec![
                ProviderError::Transient("one".to_string()),
                ProviderError::Transient("two".to_string()),
            ],
        );

        let report = reaper(client.clone())
            .reap(&target(), None, &CancellationToken::new())
            .await;

        assert_eq!(report.state, ReaperState::Done);
        assert!(report.error.is_none());
        assert_eq!(client.aborted_ids(), vec!["id-1".to_string()]);
    }

    #[tokio::test]
    async fn test_exhausted_listing_marks_bucket_failed() {
        let client = Arc::new(FakeStorageClient::new());
        let old = Utc::now() - chrono::Duration::days(7);
        client.seed_upload("b", "key", "id-1", old, None);
        client.fail_next_listings(
            "b",
            vec![ProviderError::Transient("down".to_string()); 3],
        );

        let report = reaper(client.clone())
            .reap(&target(), None, &CancellationToken::new())
            .await;

        assert_eq!(report.state, ReaperState::Failed);
        assert!(report.error.is_some());
        assert!(client.aborted_ids().is_empty());
    }

    #[tokio::test]
    async fn test_listing_failure_mid_way_accounts_for_yielded_descriptors() {
        let client = Arc::new(FakeStorageClient::new());
        let old = Utc::now() - chrono::Duration::days(7);
        for i in 0..4 {
            client.seed_upload("b", &format!("key-{i}"), &format!("id-{i}"), old, None);
        }
        client.set_page_size(2);
        // First page succeeds, second page fails permanently.
        client.fail_listing_call("b", 2, ProviderError::Other("broken".to_string()));

        let report = reaper(client.clone())
            .reap(&target(), None, &CancellationToken::new())
            .await;

        assert_eq!(report.state, ReaperState::Failed);
        assert!(client.aborted_ids().is_empty());
        // The two descriptors from the first page still show up, never
        // attempted.
        assert_eq!(report.outcomes.len(), 2);
        assert!(report.outcomes.iter().all(|o| matches!(
            o.result,
            Some(AbortResult::Skipped { .. })
        )));
        assert!(report.resume_token.is_some());
    }

    #[tokio::test]
    async fn test_resume_never_reaborts_completed_uploads() {
        let old = Utc::now() - chrono::Duration::days(7);

        // First run against one provider state.
        let first = Arc::new(FakeStorageClient::new());
        first.seed_upload("b", "key-a", "id-a", old, None);
        first.seed_upload("b", "key-b", "id-b", old, None);
        let first_report = reaper(first.clone())
            .reap(&target(), None, &CancellationToken::new())
            .await;
        assert_eq!(first.aborted_ids().len(), 2);

        // Second run against a provider that, due to listing lag, still
        // reports both uploads. The resume state must prevent re-aborts.
        let second = Arc::new(FakeStorageClient::new());
        second.seed_upload("b", "key-a", "id-a", old, None);
        second.seed_upload("b", "key-b", "id-b", old, None);
        let resume = ResumeState::from_prior(&first_report);
        let second_report = reaper(second.clone())
            .reap(&target(), Some(resume), &CancellationToken::new())
            .await;

        assert_eq!(second.abort_calls("id-a"), 0);
        assert_eq!(second.abort_calls("id-b"), 0);
        assert!(second_report.outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_second_run_sees_not_found_as_success() {
        let old = Utc::now() - chrono::Duration::days(7);
        let client = Arc::new(FakeStorageClient::new());
        client.seed_upload("b", "key", "id-1", old, None);
        // Simulate a concurrent janitor winning the race.
        client.fail_next_aborts("id-1", vec![ProviderError::NotFound]);

        let report = reaper(client)
            .reap(&target(), None, &CancellationToken::new())
            .await;

        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(
            report.outcomes[0].result,
            Some(AbortResult::Success { already_gone: true })
        );
    }

    #[tokio::test]
    async fn test_pre_cancelled_reap_yields_nothing() {
        let client = Arc::new(FakeStorageClient::new());
        let old = Utc::now() - chrono::Duration::days(7);
        client.seed_upload("b", "key", "id-1", old, None);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = reaper(client.clone()).reap(&target(), None, &cancel).await;

        assert_eq!(report.state, ReaperState::Done);
        assert!(report.cancelled);
        assert!(report.outcomes.is_empty());
        assert!(client.aborted_ids().is_empty());
    }
}
