//! Result records and the final reconciliation report.

use crate::policy::Decision;
use chrono::{DateTime, Utc};
use common::{ListingToken, Target, UploadDescriptor};
use serde::Serialize;

/// Terminal result of processing one upload marked for abort.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortResult {
    /// Aborted on the first attempt. `already_gone` marks the benign race
    /// with a completing (or concurrently aborted) upload.
    Success { already_gone: bool },
    /// Aborted after transient failures.
    Retried { count: u32 },
    /// Abort failed permanently or exhausted its retries.
    Failed { reason: String },
    /// Never attempted (cancellation, or an abandoned bucket).
    Skipped { reason: String },
}

impl AbortResult {
    pub fn is_failure(&self) -> bool {
        matches!(self, AbortResult::Failed { .. })
    }
}

/// One processed upload: what was decided and what happened.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub descriptor: UploadDescriptor,
    pub decision: Decision,
    /// `None` when no abort applies (Keep / SkipOwned decisions).
    pub result: Option<AbortResult>,
}

/// Bucket reaper lifecycle. Only `Done` and `Failed` are terminal; the
/// others appear in transition logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaperState {
    Listing,
    Classifying,
    Aborting,
    Done,
    Failed,
}

/// Everything one bucket's reaper produced.
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub target: Target,
    pub state: ReaperState,
    pub outcomes: Vec<Outcome>,
    /// The listing error that moved the reaper to `Failed`.
    pub error: Option<String>,
    /// Where a follow-up run should resume listing, when known.
    pub resume_token: Option<ListingToken>,
    /// Whether cancellation cut this bucket short.
    pub cancelled: bool,
}

/// A target that failed before its reaper could start.
#[derive(Debug, Clone, Serialize)]
pub struct TargetFailure {
    pub profile: String,
    pub region: Option<String>,
    /// `None` when the whole profile failed (authentication or discovery).
    pub bucket: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub aborted: usize,
    pub kept: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Final reconciliation report. Built once, immutable afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub dry_run: bool,
    pub targets: Vec<TargetReport>,
    pub failed_targets: Vec<TargetFailure>,
    pub totals: Totals,
}

impl Report {
    /// Merge per-bucket outcome lists into the final report.
    pub fn build(
        run_id: String,
        started_at: DateTime<Utc>,
        dry_run: bool,
        targets: Vec<TargetReport>,
        failed_targets: Vec<TargetFailure>,
    ) -> Self {
        let mut totals = Totals::default();
        for outcome in targets.iter().flat_map(|t| &t.outcomes) {
            match (outcome.decision, &outcome.result) {
                (Decision::Keep, _) => totals.kept += 1,
                (Decision::SkipOwned, _) => totals.skipped += 1,
                (
                    Decision::Abort,
                    Some(AbortResult::Success { .. } | AbortResult::Retried { .. }),
                ) => totals.aborted += 1,
                (Decision::Abort, Some(AbortResult::Failed { .. })) => totals.failed += 1,
                (Decision::Abort, Some(AbortResult::Skipped { .. }) | None) => totals.skipped += 1,
            }
        }

        Self {
            run_id,
            started_at,
            completed_at: Utc::now(),
            dry_run,
            targets,
            failed_targets,
            totals,
        }
    }

    /// Whether every target completed and every abort landed.
    pub fn is_clean(&self) -> bool {
        self.totals.failed == 0
            && self.failed_targets.is_empty()
            && self.targets.iter().all(|t| t.state != ReaperState::Failed)
    }

    pub fn log_summary(&self) {
        tracing::info!(
            run_id = %self.run_id,
            dry_run = self.dry_run,
            targets = self.targets.len(),
            failed_targets = self.failed_targets.len(),
            aborted = self.totals.aborted,
            kept = self.totals.kept,
            skipped = self.totals.skipped,
            failed = self.totals.failed,
            duration_ms = (self.completed_at - self.started_at).num_milliseconds(),
            "reap run complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str) -> UploadDescriptor {
        UploadDescriptor {
            bucket: "b".to_string(),
            key: format!("key-{id}"),
            upload_id: id.to_string(),
            initiated: Utc::now(),
            owner: None,
        }
    }

    fn outcome(id: &str, decision: Decision, result: Option<AbortResult>) -> Outcome {
        Outcome {
            descriptor: descriptor(id),
            decision,
            result,
        }
    }

    fn target_report(outcomes: Vec<Outcome>, state: ReaperState) -> TargetReport {
        TargetReport {
            target: Target::new("prod", None, "b"),
            state,
            outcomes,
            error: None,
            resume_token: None,
            cancelled: false,
        }
    }

    #[test]
    fn test_totals_cover_every_outcome_shape() {
        let outcomes = vec![
            outcome("1", Decision::Keep, None),
            outcome("2", Decision::SkipOwned, None),
            outcome(
                "3",
                Decision::Abort,
                Some(AbortResult::Success {
                    already_gone: false,
                }),
            ),
            outcome(
                "4",
                Decision::Abort,
                Some(AbortResult::Success { already_gone: true }),
            ),
            outcome("5", Decision::Abort, Some(AbortResult::Retried { count: 2 })),
            outcome(
                "6",
                Decision::Abort,
                Some(AbortResult::Failed {
                    reason: "denied".to_string(),
                }),
            ),
            outcome(
                "7",
                Decision::Abort,
                Some(AbortResult::Skipped {
                    reason: "cancelled".to_string(),
                }),
            ),
        ];
        let report = Report::build(
            "run".to_string(),
            Utc::now(),
            false,
            vec![target_report(outcomes, ReaperState::Done)],
            Vec::new(),
        );

        assert_eq!(report.totals.kept, 1);
        assert_eq!(report.totals.aborted, 3, "already-gone counts as aborted");
        assert_eq!(report.totals.failed, 1);
        assert_eq!(report.totals.skipped, 2);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_clean_report() {
        let report = Report::build(
            "run".to_string(),
            Utc::now(),
            true,
            vec![target_report(
                vec![outcome(
                    "1",
                    Decision::Abort,
                    Some(AbortResult::Success {
                        already_gone: false,
                    }),
                )],
                ReaperState::Done,
            )],
            Vec::new(),
        );
        assert!(report.is_clean());
    }

    #[test]
    fn test_target_failure_makes_report_unclean() {
        let report = Report::build(
            "run".to_string(),
            Utc::now(),
            false,
            Vec::new(),
            vec![TargetFailure {
                profile: "prod".to_string(),
                region: None,
                bucket: None,
                error: "authentication failed".to_string(),
            }],
        );
        assert!(!report.is_clean());
    }

    #[test]
    fn test_failed_bucket_makes_report_unclean() {
        let report = Report::build(
            "run".to_string(),
            Utc::now(),
            false,
            vec![target_report(Vec::new(), ReaperState::Failed)],
            Vec::new(),
        );
        assert!(!report.is_clean());
    }

    #[test]
    fn test_report_serializes_to_json() {
        let report = Report::build(
            "run".to_string(),
            Utc::now(),
            true,
            vec![target_report(
                vec![outcome("1", Decision::Keep, None)],
                ReaperState::Done,
            )],
            Vec::new(),
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["totals"]["kept"], 1);
        assert_eq!(json["targets"][0]["state"], "done");
    }
}
