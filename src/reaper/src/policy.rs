//! Upload eligibility: pure classification of descriptors against a policy.

use chrono::{DateTime, Utc};
use common::UploadDescriptor;
use common::config::PolicyConfig;
use serde::Serialize;
use std::time::Duration;

/// Immutable eligibility policy for one run.
#[derive(Debug, Clone)]
pub struct Policy {
    /// Uploads younger than this are always kept; protects in-flight
    /// uploads from being reaped mid-transfer.
    pub min_age: Duration,
    /// When set, only keys under this prefix are eligible.
    pub key_prefix: Option<String>,
    /// When non-empty, uploads initiated by anyone else are skipped.
    pub owner_allow_list: Vec<String>,
}

impl From<&PolicyConfig> for Policy {
    fn from(config: &PolicyConfig) -> Self {
        Self {
            min_age: config.min_age,
            key_prefix: config.key_prefix.clone(),
            owner_allow_list: config.owner_allow_list.clone(),
        }
    }
}

/// What the reaper does with one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Eligible: abort it.
    Abort,
    /// Too young, or outside the key prefix.
    Keep,
    /// Initiated by an owner outside the allow-list.
    SkipOwned,
}

/// Classify one upload. Deterministic and side-effect-free.
///
/// Rules, in order:
/// 1. initiated after `now - min_age` → [`Decision::Keep`]
/// 2. allow-list set and owner not in it → [`Decision::SkipOwned`]
/// 3. key prefix set and key outside it → [`Decision::Keep`]
/// 4. otherwise → [`Decision::Abort`]
///
/// An upload initiated exactly `min_age` ago is eligible.
pub fn classify(descriptor: &UploadDescriptor, policy: &Policy, now: DateTime<Utc>) -> Decision {
    let min_age = match chrono::Duration::from_std(policy.min_age) {
        Ok(min_age) => min_age,
        // A threshold too large to represent keeps everything.
        Err(_) => return Decision::Keep,
    };

    if descriptor.initiated > now - min_age {
        return Decision::Keep;
    }

    if !policy.owner_allow_list.is_empty() {
        let allowed = descriptor
            .owner
            .as_ref()
            .is_some_and(|owner| policy.owner_allow_list.iter().any(|a| a == owner));
        if !allowed {
            return Decision::SkipOwned;
        }
    }

    if let Some(prefix) = &policy.key_prefix
        && !descriptor.key.starts_with(prefix.as_str())
    {
        return Decision::Keep;
    }

    Decision::Abort
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(initiated: DateTime<Utc>) -> UploadDescriptor {
        UploadDescriptor {
            bucket: "bucket".to_string(),
            key: "data/part-00".to_string(),
            upload_id: "upload-1".to_string(),
            initiated,
            owner: None,
        }
    }

    fn day_policy() -> Policy {
        Policy {
            min_age: Duration::from_secs(24 * 3600),
            key_prefix: None,
            owner_allow_list: Vec::new(),
        }
    }

    #[test]
    fn test_upload_younger_than_threshold_is_kept() {
        let now = Utc::now();
        let d = descriptor(now - chrono::Duration::hours(23));
        assert_eq!(classify(&d, &day_policy(), now), Decision::Keep);
    }

    #[test]
    fn test_upload_exactly_at_threshold_is_eligible() {
        let now = Utc::now();
        let d = descriptor(now - chrono::Duration::hours(24));
        assert_eq!(classify(&d, &day_policy(), now), Decision::Abort);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let now = Utc::now();
        let d = descriptor(now - chrono::Duration::days(3));
        let policy = day_policy();
        assert_eq!(classify(&d, &policy, now), classify(&d, &policy, now));
    }

    #[test]
    fn test_owner_outside_allow_list_is_skipped() {
        let now = Utc::now();
        let mut d = descriptor(now - chrono::Duration::days(3));
        d.owner = Some("intruder".to_string());
        let policy = Policy {
            owner_allow_list: vec!["ci-robot".to_string()],
            ..day_policy()
        };
        assert_eq!(classify(&d, &policy, now), Decision::SkipOwned);
    }

    #[test]
    fn test_missing_owner_with_allow_list_is_skipped() {
        let now = Utc::now();
        let d = descriptor(now - chrono::Duration::days(3));
        let policy = Policy {
            owner_allow_list: vec!["ci-robot".to_string()],
            ..day_policy()
        };
        assert_eq!(classify(&d, &policy, now), Decision::SkipOwned);
    }

    #[test]
    fn test_allowed_owner_is_aborted() {
        let now = Utc::now();
        let mut d = descriptor(now - chrono::Duration::days(3));
        d.owner = Some("ci-robot".to_string());
        let policy = Policy {
            owner_allow_list: vec!["ci-robot".to_string()],
            ..day_policy()
        };
        assert_eq!(classify(&d, &policy, now), Decision::Abort);
    }

    #[test]
    fn test_key_outside_prefix_is_kept() {
        let now = Utc::now();
        let d = descriptor(now - chrono::Duration::days(3));
        let policy = Policy {
            key_prefix: Some("tmp/".to_string()),
            ..day_policy()
        };
        assert_eq!(classify(&d, &policy, now), Decision::Keep);
    }

    #[test]
    fn test_owner_check_precedes_prefix_check() {
        let now = Utc::now();
        let d = descriptor(now - chrono::Duration::days(3));
        let policy = Policy {
            key_prefix: Some("tmp/".to_string()),
            owner_allow_list: vec!["ci-robot".to_string()],
            ..day_policy()
        };
        assert_eq!(classify(&d, &policy, now), Decision::SkipOwned);
    }

    #[test]
    fn test_age_check_precedes_everything() {
        let now = Utc::now();
        let mut d = descriptor(now - chrono::Duration::hours(1));
        d.owner = Some("intruder".to_string());
        let policy = Policy {
            owner_allow_list: vec!["ci-robot".to_string()],
            ..day_policy()
        };
        assert_eq!(classify(&d, &policy, now), Decision::Keep);
    }
}
