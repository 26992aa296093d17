//! Core domain records shared between the provider boundary and the reaper.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single (profile, region, bucket) tuple to be reaped.
///
/// Targets are resolved before a run starts and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// Named credential profile the bucket is reached through.
    pub profile: String,
    /// Region override; `None` lets the profile's default apply.
    pub region: Option<String>,
    /// Bucket name.
    pub bucket: String,
}

impl Target {
    pub fn new(
        profile: impl Into<String>,
        region: Option<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            profile: profile.into(),
            region,
            bucket: bucket.into(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.profile, self.bucket)
    }
}

/// One incomplete multipart upload as reported by the provider listing.
///
/// Produced by the pagination cursor and read-only downstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadDescriptor {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    /// When the upload was initiated, per the provider.
    pub initiated: DateTime<Utc>,
    /// Initiator/owner identity, when the provider reports one.
    pub owner: Option<String>,
}
