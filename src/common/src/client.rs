//! Storage provider boundary: the listing/abort calls the reaper consumes.
//!
//! The trait deliberately stays close to the provider wire model (marker
//! pagination, per-call errors) so the reaper core owns all retry,
//! concurrency, and classification behavior.

use crate::model::UploadDescriptor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a storage provider call.
///
/// Transient variants are eligible for retry with backoff; permanent
/// variants are not. Not-found is its own variant because an abort racing
/// another janitor (or a completing upload) is a benign outcome, not a
/// failure.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Throttling, connection resets, 5xx responses.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// The per-call deadline elapsed before the provider answered.
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    /// The upload no longer exists (completed or already aborted).
    #[error("upload not found")]
    NotFound,

    /// The credentials are not permitted to perform the call.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Anything the taxonomy does not cover; never retried.
    #[error("provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Whether the retry/backoff path applies.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_) | ProviderError::Timeout(_))
    }
}

/// Target-level failures raised before a bucket's reaper starts.
#[derive(Debug, Clone, Error)]
pub enum TargetError {
    #[error("authentication failed for profile '{profile}': {message}")]
    Authentication { profile: String, message: String },

    #[error("bucket discovery failed for profile '{profile}': {message}")]
    Discovery { profile: String, message: String },
}

/// Opaque resumption token marking a position in a paginated listing.
///
/// Tokens are ordered by the provider; resuming from one yields exactly the
/// remaining suffix of the listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingToken {
    pub key_marker: String,
    pub upload_id_marker: String,
}

/// One bounded page of a multipart-upload listing.
#[derive(Debug, Clone, Default)]
pub struct UploadPage {
    pub uploads: Vec<UploadDescriptor>,
    /// Present when the provider has more data after this page.
    pub next_token: Option<ListingToken>,
}

/// Raw provider calls consumed by the pagination cursor and the executor.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Fetch one listing page, starting from `token` when supplied.
    async fn list_uploads(
        &self,
        bucket: &str,
        token: Option<&ListingToken>,
    ) -> Result<UploadPage, ProviderError>;

    /// Abort one multipart upload.
    async fn abort_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), ProviderError>;

    /// Enumerate the buckets visible to this client's credentials.
    async fn list_buckets(&self) -> Result<Vec<String>, ProviderError>;
}

/// Resolves a (profile, region) pair to a ready-to-use client.
///
/// Credential failures surface here, before any bucket work starts.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn client_for(
        &self,
        profile: &str,
        region: Option<&str>,
    ) -> Result<Arc<dyn StorageClient>, TargetError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::Transient("slow down".to_string()).is_transient());
        assert!(ProviderError::Timeout(Duration::from_secs(30)).is_transient());
        assert!(!ProviderError::NotFound.is_transient());
        assert!(!ProviderError::AccessDenied("denied".to_string()).is_transient());
        assert!(!ProviderError::Other("boom".to_string()).is_transient());
    }

    #[test]
    fn test_listing_token_round_trips_through_serde() {
        let token = ListingToken {
            key_marker: "logs/2024/part-07".to_string(),
            upload_id_marker: "upload-123".to_string(),
        };
        let json = serde_json::to_string(&token).unwrap();
        let back: ListingToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
    }
}
