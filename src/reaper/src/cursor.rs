//! Lazy, restartable cursor over a bucket's multipart-upload listing.

use crate::retry::{self, RetryConfig};
use common::{ListingToken, ProviderError, StorageClient, UploadDescriptor};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A listing call failed permanently, or exhausted its retries.
#[derive(Debug, Error)]
#[error("listing multipart uploads in bucket '{bucket}' failed: {source}")]
pub struct ListingError {
    pub bucket: String,
    #[source]
    pub source: ProviderError,
}

/// Streams every incomplete upload in one bucket across listing pages.
///
/// Pages are fetched lazily and sequentially; the provider's marker tokens
/// are opaque and ordered, so there is no parallel fetching. Page fetches go
/// through the same retry/backoff policy as abort calls.
pub struct UploadCursor {
    client: Arc<dyn StorageClient>,
    bucket: String,
    retry: RetryConfig,
    call_timeout: Duration,
    buffered: VecDeque<UploadDescriptor>,
    next_token: Option<ListingToken>,
    exhausted: bool,
    pages_fetched: u64,
}

impl UploadCursor {
    /// Cursor over the full listing, from the first page.
    pub fn new(
        client: Arc<dyn StorageClient>,
        bucket: &str,
        retry: RetryConfig,
        call_timeout: Duration,
    ) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            retry,
            call_timeout,
            buffered: VecDeque::new(),
            next_token: None,
            exhausted: false,
            pages_fetched: 0,
        }
    }

    /// Cursor resuming from a token returned by a prior run; yields exactly
    /// the remaining suffix of the listing.
    pub fn resume(
        client: Arc<dyn StorageClient>,
        bucket: &str,
        retry: RetryConfig,
        call_timeout: Duration,
        token: ListingToken,
    ) -> Self {
        let mut cursor = Self::new(client, bucket, retry, call_timeout);
        cursor.next_token = Some(token);
        cursor
    }

    /// Next descriptor, fetching further pages as needed. `Ok(None)` once
    /// the listing is complete.
    pub async fn try_next(&mut self) -> Result<Option<UploadDescriptor>, ListingError> {
        loop {
            if let Some(descriptor) = self.buffered.pop_front() {
                return Ok(Some(descriptor));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fetch_next_page().await?;
        }
    }

    /// Token of the next unfetched page: where a follow-up run should
    /// restart. `None` means either "from the beginning" (nothing fetched
    /// yet) or "nothing left" (listing complete).
    pub fn resume_token(&self) -> Option<&ListingToken> {
        self.next_token.as_ref()
    }

    /// Listing pages fetched so far.
    pub fn pages(&self) -> u64 {
        self.pages_fetched
    }

    async fn fetch_next_page(&mut self) -> Result<(), ListingError> {
        let client = self.client.clone();
        let bucket = self.bucket.clone();
        let token = self.next_token.clone();

        let (result, _retries) = retry::with_retry(&self.retry, self.call_timeout, || {
            client.list_uploads(&bucket, token.as_ref())
        })
        .await;

        match result {
            Ok(page) => {
                self.pages_fetched += 1;
                tracing::debug!(
                    bucket = %self.bucket,
                    page = self.pages_fetched,
                    uploads = page.uploads.len(),
                    more = page.next_token.is_some(),
                    "fetched listing page"
                );
                self.buffered.extend(page.uploads);
                self.exhausted = page.next_token.is_none();
                self.next_token = page.next_token;
                Ok(())
            }
            Err(source) => Err(ListingError {
                bucket: self.bucket.clone(),
                source,
            }),
        }
    }
}
