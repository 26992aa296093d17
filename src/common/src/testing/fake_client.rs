//! Scriptable in-memory storage client.

use crate::client::{
    ClientFactory, ListingToken, ProviderError, StorageClient, TargetError, UploadPage,
};
use crate::model::UploadDescriptor;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct FakeState {
    uploads: Vec<UploadDescriptor>,
    aborted: HashSet<String>,
    page_size: usize,
    listing_failures: HashMap<String, VecDeque<ProviderError>>,
    listing_failures_at: HashMap<(String, u32), ProviderError>,
    listing_calls: HashMap<String, u32>,
    abort_failures: HashMap<String, VecDeque<ProviderError>>,
    bucket_listing_failures: VecDeque<ProviderError>,
    abort_calls: HashMap<String, u32>,
    abort_delay: Option<Duration>,
}

/// In-memory [`StorageClient`] with fault injection.
///
/// Uploads are listed in (key, upload id) order, `page_size` at a time, with
/// marker tokens exactly like the real provider. Aborted uploads disappear
/// from subsequent listings; aborting an unknown or already-aborted upload
/// returns [`ProviderError::NotFound`].
pub struct FakeStorageClient {
    state: Mutex<FakeState>,
    inflight_aborts: AtomicUsize,
    max_inflight_aborts: AtomicUsize,
}

impl Default for FakeStorageClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeStorageClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                page_size: 1000,
                ..Default::default()
            }),
            inflight_aborts: AtomicUsize::new(0),
            max_inflight_aborts: AtomicUsize::new(0),
        }
    }

    /// Seed one incomplete upload.
    pub fn seed_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        initiated: DateTime<Utc>,
        owner: Option<&str>,
    ) {
        let mut state = self.state.lock().unwrap();
        state.uploads.push(UploadDescriptor {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            initiated,
            owner: owner.map(str::to_string),
        });
    }

    /// Force listings to return at most `page_size` uploads per page.
    pub fn set_page_size(&self, page_size: usize) {
        self.state.lock().unwrap().page_size = page_size.max(1);
    }

    /// Queue errors returned by the next listing calls for `bucket`, in
    /// order, before normal behavior resumes.
    pub fn fail_next_listings(&self, bucket: &str, errors: Vec<ProviderError>) {
        self.state
            .lock()
            .unwrap()
            .listing_failures
            .entry(bucket.to_string())
            .or_default()
            .extend(errors);
    }

    /// Fail the nth listing call (1-based) for `bucket` with `error`,
    /// leaving every other call untouched.
    pub fn fail_listing_call(&self, bucket: &str, call: u32, error: ProviderError) {
        self.state
            .lock()
            .unwrap()
            .listing_failures_at
            .insert((bucket.to_string(), call), error);
    }

    /// Queue errors returned by the next abort calls for `upload_id`.
    pub fn fail_next_aborts(&self, upload_id: &str, errors: Vec<ProviderError>) {
        self.state
            .lock()
            .unwrap()
            .abort_failures
            .entry(upload_id.to_string())
            .or_default()
            .extend(errors);
    }

    /// Queue errors returned by the next bucket-enumeration calls.
    pub fn fail_next_bucket_listings(&self, errors: Vec<ProviderError>) {
        self.state
            .lock()
            .unwrap()
            .bucket_listing_failures
            .extend(errors);
    }

    /// Hold every abort call open for `delay`, so concurrency is observable
    /// through [`FakeStorageClient::max_inflight_aborts`].
    pub fn set_abort_delay(&self, delay: Duration) {
        self.state.lock().unwrap().abort_delay = Some(delay);
    }

    /// How many times `abort_upload` was called for this upload id.
    pub fn abort_calls(&self, upload_id: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .abort_calls
            .get(upload_id)
            .copied()
            .unwrap_or(0)
    }

    /// Upload ids successfully aborted so far.
    pub fn aborted_ids(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<String> = state.aborted.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Uploads still incomplete in `bucket`.
    pub fn remaining(&self, bucket: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .uploads
            .iter()
            .filter(|u| u.bucket == bucket && !state.aborted.contains(&u.upload_id))
            .count()
    }

    /// High-water mark of concurrent abort calls.
    pub fn max_inflight_aborts(&self) -> usize {
        self.max_inflight_aborts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl StorageClient for FakeStorageClient {
    async fn list_uploads(
        &self,
        bucket: &str,
        token: Option<&ListingToken>,
    ) -> Result<UploadPage, ProviderError> {
        let mut state = self.state.lock().unwrap();

        let call = state
            .listing_calls
            .entry(bucket.to_string())
            .and_modify(|c| *c += 1)
            .or_insert(1);
        let call = *call;
        if let Some(err) = state
            .listing_failures_at
            .remove(&(bucket.to_string(), call))
        {
            return Err(err);
        }

        if let Some(queue) = state.listing_failures.get_mut(bucket)
            && let Some(err) = queue.pop_front()
        {
            return Err(err);
        }

        let mut live: Vec<&UploadDescriptor> = state
            .uploads
            .iter()
            .filter(|u| u.bucket == bucket && !state.aborted.contains(&u.upload_id))
            .collect();
        live.sort_by(|a, b| (&a.key, &a.upload_id).cmp(&(&b.key, &b.upload_id)));

        let start = match token {
            Some(token) => live
                .iter()
                .position(|u| {
                    (u.key.as_str(), u.upload_id.as_str())
                        > (token.key_marker.as_str(), token.upload_id_marker.as_str())
                })
                .unwrap_or(live.len()),
            None => 0,
        };

        let page: Vec<UploadDescriptor> = live
            .iter()
            .skip(start)
            .take(state.page_size)
            .map(|u| (*u).clone())
            .collect();

        let next_token = if start + page.len() < live.len() {
            page.last().map(|last| ListingToken {
                key_marker: last.key.clone(),
                upload_id_marker: last.upload_id.clone(),
            })
        } else {
            None
        };

        Ok(UploadPage {
            uploads: page,
            next_token,
        })
    }

    async fn abort_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<(), ProviderError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            *state.abort_calls.entry(upload_id.to_string()).or_insert(0) += 1;
            state.abort_delay
        };

        let inflight = self.inflight_aborts.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_inflight_aborts
            .fetch_max(inflight, Ordering::SeqCst);

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = {
            let mut state = self.state.lock().unwrap();

            if let Some(queue) = state.abort_failures.get_mut(upload_id)
                && let Some(err) = queue.pop_front()
            {
                Err(err)
            } else if state.uploads.iter().any(|u| u.upload_id == upload_id)
                && !state.aborted.contains(upload_id)
            {
                state.aborted.insert(upload_id.to_string());
                Ok(())
            } else {
                Err(ProviderError::NotFound)
            }
        };

        self.inflight_aborts.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn list_buckets(&self) -> Result<Vec<String>, ProviderError> {
        let mut state = self.state.lock().unwrap();

        if let Some(err) = state.bucket_listing_failures.pop_front() {
            return Err(err);
        }

        let mut buckets: Vec<String> = state
            .uploads
            .iter()
            .map(|u| u.bucket.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        buckets.sort();
        Ok(buckets)
    }
}

/// [`ClientFactory`] backed by registered fakes, with per-profile
/// authentication failures.
#[derive(Default)]
pub struct FakeClientFactory {
    clients: Mutex<HashMap<String, Arc<FakeStorageClient>>>,
    auth_failures: Mutex<HashMap<String, String>>,
}

impl FakeClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, profile: &str, client: Arc<FakeStorageClient>) {
        self.clients
            .lock()
            .unwrap()
            .insert(profile.to_string(), client);
    }

    /// Make credential resolution fail for `profile`.
    pub fn fail_auth(&self, profile: &str, message: &str) {
        self.auth_failures
            .lock()
            .unwrap()
            .insert(profile.to_string(), message.to_string());
    }
}

#[async_trait]
impl ClientFactory for FakeClientFactory {
    async fn client_for(
        &self,
        profile: &str,
        _region: Option<&str>,
    ) -> Result<Arc<dyn StorageClient>, TargetError> {
        if let Some(message) = self.auth_failures.lock().unwrap().get(profile) {
            return Err(TargetError::Authentication {
                profile: profile.to_string(),
                message: message.clone(),
            });
        }
        match self.clients.lock().unwrap().get(profile) {
            Some(client) => Ok(client.clone() as Arc<dyn StorageClient>),
            None => Err(TargetError::Authentication {
                profile: profile.to_string(),
                message: "unknown profile".to_string(),
            }),
        }
    }
}
