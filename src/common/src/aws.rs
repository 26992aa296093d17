//! AWS S3 implementation of the storage provider boundary.
//!
//! Credentials come from the shared config/credentials files, one client per
//! named profile. Every SDK error is mapped onto the provider taxonomy so
//! the reaper core never sees SDK types.

use crate::client::{
    ClientFactory, ListingToken, ProviderError, StorageClient, TargetError, UploadPage,
};
use crate::model::UploadDescriptor;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// S3 client bound to one profile's credentials.
pub struct AwsClient {
    client: Client,
}

impl AwsClient {
    /// Build a client for a named profile, resolving its credentials up
    /// front so a broken profile fails before any bucket work starts.
    pub async fn for_profile(profile: &str, region: Option<&str>) -> Result<Self, TargetError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).profile_name(profile);
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        let conf = loader.load().await;

        let provider =
            conf.credentials_provider()
                .ok_or_else(|| TargetError::Authentication {
                    profile: profile.to_string(),
                    message: "no credentials provider configured".to_string(),
                })?;
        provider
            .provide_credentials()
            .await
            .map_err(|e| TargetError::Authentication {
                profile: profile.to_string(),
                message: e.to_string(),
            })?;

        tracing::debug!(profile, "resolved credentials");

        Ok(Self {
            client: Client::new(&conf),
        })
    }
}

#[async_trait]
impl StorageClient for AwsClient {
    async fn list_uploads(
        &self,
        bucket: &str,
        token: Option<&ListingToken>,
    ) -> Result<UploadPage, ProviderError> {
        let mut request = self.client.list_multipart_uploads().bucket(bucket);
        if let Some(token) = token {
            request = request
                .key_marker(&token.key_marker)
                .upload_id_marker(&token.upload_id_marker);
        }
        let output = request.send().await.map_err(classify_sdk_error)?;

        let uploads = output
            .uploads()
            .iter()
            .map(|upload| UploadDescriptor {
                bucket: bucket.to_string(),
                key: upload.key().unwrap_or_default().to_string(),
                upload_id: upload.upload_id().unwrap_or_default().to_string(),
                // A missing timestamp reads as "just initiated", which keeps
                // the upload out of abort eligibility.
                initiated: upload
                    .initiated()
                    .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
                    .unwrap_or_else(Utc::now),
                owner: upload
                    .initiator()
                    .and_then(|i| i.id())
                    .or_else(|| upload.owner().and_then(|o| o.id()))
                    .map(str::to_string),
            })
            .collect();

        let next_token = if output.is_truncated().unwrap_or(false) {
            match (output.next_key_marker(), output.next_upload_id_marker()) {
                (Some(key), Some(upload_id)) => Some(ListingToken {
                    key_marker: key.to_string(),
                    upload_id_marker: upload_id.to_string(),
                }),
                _ => None,
            }
        } else {
            None
        };

        Ok(UploadPage {
            uploads,
            next_token,
        })
    }

    async fn abort_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), ProviderError> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(classify_sdk_error)?;
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<String>, ProviderError> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(classify_sdk_error)?;
        Ok(output
            .buckets()
            .iter()
            .filter_map(|b| b.name())
            .map(str::to_string)
            .collect())
    }
}

/// Caches one client per (profile, region) pair across a run.
#[derive(Default)]
pub struct AwsClientFactory {
    clients: tokio::sync::Mutex<HashMap<(String, Option<String>), Arc<AwsClient>>>,
}

impl AwsClientFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClientFactory for AwsClientFactory {
    async fn client_for(
        &self,
        profile: &str,
        region: Option<&str>,
    ) -> Result<Arc<dyn StorageClient>, TargetError> {
        let key = (profile.to_string(), region.map(str::to_string));
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone() as Arc<dyn StorageClient>);
        }
        let client = Arc::new(AwsClient::for_profile(profile, region).await?);
        clients.insert(key, client.clone());
        Ok(client as Arc<dyn StorageClient>)
    }
}

fn classify_sdk_error<E, R>(err: SdkError<E, R>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let code = err.code().map(str::to_owned);
    let message = format!("{}", DisplayErrorContext(&err));
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            ProviderError::Transient(message)
        }
        SdkError::ServiceError(_) => classify_error_code(code.as_deref(), message),
        _ => ProviderError::Other(message),
    }
}

/// Map a service error code onto the provider taxonomy.
fn classify_error_code(code: Option<&str>, message: String) -> ProviderError {
    match code {
        Some("NoSuchUpload") => ProviderError::NotFound,
        Some(
            "AccessDenied" | "AccessDeniedException" | "InvalidAccessKeyId"
            | "SignatureDoesNotMatch" | "ExpiredToken",
        ) => ProviderError::AccessDenied(message),
        Some(
            "SlowDown" | "Throttling" | "ThrottlingException" | "TooManyRequestsException"
            | "RequestTimeout" | "ServiceUnavailable" | "InternalError",
        ) => ProviderError::Transient(message),
        _ => ProviderError::Other(message),
    }
}
