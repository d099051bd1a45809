//! Trait abstractions for the collaborators handlers talk to
//!
//! These traits enable testing the dispatcher and agents with mock
//! implementations.

use crate::db::{Database, DbError, UserProfile};
use crate::message::OutboundMessage;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failure of a persistence collaborator
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Failed to fetch image {reference}: {message}")]
    Fetch { reference: String, message: String },
    #[error("Image fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("Image is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("Failed to write image: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
#[error("Failed to deliver message to {user_id}: {message}")]
pub struct PublishError {
    pub user_id: String,
    pub message: String,
}

/// Durable campaign counters and mappings.
///
/// Every method is one store round trip; callers must not assume a read
/// followed by a write is atomic. `claim_unit` is the only conditional write.
#[async_trait]
pub trait CampaignKeeper: Send + Sync {
    async fn claim_count(&self) -> StoreResult<i64>;

    async fn increment_claim_count(&self) -> StoreResult<()>;

    async fn reset_claim_count(&self) -> StoreResult<()>;

    /// Count one claim if fewer than `limit` were handed out
    async fn claim_unit(&self, limit: i64) -> StoreResult<bool>;

    async fn set_sharing_owner(&self, code: &str, user_id: &str) -> StoreResult<()>;

    async fn sharing_owner(&self, code: &str) -> StoreResult<Option<String>>;

    async fn highest_sharing_serial(&self) -> StoreResult<Option<u32>>;

    async fn coupon_image(&self) -> StoreResult<Option<String>>;

    async fn set_coupon_image(&self, encoded: &str) -> StoreResult<()>;
}

/// User-profile collaborator
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn profile(&self, user_id: &str) -> StoreResult<Option<UserProfile>>;

    async fn store_profile(&self, user_id: &str, profile: &UserProfile) -> StoreResult<()>;
}

/// Image download and publishing collaborator
#[async_trait]
pub trait ImageService: Send + Sync {
    /// Download the bytes behind an inbound image reference
    async fn fetch_bytes(&self, reference: &str) -> Result<Vec<u8>, ImageError>;

    /// Make an encoded image reachable by the chat platform, returning its URL
    async fn publish_for_viewing(
        &self,
        user_id: &str,
        encoded: &str,
        format: &str,
    ) -> Result<String, ImageError>;
}

/// Outbound transport
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, message: OutboundMessage) -> Result<(), PublishError>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: CampaignKeeper + ?Sized> CampaignKeeper for Arc<T> {
    async fn claim_count(&self) -> StoreResult<i64> {
        (**self).claim_count().await
    }

    async fn increment_claim_count(&self) -> StoreResult<()> {
        (**self).increment_claim_count().await
    }

    async fn reset_claim_count(&self) -> StoreResult<()> {
        (**self).reset_claim_count().await
    }

    async fn claim_unit(&self, limit: i64) -> StoreResult<bool> {
        (**self).claim_unit(limit).await
    }

    async fn set_sharing_owner(&self, code: &str, user_id: &str) -> StoreResult<()> {
        (**self).set_sharing_owner(code, user_id).await
    }

    async fn sharing_owner(&self, code: &str) -> StoreResult<Option<String>> {
        (**self).sharing_owner(code).await
    }

    async fn highest_sharing_serial(&self) -> StoreResult<Option<u32>> {
        (**self).highest_sharing_serial().await
    }

    async fn coupon_image(&self) -> StoreResult<Option<String>> {
        (**self).coupon_image().await
    }

    async fn set_coupon_image(&self, encoded: &str) -> StoreResult<()> {
        (**self).set_coupon_image(encoded).await
    }
}

#[async_trait]
impl<T: ProfileStore + ?Sized> ProfileStore for Arc<T> {
    async fn profile(&self, user_id: &str) -> StoreResult<Option<UserProfile>> {
        (**self).profile(user_id).await
    }

    async fn store_profile(&self, user_id: &str, profile: &UserProfile) -> StoreResult<()> {
        (**self).store_profile(user_id, profile).await
    }
}

#[async_trait]
impl<T: Publisher + ?Sized> Publisher for Arc<T> {
    async fn publish(&self, message: OutboundMessage) -> Result<(), PublishError> {
        (**self).publish(message).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as the campaign keeper and profile store
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[allow(dead_code)] // Used in tests
    pub fn inner(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl CampaignKeeper for DatabaseStorage {
    async fn claim_count(&self) -> StoreResult<i64> {
        Ok(self.db.claim_count()?)
    }

    async fn increment_claim_count(&self) -> StoreResult<()> {
        Ok(self.db.increment_claim_count()?)
    }

    async fn reset_claim_count(&self) -> StoreResult<()> {
        Ok(self.db.reset_claim_count()?)
    }

    async fn claim_unit(&self, limit: i64) -> StoreResult<bool> {
        Ok(self.db.claim_unit(limit)?)
    }

    async fn set_sharing_owner(&self, code: &str, user_id: &str) -> StoreResult<()> {
        Ok(self.db.set_sharing_owner(code, user_id)?)
    }

    async fn sharing_owner(&self, code: &str) -> StoreResult<Option<String>> {
        Ok(self.db.sharing_owner(code)?)
    }

    async fn highest_sharing_serial(&self) -> StoreResult<Option<u32>> {
        Ok(self.db.highest_sharing_serial()?)
    }

    async fn coupon_image(&self) -> StoreResult<Option<String>> {
        Ok(self.db.coupon_image()?)
    }

    async fn set_coupon_image(&self, encoded: &str) -> StoreResult<()> {
        Ok(self.db.set_coupon_image(encoded)?)
    }
}

#[async_trait]
impl ProfileStore for DatabaseStorage {
    async fn profile(&self, user_id: &str) -> StoreResult<Option<UserProfile>> {
        Ok(self.db.get_profile(user_id)?)
    }

    async fn store_profile(&self, user_id: &str, profile: &UserProfile) -> StoreResult<()> {
        Ok(self.db.store_profile(user_id, profile)?)
    }
}

/// Downloads inbound images over HTTP and publishes coupon images as files
/// served under `/downloaded/`
pub struct HttpImageService {
    client: reqwest::Client,
    image_dir: PathBuf,
    public_base_url: String,
    timeout: Duration,
}

impl HttpImageService {
    pub fn new(
        image_dir: PathBuf,
        public_base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            image_dir,
            public_base_url: public_base_url.into(),
            timeout,
        })
    }

    fn fetch_error(reference: &str, e: &reqwest::Error) -> ImageError {
        ImageError::Fetch {
            reference: reference.to_string(),
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl ImageService for HttpImageService {
    async fn fetch_bytes(&self, reference: &str) -> Result<Vec<u8>, ImageError> {
        let response = self.client.get(reference).send().await.map_err(|e| {
            if e.is_timeout() {
                ImageError::Timeout(self.timeout)
            } else {
                Self::fetch_error(reference, &e)
            }
        })?;
        let response = response
            .error_for_status()
            .map_err(|e| Self::fetch_error(reference, &e))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Self::fetch_error(reference, &e))?;

        tracing::info!(reference = %reference, bytes = bytes.len(), "Fetched image");
        Ok(bytes.to_vec())
    }

    async fn publish_for_viewing(
        &self,
        user_id: &str,
        encoded: &str,
        format: &str,
    ) -> Result<String, ImageError> {
        let bytes = URL_SAFE_NO_PAD.decode(encoded)?;
        tokio::fs::create_dir_all(&self.image_dir).await?;

        let file_name = format!(
            "{}-{}.{format}",
            chrono::Utc::now().format("%Y%m%dT%H%M%S"),
            uuid::Uuid::new_v4()
        );
        tokio::fs::write(self.image_dir.join(&file_name), &bytes).await?;

        let url = format!(
            "{}/downloaded/{file_name}",
            self.public_base_url.trim_end_matches('/')
        );
        tracing::debug!(user_id = %user_id, url = %url, "Published coupon image");
        Ok(url)
    }
}

/// Delivers outbound messages by POSTing them to the transport adapter
pub struct HttpPublisher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPublisher {
    /// `timeout` bounds each delivery, so a stalled transport cannot hold a
    /// user's session lock.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(&self, message: OutboundMessage) -> Result<(), PublishError> {
        let user_id = message.user_id.clone();
        let to_error = |e: reqwest::Error| PublishError {
            user_id: user_id.clone(),
            message: e.to_string(),
        };

        self.client
            .post(&self.endpoint)
            .json(&message)
            .send()
            .await
            .map_err(to_error)?
            .error_for_status()
            .map_err(to_error)?;
        Ok(())
    }
}

/// Publisher used when no transport endpoint is configured
pub struct LogPublisher;

#[async_trait]
impl Publisher for LogPublisher {
    async fn publish(&self, message: OutboundMessage) -> Result<(), PublishError> {
        tracing::info!(
            user_id = %message.user_id,
            texts = ?message.texts(),
            parts = message.messages.len(),
            "Outbound message"
        );
        Ok(())
    }
}
