//! Mock implementations for testing
//!
//! These mocks enable exercising the dispatcher and agents without a
//! transport, network or filesystem.

use super::traits::*;
use crate::message::OutboundMessage;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Barrier;

// ============================================================================
// Recording Publisher
// ============================================================================

/// Publisher that keeps every outbound message in order
#[derive(Default)]
pub struct RecordingPublisher {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingPublisher {
    pub fn all(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Messages addressed to one user
    pub fn for_user(&self, user_id: &str) -> Vec<OutboundMessage> {
        self.all()
            .into_iter()
            .filter(|m| m.user_id == user_id)
            .collect()
    }

    /// All text lines addressed to one user, flattened in order
    pub fn texts_for(&self, user_id: &str) -> Vec<String> {
        self.for_user(user_id)
            .iter()
            .flat_map(|m| m.texts().into_iter().map(str::to_string))
            .collect()
    }

    /// Last text line addressed to one user
    pub fn last_text_for(&self, user_id: &str) -> Option<String> {
        self.texts_for(user_id).pop()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, message: OutboundMessage) -> Result<(), PublishError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

// ============================================================================
// Failing Publisher
// ============================================================================

/// Publisher whose every delivery fails; attempts are still recorded
#[derive(Default)]
pub struct FailingPublisher {
    attempts: Mutex<Vec<OutboundMessage>>,
}

impl FailingPublisher {
    /// Messages that were attempted for one user
    pub fn attempts_for(&self, user_id: &str) -> Vec<OutboundMessage> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Publisher for FailingPublisher {
    async fn publish(&self, message: OutboundMessage) -> Result<(), PublishError> {
        let user_id = message.user_id.clone();
        self.attempts.lock().unwrap().push(message);
        Err(PublishError {
            user_id,
            message: "transport unavailable".to_string(),
        })
    }
}

// ============================================================================
// Mock Image Service
// ============================================================================

/// Image service returning canned bytes (or a failure) and fake URLs
pub struct MockImageService {
    bytes: Option<Vec<u8>>,
    delay: Option<Duration>,
    /// `(user_id, encoded)` for each published image
    pub published: Mutex<Vec<(String, String)>>,
    /// References passed to `fetch_bytes`
    pub fetched: Mutex<Vec<String>>,
}

impl MockImageService {
    pub fn serving(bytes: &[u8]) -> Self {
        Self {
            bytes: Some(bytes.to_vec()),
            delay: None,
            published: Mutex::new(Vec::new()),
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            bytes: None,
            ..Self::serving(&[])
        }
    }

    /// Sleep this long before answering a fetch
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn published_count(&self) -> usize {
        self.published.lock().unwrap().len()
    }
}

#[async_trait]
impl ImageService for MockImageService {
    async fn fetch_bytes(&self, reference: &str) -> Result<Vec<u8>, ImageError> {
        self.fetched.lock().unwrap().push(reference.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.bytes.clone().ok_or_else(|| ImageError::Fetch {
            reference: reference.to_string(),
            message: "mock fetch failure".to_string(),
        })
    }

    async fn publish_for_viewing(
        &self,
        user_id: &str,
        encoded: &str,
        format: &str,
    ) -> Result<String, ImageError> {
        let mut published = self.published.lock().unwrap();
        published.push((user_id.to_string(), encoded.to_string()));
        Ok(format!("https://img.test/{}.{format}", published.len()))
    }
}

// ============================================================================
// Keeper wrappers for concurrency and failure injection
// ============================================================================

/// Keeper that makes `waiters` concurrent callers of `claim_count` all read
/// the counter before any of them may continue.
///
/// This forces the interleaving where every claimant passes the supply check
/// before anyone increments.
pub struct BarrierKeeper<K> {
    inner: K,
    barrier: Arc<Barrier>,
}

impl<K: CampaignKeeper> BarrierKeeper<K> {
    pub fn new(inner: K, waiters: usize) -> Self {
        Self {
            inner,
            barrier: Arc::new(Barrier::new(waiters)),
        }
    }
}

#[async_trait]
impl<K: CampaignKeeper> CampaignKeeper for BarrierKeeper<K> {
    async fn claim_count(&self) -> StoreResult<i64> {
        let count = self.inner.claim_count().await?;
        self.barrier.wait().await;
        Ok(count)
    }

    async fn increment_claim_count(&self) -> StoreResult<()> {
        self.inner.increment_claim_count().await
    }

    async fn reset_claim_count(&self) -> StoreResult<()> {
        self.inner.reset_claim_count().await
    }

    async fn claim_unit(&self, limit: i64) -> StoreResult<bool> {
        self.inner.claim_unit(limit).await
    }

    async fn set_sharing_owner(&self, code: &str, user_id: &str) -> StoreResult<()> {
        self.inner.set_sharing_owner(code, user_id).await
    }

    async fn sharing_owner(&self, code: &str) -> StoreResult<Option<String>> {
        self.inner.sharing_owner(code).await
    }

    async fn highest_sharing_serial(&self) -> StoreResult<Option<u32>> {
        self.inner.highest_sharing_serial().await
    }

    async fn coupon_image(&self) -> StoreResult<Option<String>> {
        self.inner.coupon_image().await
    }

    async fn set_coupon_image(&self, encoded: &str) -> StoreResult<()> {
        self.inner.set_coupon_image(encoded).await
    }
}

/// Profile store whose every call fails
pub struct UnavailableProfiles;

#[async_trait]
impl ProfileStore for UnavailableProfiles {
    async fn profile(&self, _user_id: &str) -> StoreResult<Option<crate::db::UserProfile>> {
        Err(StoreError::Unavailable("profiles offline".to_string()))
    }

    async fn store_profile(
        &self,
        _user_id: &str,
        _profile: &crate::db::UserProfile,
    ) -> StoreResult<()> {
        Err(StoreError::Unavailable("profiles offline".to_string()))
    }
}
