//! Durable store contract: profile documents keyed by uid, plus a separate
//! handle index namespace used only for handle uniqueness.
//!
//! Every mutation is a single store-level operation. Services never do a
//! read-modify-write on the client side; they express the write together
//! with the [`Precondition`] it depends on and let the store apply both
//! atomically.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::{db::{Profile, Tier}, error::StoreError};

pub type StoreResult<T> = Result<T, StoreError>;

/// Counter deltas applied in one atomic increment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterDelta {
    pub sent_count: u32,
    pub total_messages: u32,
}

impl CounterDelta {
    pub fn send() -> Self {
        Self { sent_count: 1, total_messages: 1 }
    }

    pub fn total_only() -> Self {
        Self { sent_count: 0, total_messages: 1 }
    }
}

/// Conditions the stored profile must meet for a write to apply.
/// Unset fields are not checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Precondition {
    pub tier: Option<Tier>,
    pub window_start: Option<OffsetDateTime>,
    pub handle: Option<String>,
    pub sent_below_capacity: bool,
}

impl Precondition {
    pub fn holds_for(&self, profile: &Profile) -> bool {
        self.tier.is_none_or(|t| t == profile.tier)
            && self.window_start.is_none_or(|w| w == profile.quota.window_start)
            && self.handle.as_ref().is_none_or(|h| h == &profile.handle)
            && (!self.sent_below_capacity || profile.quota.sent_count < profile.quota.capacity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileUpdate {
    /// Start a new window at the given instant with a zero count.
    ResetWindow { window_start: OffsetDateTime },
    SetTier(Tier),
    SetHandle(String),
}

impl ProfileUpdate {
    pub fn apply(&self, profile: &mut Profile, now: OffsetDateTime) {
        match self {
            ProfileUpdate::ResetWindow { window_start } => {
                profile.quota.sent_count = 0;
                profile.quota.window_start = *window_start;
            }
            ProfileUpdate::SetTier(tier) => profile.tier = *tier,
            ProfileUpdate::SetHandle(handle) => profile.handle = handle.clone(),
        }
        profile.updated_at = now;
    }
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get(&self, uid: &str) -> StoreResult<Option<Profile>>;

    /// First write wins. Returns false if a profile with this uid exists.
    async fn create_if_absent(&self, profile: &Profile) -> StoreResult<bool>;

    /// Adds `delta` to the counters if `precondition` holds, returning the
    /// profile as it is after the increment. `None` means nothing was applied,
    /// either because the profile is gone or the precondition failed.
    async fn atomic_increment(
        &self,
        uid: &str,
        delta: CounterDelta,
        precondition: &Precondition,
        now: OffsetDateTime,
    ) -> StoreResult<Option<Profile>>;

    /// Applies `update` if `precondition` holds. Returns whether it applied.
    async fn conditional_update(
        &self,
        uid: &str,
        update: &ProfileUpdate,
        precondition: &Precondition,
        now: OffsetDateTime,
    ) -> StoreResult<bool>;
}

#[async_trait]
pub trait HandleIndex: Send + Sync {
    /// Current owner of a normalized handle key.
    async fn owner(&self, handle_key: &str) -> StoreResult<Option<String>>;

    /// Conditional create of the index entry. Returns false if the key exists,
    /// whoever owns it.
    async fn claim(&self, handle_key: &str, uid: &str) -> StoreResult<bool>;

    /// Removes the entry only if `uid` owns it.
    async fn release(&self, handle_key: &str, uid: &str) -> StoreResult<bool>;
}

/// Bounds a store call so a hung backend surfaces as a retryable error.
pub async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = StoreResult<T>>,
) -> StoreResult<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}
