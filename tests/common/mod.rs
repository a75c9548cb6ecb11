#![allow(dead_code)]

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use handlequota::{
    clock::{Clock, ManualClock},
    db::{Identity, Profile},
    error::StoreError,
    handles::{AllocatorConfig, HandleAllocator},
    profiles::{BootstrapConfig, ProfileBootstrap},
    quota::{LedgerConfig, QuotaLedger},
    store::{CounterDelta, HandleIndex, MemoryStore, Precondition, ProfileStore, ProfileUpdate, StoreResult},
};
use time::OffsetDateTime;

/// 2025-01-01T00:00:00Z
pub fn start() -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(1_735_689_600).unwrap()
}

pub fn identity(uid: &str, display_name: Option<&str>, email: Option<&str>) -> Identity {
    Identity {
        uid: uid.to_owned(),
        email: email.map(str::to_owned),
        display_name: display_name.map(str::to_owned),
        provider: "google.com".to_owned(),
        email_verified: true,
    }
}

pub struct Harness<S> {
    pub store: Arc<S>,
    pub clock: Arc<ManualClock>,
    pub allocator: HandleAllocator,
    pub ledger: QuotaLedger,
    pub bootstrap: ProfileBootstrap,
}

pub fn harness_with<S>(store: Arc<S>, allocator_config: AllocatorConfig) -> Harness<S>
where
    S: ProfileStore + HandleIndex + 'static,
{
    let clock = Arc::new(ManualClock::new(start()));
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let profiles: Arc<dyn ProfileStore> = store.clone();
    let index: Arc<dyn HandleIndex> = store.clone();

    let allocator = HandleAllocator::new(index, profiles.clone(), dyn_clock.clone(), allocator_config);
    let ledger = QuotaLedger::new(profiles.clone(), dyn_clock.clone(), LedgerConfig::default());
    let bootstrap = ProfileBootstrap::new(profiles, allocator.clone(), dyn_clock, BootstrapConfig::default());

    Harness {
        store,
        clock,
        allocator,
        ledger,
        bootstrap,
    }
}

pub fn harness() -> Harness<MemoryStore> {
    harness_with(Arc::new(MemoryStore::new()), AllocatorConfig::default())
}

/// A [`MemoryStore`] that can be told to fail the next profile create or
/// every handle release.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    fail_next_create: AtomicBool,
    fail_release: AtomicBool,
}

impl FlakyStore {
    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, Ordering::SeqCst);
    }

    pub fn fail_release(&self, fail: bool) {
        self.fail_release.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProfileStore for FlakyStore {
    async fn get(&self, uid: &str) -> StoreResult<Option<Profile>> {
        self.inner.get(uid).await
    }

    async fn create_if_absent(&self, profile: &Profile) -> StoreResult<bool> {
        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("blip".to_owned()));
        }
        self.inner.create_if_absent(profile).await
    }

    async fn atomic_increment(
        &self,
        uid: &str,
        delta: CounterDelta,
        precondition: &Precondition,
        now: OffsetDateTime,
    ) -> StoreResult<Option<Profile>> {
        self.inner.atomic_increment(uid, delta, precondition, now).await
    }

    async fn conditional_update(
        &self,
        uid: &str,
        update: &ProfileUpdate,
        precondition: &Precondition,
        now: OffsetDateTime,
    ) -> StoreResult<bool> {
        self.inner.conditional_update(uid, update, precondition, now).await
    }
}

#[async_trait]
impl HandleIndex for FlakyStore {
    async fn owner(&self, handle_key: &str) -> StoreResult<Option<String>> {
        self.inner.owner(handle_key).await
    }

    async fn claim(&self, handle_key: &str, uid: &str) -> StoreResult<bool> {
        self.inner.claim(handle_key, uid).await
    }

    async fn release(&self, handle_key: &str, uid: &str) -> StoreResult<bool> {
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("release refused".to_owned()));
        }
        self.inner.release(handle_key, uid).await
    }
}
