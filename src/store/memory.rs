use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use time::OffsetDateTime;

use crate::{db::Profile, error::StoreError};

use super::{CounterDelta, HandleIndex, Precondition, ProfileStore, ProfileUpdate, StoreResult};

/// In-process store. Each operation holds the shard lock of the one key it
/// touches, which gives the same per-document atomicity the SQLite store gets
/// from single statements.
#[derive(Debug, Default)]
pub struct MemoryStore {
    profiles: DashMap<String, Profile>,
    handles: DashMap<String, String>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn profile_count(&self) -> usize {
        self.profiles.len()
    }

    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn get(&self, uid: &str) -> StoreResult<Option<Profile>> {
        self.check_online()?;
        Ok(self.profiles.get(uid).map(|p| p.clone()))
    }

    async fn create_if_absent(&self, profile: &Profile) -> StoreResult<bool> {
        self.check_online()?;
        match self.profiles.entry(profile.uid.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(profile.clone());
                Ok(true)
            }
        }
    }

    async fn atomic_increment(
        &self,
        uid: &str,
        delta: CounterDelta,
        precondition: &Precondition,
        now: OffsetDateTime,
    ) -> StoreResult<Option<Profile>> {
        self.check_online()?;
        let Some(mut profile) = self.profiles.get_mut(uid) else {
            return Ok(None);
        };
        if !precondition.holds_for(&profile) {
            return Ok(None);
        }
        profile.quota.sent_count += delta.sent_count;
        profile.total_messages += u64::from(delta.total_messages);
        profile.updated_at = now;
        Ok(Some(profile.clone()))
    }

    async fn conditional_update(
        &self,
        uid: &str,
        update: &ProfileUpdate,
        precondition: &Precondition,
        now: OffsetDateTime,
    ) -> StoreResult<bool> {
        self.check_online()?;
        let Some(mut profile) = self.profiles.get_mut(uid) else {
            return Ok(false);
        };
        if !precondition.holds_for(&profile) {
            return Ok(false);
        }
        update.apply(&mut profile, now);
        Ok(true)
    }
}

#[async_trait]
impl HandleIndex for MemoryStore {
    async fn owner(&self, handle_key: &str) -> StoreResult<Option<String>> {
        self.check_online()?;
        Ok(self.handles.get(handle_key).map(|uid| uid.clone()))
    }

    async fn claim(&self, handle_key: &str, uid: &str) -> StoreResult<bool> {
        self.check_online()?;
        match self.handles.entry(handle_key.to_owned()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(uid.to_owned());
                Ok(true)
            }
        }
    }

    async fn release(&self, handle_key: &str, uid: &str) -> StoreResult<bool> {
        self.check_online()?;
        Ok(self.handles.remove_if(handle_key, |_, owner| owner == uid).is_some())
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::db::{Quota, Tier};

    fn profile(uid: &str) -> Profile {
        let now = OffsetDateTime::UNIX_EPOCH;
        Profile {
            uid: uid.into(),
            handle: uid.into(),
            display_name: uid.into(),
            tier: Tier::Free,
            quota: Quota::fresh(now, Duration::days(7), 2),
            total_messages: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn create_if_absent_is_first_write_wins() {
        let store = MemoryStore::new();
        let mut first = profile("u1");
        first.display_name = "first".into();
        let mut second = profile("u1");
        second.display_name = "second".into();

        assert!(store.create_if_absent(&first).await.unwrap());
        assert!(!store.create_if_absent(&second).await.unwrap());
        assert_eq!(store.get("u1").await.unwrap().unwrap().display_name, "first");
    }

    #[tokio::test]
    async fn guarded_increment_stops_at_capacity() {
        let store = MemoryStore::new();
        store.create_if_absent(&profile("u1")).await.unwrap();
        let guard = Precondition { sent_below_capacity: true, ..Default::default() };
        let now = OffsetDateTime::UNIX_EPOCH;

        let p = store.atomic_increment("u1", CounterDelta::send(), &guard, now).await.unwrap();
        assert_eq!(p.unwrap().quota.sent_count, 1);
        let p = store.atomic_increment("u1", CounterDelta::send(), &guard, now).await.unwrap();
        assert_eq!(p.unwrap().quota.sent_count, 2);
        assert!(store.atomic_increment("u1", CounterDelta::send(), &guard, now).await.unwrap().is_none());
        assert!(store.atomic_increment("nobody", CounterDelta::send(), &guard, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn release_requires_ownership() {
        let store = MemoryStore::new();
        assert!(store.claim("alice", "u1").await.unwrap());
        assert!(!store.claim("alice", "u2").await.unwrap());
        assert!(!store.release("alice", "u2").await.unwrap());
        assert_eq!(store.owner("alice").await.unwrap().as_deref(), Some("u1"));
        assert!(store.release("alice", "u1").await.unwrap());
        assert_eq!(store.owner("alice").await.unwrap(), None);
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert!(matches!(store.get("u1").await, Err(StoreError::Unavailable(_))));
        assert!(store.claim("alice", "u1").await.is_err());
        store.set_offline(false);
        assert!(store.get("u1").await.unwrap().is_none());
    }
}
