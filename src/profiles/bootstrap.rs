use std::{sync::Arc, time::Duration};

use rand::seq::IndexedRandom;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, instrument, warn};

use crate::{
    clock::Clock,
    db::{Identity, Profile, Quota, Tier},
    error::{Error, Result},
    handles::{FALLBACK_BASE, HandleAllocator, normalize_base},
    store::{ProfileStore, bounded},
    validation::{normalize_handle, validate_display_name},
};

#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub capacity: u32,
    pub window_length: time::Duration,
    pub store_timeout: Duration,
}

impl BootstrapConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.window_length.is_positive() {
            anyhow::bail!("quota window must be positive, got {}", self.window_length);
        }
        Ok(())
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            window_length: time::Duration::days(7),
            store_timeout: Duration::from_secs(5),
        }
    }
}

const ADJECTIVES: &[&str] = &[
    "Quick", "Lazy", "Mysterious", "Jolly", "Brave", "Silent", "Witty", "Fierce",
    "Clever", "Gentle", "Wild", "Calm", "Bold", "Shy", "Proud", "Happy", "Sad",
    "Eager", "Fancy", "Rusty", "Golden", "Silver", "Bright", "Dark", "Lucky",
];

const NOUNS: &[&str] = &[
    "Fox", "Bear", "Eagle", "Wolf", "Dragon", "Tiger", "Lion", "Owl", "Rabbit",
    "Falcon", "Hawk", "Shark", "Panda", "Kitten", "Puppy", "Phoenix", "Griffin",
    "Unicorn", "Turtle", "Dolphin", "Whale", "Elephant", "Giraffe", "Zebra",
];

/// Random "Adjective Noun" alias for identities that came without a name.
pub fn random_alias() -> String {
    let mut rng = rand::rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("Silent");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("Owl");
    format!("{adjective} {noun}")
}

/// Handle base for a new profile: the display name if anything usable is left
/// after normalization, otherwise the local part of the email.
pub fn base_handle(identity: &Identity) -> String {
    let email_local = identity
        .email
        .as_deref()
        .and_then(|email| email.split('@').next());

    identity
        .display_name
        .as_deref()
        .into_iter()
        .chain(email_local)
        .map(normalize_base)
        .find(|base| base != FALLBACK_BASE)
        .unwrap_or_else(|| FALLBACK_BASE.to_owned())
}

/// Makes sure each identity has exactly one profile, however many times and
/// however concurrently it signs in.
#[derive(Clone)]
pub struct ProfileBootstrap {
    store: Arc<dyn ProfileStore>,
    allocator: HandleAllocator,
    clock: Arc<dyn Clock>,
    config: BootstrapConfig,
}

impl ProfileBootstrap {
    pub fn new(
        store: Arc<dyn ProfileStore>,
        allocator: HandleAllocator,
        clock: Arc<dyn Clock>,
        mut config: BootstrapConfig,
    ) -> Self {
        if let Err(e) = config.validate() {
            warn!("{e}, using the default window");
            config.window_length = BootstrapConfig::default().window_length;
        }
        Self {
            store,
            allocator,
            clock,
            config,
        }
    }

    pub async fn find(&self, uid: &str) -> Result<Option<Profile>> {
        Ok(bounded(self.config.store_timeout, self.store.get(uid)).await?)
    }

    /// Returns the identity's profile, creating it on first sign-in.
    ///
    /// Creation reserves a handle in the index, then does a create-if-absent
    /// keyed by uid. A caller that loses that create to a concurrent call for
    /// the same identity gives its handle back and returns the winner's profile.
    #[instrument(
        name = "profiles.ensure_profile",
        skip(self, identity),
        fields(uid = %identity.uid, provider = %identity.provider)
    )]
    pub async fn ensure_profile(&self, identity: &Identity) -> Result<Profile> {
        let uid = identity.uid.as_str();
        if let Some(profile) = self.find(uid).await? {
            debug!("profile already exists");
            return Ok(profile);
        }

        let handle = self
            .allocator
            .generate_unique_handle(&base_handle(identity), uid)
            .await?;

        let now = self.clock.now();
        let display_name = identity
            .display_name
            .as_deref()
            .filter(|name| validate_display_name(name).valid)
            .map(|name| name.trim().to_owned())
            .unwrap_or_else(random_alias);
        let profile = Profile {
            uid: uid.to_owned(),
            handle: handle.clone(),
            display_name,
            tier: Tier::Free,
            quota: Quota::fresh(now, self.config.window_length, self.config.capacity),
            total_messages: 0,
            created_at: now,
            updated_at: now,
        };

        // A failed or timed-out create may still have landed, so the handle is
        // kept. A retry for the same uid gets the same reservation back.
        let created = bounded(self.config.store_timeout, self.store.create_if_absent(&profile)).await?;
        if created {
            info!("created profile @{handle}");
            return Ok(profile);
        }

        let winner = self.find(uid).await?.ok_or_else(|| Error::profile_not_found(uid))?;
        // Both calls may have been handed the same reservation.
        if normalize_handle(&winner.handle) != handle {
            debug!("lost the create race, releasing @{handle}");
            if let Err(e) = self.allocator.release_handle(&handle, uid).await {
                warn!("could not release @{handle}: {e}");
            }
        }
        Ok(winner)
    }
}

/// Runs `ensure_profile` once for every identity event until the sender side
/// is dropped. Failures are logged; the next event for the identity retries.
pub fn listen(bootstrap: ProfileBootstrap, mut identities: mpsc::Receiver<Identity>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(identity) = identities.recv().await {
            if let Err(e) = bootstrap.ensure_profile(&identity).await {
                warn!(uid = %identity.uid, retryable = e.is_retryable(), "bootstrap failed: {e}");
            }
        }
        debug!("identity stream closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(display_name: Option<&str>, email: Option<&str>) -> Identity {
        Identity {
            uid: "u1".into(),
            email: email.map(str::to_owned),
            display_name: display_name.map(str::to_owned),
            provider: "google.com".into(),
            email_verified: true,
        }
    }

    #[test]
    fn base_prefers_display_name() {
        assert_eq!(base_handle(&identity(Some("Jane Doe"), Some("jd@example.com"))), "janedoe");
    }

    #[test]
    fn base_falls_back_to_email_local_part() {
        assert_eq!(base_handle(&identity(None, Some("j.doe@example.com"))), "jdoe");
        assert_eq!(base_handle(&identity(Some("🙂🙂"), Some("kim@example.com"))), "kim");
    }

    #[test]
    fn base_falls_back_to_literal() {
        assert_eq!(base_handle(&identity(None, None)), FALLBACK_BASE);
        assert_eq!(base_handle(&identity(Some("!!"), Some("@example.com"))), FALLBACK_BASE);
    }

    #[test]
    fn non_positive_window_is_rejected() {
        let config = BootstrapConfig {
            window_length: time::Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(BootstrapConfig::default().validate().is_ok());
    }

    #[test]
    fn alias_is_two_words() {
        let alias = random_alias();
        assert_eq!(alias.split(' ').count(), 2);
    }
}
