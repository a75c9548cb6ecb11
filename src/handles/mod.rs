mod check;

use std::{sync::Arc, time::Duration};

use axum::{Router, routing::get};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::{
    AppState,
    clock::Clock,
    db::Profile,
    error::{Error, Result, StoreError},
    store::{HandleIndex, Precondition, ProfileStore, ProfileUpdate, bounded},
    validation::{MAX_HANDLE_LEN, normalize_handle, validate_handle},
};

pub fn router() -> Router<AppState> {
    Router::new().route("/check", get(check::check_handle))
}

/// Base used when nothing usable survives normalization.
pub const FALLBACK_BASE: &str = "user";
pub const MAX_SUGGESTIONS: usize = 3;
const SUGGESTION_TRIES: u32 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    Taken,
}

#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    pub max_attempts: usize,
    pub store_timeout: Duration,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 100,
            store_timeout: Duration::from_secs(5),
        }
    }
}

/// Strips everything but ASCII letters and digits and lowercases the rest.
pub fn normalize_base(base: &str) -> String {
    let cleaned: String = base
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if cleaned.is_empty() {
        FALLBACK_BASE.to_owned()
    } else {
        cleaned
    }
}

/// The `attempt`-th candidate for `base`: the base itself, then `base1`,
/// `base2`, ... with the base cut short so the result stays within the
/// maximum handle length. `base` must be ASCII.
pub fn nth_candidate(base: &str, attempt: usize) -> String {
    if attempt == 0 {
        return fit(base, 0).to_owned();
    }
    let suffix = attempt.to_string();
    format!("{}{suffix}", fit(base, suffix.len()))
}

/// `base` cut short so that `extra` more characters still fit. `base` must be ASCII.
fn fit(base: &str, extra: usize) -> &str {
    &base[..base.len().min(MAX_HANDLE_LEN.saturating_sub(extra))]
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// Allocates handles against the handle index. The index's conditional create
/// is the only thing that decides ownership; availability lookups are for
/// display.
#[derive(Clone)]
pub struct HandleAllocator {
    index: Arc<dyn HandleIndex>,
    profiles: Arc<dyn ProfileStore>,
    clock: Arc<dyn Clock>,
    config: AllocatorConfig,
}

impl HandleAllocator {
    pub fn new(
        index: Arc<dyn HandleIndex>,
        profiles: Arc<dyn ProfileStore>,
        clock: Arc<dyn Clock>,
        config: AllocatorConfig,
    ) -> Self {
        Self {
            index,
            profiles,
            clock,
            config,
        }
    }

    #[instrument(name = "handles.check_availability", skip(self))]
    pub async fn check_availability(&self, candidate: &str) -> Result<Availability> {
        Ok(match self.owner_of(candidate).await? {
            Some(_) => Availability::Taken,
            None => Availability::Available,
        })
    }

    pub async fn owner_of(&self, handle: &str) -> Result<Option<String>> {
        let key = normalize_handle(handle);
        Ok(bounded(self.config.store_timeout, self.index.owner(&key)).await?)
    }

    /// Claims `candidate` for `uid` with a single conditional create on the
    /// index. Returns the normalized key that was claimed.
    #[instrument(name = "handles.reserve_handle", skip(self))]
    pub async fn reserve_handle(&self, candidate: &str, uid: &str) -> Result<String> {
        let report = validate_handle(candidate);
        if !report.valid {
            return Err(Error::validation(candidate, report));
        }

        let key = normalize_handle(candidate);
        if !bounded(self.config.store_timeout, self.index.claim(&key, uid)).await? {
            debug!("handle already claimed");
            return Err(Error::handle_taken(key));
        }
        Ok(key)
    }

    /// Undoes a reservation made by `uid`. Entries owned by anyone else are left alone.
    pub async fn release_handle(&self, handle: &str, uid: &str) -> Result<bool> {
        let key = normalize_handle(handle);
        Ok(bounded(self.config.store_timeout, self.index.release(&key, uid)).await?)
    }

    /// Reserves the first free candidate in `base`, `base1`, `base2`, ...
    /// skipping candidates that fail validation. A candidate already held by
    /// `uid` counts as reserved, so a retried allocation lands on the same key.
    #[instrument(name = "handles.generate_unique_handle", skip(self))]
    pub async fn generate_unique_handle(&self, base: &str, uid: &str) -> Result<String> {
        let base = normalize_base(base);

        for attempt in 0..self.config.max_attempts {
            let candidate = nth_candidate(&base, attempt);
            if !validate_handle(&candidate).valid {
                continue;
            }
            match self.reserve_handle(&candidate, uid).await {
                Ok(handle) => {
                    info!(attempt, "allocated @{handle}");
                    return Ok(handle);
                }
                Err(Error::HandleTaken { handle }) => {
                    if self.owner_of(&handle).await?.as_deref() == Some(uid) {
                        info!(attempt, "@{handle} already reserved for this uid");
                        return Ok(handle);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        warn!("handle allocation exhausted");
        Err(Error::AllocationExhausted {
            base,
            attempts: self.config.max_attempts,
        })
    }

    /// Up to three free, valid alternatives for a taken candidate: a numeric
    /// suffix, an underscore variant, then "real"/"the" prefixes. Long bases
    /// are cut short to make room. Empty when the candidate is free or invalid.
    #[instrument(name = "handles.suggest_alternatives", skip(self))]
    pub async fn suggest_alternatives(&self, candidate: &str) -> Result<Vec<String>> {
        if !validate_handle(candidate).valid
            || self.check_availability(candidate).await? != Availability::Taken
        {
            return Ok(Vec::new());
        }

        let base = normalize_handle(candidate);
        let mut suggestions = Vec::with_capacity(MAX_SUGGESTIONS);

        if let Some(s) = self.first_free((1..=SUGGESTION_TRIES).map(|n| nth_candidate(&base, n as usize))).await? {
            suggestions.push(s);
        }
        if let Some(s) = self.first_free((1..=SUGGESTION_TRIES).map(|n| format!("{}_{n}", fit(&base, 2)))).await? {
            suggestions.push(s);
        }
        for prefix in ["real", "the"] {
            if suggestions.len() >= MAX_SUGGESTIONS {
                break;
            }
            let candidate = format!("{prefix}{}", capitalize(fit(&base, prefix.len())));
            if let Some(s) = self.first_free(std::iter::once(candidate)).await? {
                suggestions.push(s);
            }
        }

        suggestions.truncate(MAX_SUGGESTIONS);
        Ok(suggestions)
    }

    async fn first_free(&self, candidates: impl Iterator<Item = String>) -> Result<Option<String>> {
        for candidate in candidates {
            if !validate_handle(&candidate).valid {
                continue;
            }
            if self.check_availability(&candidate).await? == Availability::Available {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Moves `uid` to `new_handle`. The new key is claimed before the profile
    /// is touched and the old key released only after the profile points at
    /// the new one, so the profile's handle is always backed by an index entry.
    /// Once the profile points at the new handle the change stands, even if
    /// the old key could not be released.
    #[instrument(name = "handles.change_handle", skip(self))]
    pub async fn change_handle(&self, uid: &str, new_handle: &str) -> Result<Profile> {
        let report = validate_handle(new_handle);
        if !report.valid {
            return Err(Error::validation(new_handle, report));
        }
        let new_handle = new_handle.trim();
        let timeout = self.config.store_timeout;

        let profile = bounded(timeout, self.profiles.get(uid))
            .await?
            .ok_or_else(|| Error::profile_not_found(uid))?;
        let old_key = normalize_handle(&profile.handle);
        let same_key = old_key == normalize_handle(new_handle);

        let new_key = if same_key {
            None
        } else {
            match self.reserve_handle(new_handle, uid).await {
                Ok(key) => Some(key),
                Err(Error::HandleTaken { handle }) => {
                    if self.owner_of(&handle).await?.as_deref() != Some(uid) {
                        return Err(Error::handle_taken(handle));
                    }
                    Some(handle)
                }
                Err(e) => return Err(e),
            }
        };

        let update = ProfileUpdate::SetHandle(new_handle.to_owned());
        let precondition = Precondition {
            handle: Some(profile.handle.clone()),
            ..Default::default()
        };
        let now = self.clock.now();
        let applied = bounded(
            timeout,
            self.profiles.conditional_update(uid, &update, &precondition, now),
        )
        .await?;

        if !applied {
            if let Some(key) = &new_key {
                bounded(timeout, self.index.release(key, uid)).await?;
            }
            warn!("profile handle changed underneath us");
            return Err(StoreError::Unavailable(format!("handle of '{uid}' changed concurrently")).into());
        }
        if new_key.is_some() {
            if let Err(e) = bounded(timeout, self.index.release(&old_key, uid)).await {
                warn!("could not release @{old_key}: {e}");
            }
        }
        info!("@{} is now @{new_handle}", profile.handle);

        let mut updated = profile;
        update.apply(&mut updated, now);
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_base_strips_and_lowercases() {
        assert_eq!(normalize_base("Night Owl!"), "nightowl");
        assert_eq!(normalize_base("j.doe+tag"), "jdoetag");
        assert_eq!(normalize_base("✨✨"), FALLBACK_BASE);
        assert_eq!(normalize_base(""), FALLBACK_BASE);
    }

    #[test]
    fn candidates_are_sequential() {
        let seq: Vec<_> = (0..4).map(|n| nth_candidate("alice", n)).collect();
        assert_eq!(seq, ["alice", "alice1", "alice2", "alice3"]);
    }

    #[test]
    fn candidates_stay_within_max_len() {
        let base = "abcdefghijklmnopqrstuvwxyz";
        assert_eq!(nth_candidate(base, 0), "abcdefghijklmnopqrst");
        assert_eq!(nth_candidate(base, 7), "abcdefghijklmnopqrs7");
        assert_eq!(nth_candidate(base, 42), "abcdefghijklmnopqr42");
        for n in 0..100 {
            assert!(nth_candidate(base, n).len() <= MAX_HANDLE_LEN);
        }
    }

    #[test]
    fn fit_leaves_room_for_extra() {
        let base = "abcdefghijklmnopqrst";
        assert_eq!(fit(base, 2), "abcdefghijklmnopqr");
        assert_eq!(fit("abc", 4), "abc");
    }

    #[test]
    fn capitalize_first_letter() {
        assert_eq!(capitalize("alice"), "Alice");
        assert_eq!(capitalize(""), "");
    }
}
