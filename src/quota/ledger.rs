use std::{sync::Arc, time::Duration};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::{
    clock::Clock,
    db::{Profile, Quota, Tier},
    error::{Error, Result, StoreError},
    store::{CounterDelta, Precondition, ProfileStore, ProfileUpdate, bounded},
};

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub store_timeout: Duration,
    /// How many times `consume` re-reads after a guarded write did not apply.
    pub max_retries: usize,
    pub event_buffer: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(5),
            max_retries: 8,
            event_buffer: 64,
        }
    }
}

/// Where a free profile sits within its current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "sent", rename_all = "snake_case")]
pub enum QuotaState {
    Fresh,
    Accumulating(u32),
    Exhausted,
}

impl QuotaState {
    pub fn of(quota: &Quota, now: OffsetDateTime) -> Self {
        match quota.effective_sent(now) {
            0 if quota.capacity > 0 => QuotaState::Fresh,
            n if n >= quota.capacity => QuotaState::Exhausted,
            n => QuotaState::Accumulating(n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Remaining {
    Limited(u32),
    Unlimited,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Consumed {
    pub remaining: Remaining,
    pub used: u32,
    pub capacity: u32,
    pub is_premium: bool,
}

/// What the presentation layer renders for a profile's allowance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaSnapshot {
    pub used: u32,
    pub total: u32,
    pub remaining: u32,
    pub percentage: f64,
    pub is_premium: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_reset: Option<OffsetDateTime>,
}

impl QuotaSnapshot {
    pub fn of(profile: &Profile, now: OffsetDateTime) -> Self {
        let quota = &profile.quota;
        let used = quota.effective_sent(now);
        let percentage = if quota.capacity == 0 {
            100.0
        } else {
            f64::from(used) / f64::from(quota.capacity) * 100.0
        };
        Self {
            used,
            total: quota.capacity,
            remaining: quota.capacity.saturating_sub(used),
            percentage,
            is_premium: profile.is_premium(),
            next_reset: (!profile.is_premium()).then(|| quota.next_reset(now)),
        }
    }
}

/// Published after every state change. Nothing in the ledger waits on
/// subscribers; with none attached the events are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaEvent {
    Consumed { uid: String, remaining: Remaining },
    Rejected { uid: String, next_reset: OffsetDateTime },
    WindowReset { uid: String, window_start: OffsetDateTime },
    TierChanged { uid: String, tier: Tier },
}

/// Meters sends per profile. All counter changes are guarded store-level
/// writes; the ledger never writes back a count it computed itself.
#[derive(Clone)]
pub struct QuotaLedger {
    store: Arc<dyn ProfileStore>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<QuotaEvent>,
    config: LedgerConfig,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn ProfileStore>, clock: Arc<dyn Clock>, config: LedgerConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            store,
            clock,
            events,
            config,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QuotaEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: QuotaEvent) {
        let _ = self.events.send(event);
    }

    async fn load(&self, uid: &str) -> Result<Profile> {
        bounded(self.config.store_timeout, self.store.get(uid))
            .await?
            .ok_or_else(|| Error::profile_not_found(uid))
    }

    /// Read-only check. An elapsed window reads as empty without being reset.
    #[instrument(name = "quota.can_consume", skip(self))]
    pub async fn can_consume(&self, uid: &str) -> Result<bool> {
        let profile = self.load(uid).await?;
        if profile.is_premium() {
            return Ok(true);
        }
        let quota = &profile.quota;
        Ok(quota.effective_sent(self.clock.now()) < quota.capacity)
    }

    #[instrument(name = "quota.limits", skip(self))]
    pub async fn limits(&self, uid: &str) -> Result<QuotaSnapshot> {
        let profile = self.load(uid).await?;
        Ok(QuotaSnapshot::of(&profile, self.clock.now()))
    }

    #[instrument(name = "quota.state", skip(self))]
    pub async fn state(&self, uid: &str) -> Result<Option<QuotaState>> {
        let profile = self.load(uid).await?;
        if profile.is_premium() {
            return Ok(None);
        }
        Ok(Some(QuotaState::of(&profile.quota, self.clock.now())))
    }

    /// Records one send. Premium profiles only bump `total_messages`. Free
    /// profiles get a lazy window reset when due, then a capacity-guarded
    /// increment of both counters in one store write.
    ///
    /// A reset is conditional on the window start the caller saw, so callers
    /// racing on the same rollover produce exactly one reset; the losers
    /// re-read and increment on top of it.
    #[instrument(name = "quota.consume", skip(self))]
    pub async fn consume(&self, uid: &str) -> Result<Consumed> {
        let timeout = self.config.store_timeout;

        for _ in 0..=self.config.max_retries {
            let profile = self.load(uid).await?;
            let now = self.clock.now();
            let quota = &profile.quota;

            if profile.is_premium() {
                let guard = Precondition {
                    tier: Some(Tier::Premium),
                    ..Default::default()
                };
                let updated = bounded(
                    timeout,
                    self.store.atomic_increment(uid, CounterDelta::total_only(), &guard, now),
                )
                .await?;
                let Some(updated) = updated else {
                    debug!("tier changed during premium send, retrying");
                    continue;
                };
                self.publish(QuotaEvent::Consumed {
                    uid: uid.to_owned(),
                    remaining: Remaining::Unlimited,
                });
                return Ok(Consumed {
                    remaining: Remaining::Unlimited,
                    used: updated.quota.sent_count,
                    capacity: updated.quota.capacity,
                    is_premium: true,
                });
            }

            if quota.is_elapsed(now) {
                let update = ProfileUpdate::ResetWindow { window_start: now };
                let guard = Precondition {
                    window_start: Some(quota.window_start),
                    ..Default::default()
                };
                let applied = bounded(
                    timeout,
                    self.store.conditional_update(uid, &update, &guard, now),
                )
                .await?;
                if applied {
                    info!("window rolled over");
                    self.publish(QuotaEvent::WindowReset {
                        uid: uid.to_owned(),
                        window_start: now,
                    });
                }
                continue;
            }

            if quota.sent_count >= quota.capacity {
                debug!(sent = quota.sent_count, "quota exhausted");
                let next_reset = quota.window_end();
                self.publish(QuotaEvent::Rejected {
                    uid: uid.to_owned(),
                    next_reset,
                });
                return Err(Error::QuotaExceeded {
                    capacity: quota.capacity,
                    next_reset,
                });
            }

            let guard = Precondition {
                tier: Some(Tier::Free),
                sent_below_capacity: true,
                ..Default::default()
            };
            let updated = bounded(
                timeout,
                self.store.atomic_increment(uid, CounterDelta::send(), &guard, now),
            )
            .await?;
            let Some(updated) = updated else {
                debug!("guarded increment lost a race, retrying");
                continue;
            };

            let remaining = updated.quota.capacity.saturating_sub(updated.quota.sent_count);
            self.publish(QuotaEvent::Consumed {
                uid: uid.to_owned(),
                remaining: Remaining::Limited(remaining),
            });
            return Ok(Consumed {
                remaining: Remaining::Limited(remaining),
                used: updated.quota.sent_count,
                capacity: updated.quota.capacity,
                is_premium: false,
            });
        }

        warn!("gave up after {} retries", self.config.max_retries);
        Err(StoreError::Unavailable(format!("too much contention on '{uid}'")).into())
    }

    /// Upgrades or downgrades a profile. Counters are left as they are.
    #[instrument(name = "quota.set_tier", skip(self))]
    pub async fn set_tier(&self, uid: &str, tier: Tier) -> Result<Profile> {
        let applied = bounded(
            self.config.store_timeout,
            self.store.conditional_update(
                uid,
                &ProfileUpdate::SetTier(tier),
                &Precondition::default(),
                self.clock.now(),
            ),
        )
        .await?;
        if !applied {
            return Err(Error::profile_not_found(uid));
        }
        info!("tier set to {tier}");
        self.publish(QuotaEvent::TierChanged {
            uid: uid.to_owned(),
            tier,
        });
        self.load(uid).await
    }
}
