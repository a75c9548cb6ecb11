use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize, Serializer};
use time::{Duration, OffsetDateTime};

/// What the identity provider tells us about a signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub provider: String,
    pub email_verified: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Premium,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Premium => "premium",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Tier::Free),
            "premium" => Ok(Tier::Premium),
            other => Err(format!("unknown tier '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quota {
    pub sent_count: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub window_start: OffsetDateTime,
    #[serde(serialize_with = "whole_seconds")]
    pub window_length: Duration,
    pub capacity: u32,
}

impl Quota {
    pub fn fresh(now: OffsetDateTime, window_length: Duration, capacity: u32) -> Self {
        Self {
            sent_count: 0,
            window_start: now,
            window_length,
            capacity,
        }
    }

    pub fn window_end(&self) -> OffsetDateTime {
        self.window_start + self.window_length
    }

    pub fn is_elapsed(&self, now: OffsetDateTime) -> bool {
        now >= self.window_end()
    }

    /// `sent_count` as it should be read at `now`: zero once the window is over,
    /// whether or not the reset has been written yet.
    pub fn effective_sent(&self, now: OffsetDateTime) -> u32 {
        if self.is_elapsed(now) { 0 } else { self.sent_count }
    }

    /// When the count will next read as zero.
    pub fn next_reset(&self, now: OffsetDateTime) -> OffsetDateTime {
        if self.is_elapsed(now) {
            now + self.window_length
        } else {
            self.window_end()
        }
    }
}

fn whole_seconds<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_i64(d.whole_seconds())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub uid: String,
    pub handle: String,
    pub display_name: String,
    pub tier: Tier,
    pub quota: Quota,
    pub total_messages: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Profile {
    pub fn is_premium(&self) -> bool {
        self.tier == Tier::Premium
    }
}
