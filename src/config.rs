use std::{fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, anyhow, bail};

use crate::{handles::AllocatorConfig, profiles::BootstrapConfig, quota::LedgerConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    /// Base URL the OAuth providers redirect back to.
    pub public_url: String,
    pub client_secrets: PathBuf,
    pub free_capacity: u32,
    pub window_days: i64,
    pub store_timeout: Duration,
    pub max_handle_attempts: usize,
    pub session_inactivity_minutes: i64,
}

impl Config {
    /// Reads the process environment, after loading `.env` if there is one.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL must be set")?;
        let window_days: i64 = parse_or(&lookup, "WINDOW_DAYS", 7)?;
        if window_days < 1 {
            bail!("WINDOW_DAYS={window_days}: the quota window must be at least one day");
        }

        Ok(Self {
            database_url,
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_owned()),
            public_url: lookup("PUBLIC_URL").unwrap_or_else(|| "http://localhost:8080".to_owned()),
            client_secrets: lookup("CLIENT_SECRETS")
                .unwrap_or_else(|| "client_secret.json".to_owned())
                .into(),
            free_capacity: parse_or(&lookup, "FREE_CAPACITY", 5)?,
            window_days,
            store_timeout: Duration::from_millis(parse_or(&lookup, "STORE_TIMEOUT_MS", 5000)?),
            max_handle_attempts: parse_or(&lookup, "MAX_HANDLE_ATTEMPTS", 100)?,
            session_inactivity_minutes: parse_or(&lookup, "SESSION_INACTIVITY_MINUTES", 30)?,
        })
    }

    pub fn allocator(&self) -> AllocatorConfig {
        AllocatorConfig {
            max_attempts: self.max_handle_attempts,
            store_timeout: self.store_timeout,
        }
    }

    pub fn ledger(&self) -> LedgerConfig {
        LedgerConfig {
            store_timeout: self.store_timeout,
            ..Default::default()
        }
    }

    pub fn bootstrap(&self) -> BootstrapConfig {
        BootstrapConfig {
            capacity: self.free_capacity,
            window_length: time::Duration::days(self.window_days),
            store_timeout: self.store_timeout,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e| anyhow!("{key}={raw}: {e}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup(&[("DATABASE_URL", "sqlite://test.db")])).unwrap();
        assert_eq!(config.free_capacity, 5);
        assert_eq!(config.window_days, 7);
        assert_eq!(config.max_handle_attempts, 100);
        assert_eq!(config.store_timeout, Duration::from_secs(5));
        assert_eq!(config.bootstrap().window_length, time::Duration::days(7));
    }

    #[test]
    fn database_url_is_required() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
    }

    #[test]
    fn overrides_and_bad_values() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("FREE_CAPACITY", "10"),
            ("STORE_TIMEOUT_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(config.bootstrap().capacity, 10);
        assert_eq!(config.ledger().store_timeout, Duration::from_millis(250));

        let err = Config::from_lookup(lookup(&[("DATABASE_URL", "x"), ("WINDOW_DAYS", "soon")])).unwrap_err();
        assert!(err.to_string().contains("WINDOW_DAYS"));
    }

    #[test]
    fn window_must_be_at_least_a_day() {
        for days in ["0", "-3"] {
            let err = Config::from_lookup(lookup(&[("DATABASE_URL", "x"), ("WINDOW_DAYS", days)])).unwrap_err();
            assert!(err.to_string().contains("at least one day"), "{err}");
        }
        let config = Config::from_lookup(lookup(&[("DATABASE_URL", "x"), ("WINDOW_DAYS", "1")])).unwrap();
        assert_eq!(config.bootstrap().window_length, time::Duration::days(1));
    }
}
