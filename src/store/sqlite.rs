use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{
    QueryBuilder, Sqlite, SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use time::{Duration, OffsetDateTime};
use tracing::info;

use crate::{
    db::{Profile, Quota, Tier},
    error::StoreError,
};

use super::{CounterDelta, HandleIndex, Precondition, ProfileStore, ProfileUpdate, StoreResult};

const CREATE_PROFILES: &str = r#"
CREATE TABLE IF NOT EXISTS profiles (
    uid                TEXT PRIMARY KEY NOT NULL,
    handle             TEXT NOT NULL,
    display_name       TEXT NOT NULL,
    tier               TEXT NOT NULL,
    sent_count         INTEGER NOT NULL,
    window_start_ms    INTEGER NOT NULL,
    window_length_secs INTEGER NOT NULL,
    capacity           INTEGER NOT NULL,
    total_messages     INTEGER NOT NULL,
    created_at_ms      INTEGER NOT NULL,
    updated_at_ms      INTEGER NOT NULL
)"#;

const CREATE_HANDLES: &str = r#"
CREATE TABLE IF NOT EXISTS handles (
    handle_key TEXT PRIMARY KEY NOT NULL,
    uid        TEXT NOT NULL
)"#;

/// SQLite-backed store. Conditional creates are `INSERT .. ON CONFLICT DO
/// NOTHING`; guarded writes are a single `UPDATE .. WHERE <precondition>`.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect_with(options)
            .await?;

        let store = Self::new(pool);
        store.migrate().await?;
        info!("connected to {url}");
        Ok(store)
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::query(CREATE_PROFILES).execute(&self.pool).await?;
        sqlx::query(CREATE_HANDLES).execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    uid: String,
    handle: String,
    display_name: String,
    tier: String,
    sent_count: i64,
    window_start_ms: i64,
    window_length_secs: i64,
    capacity: i64,
    total_messages: i64,
    created_at_ms: i64,
    updated_at_ms: i64,
}

impl TryFrom<ProfileRow> for Profile {
    type Error = StoreError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::Corrupt {
            key: row.uid.clone(),
            reason,
        };
        let tier = row.tier.parse::<Tier>().map_err(corrupt)?;
        let sent_count = u32::try_from(row.sent_count)
            .map_err(|_| corrupt(format!("sent_count {}", row.sent_count)))?;
        let capacity = u32::try_from(row.capacity)
            .map_err(|_| corrupt(format!("capacity {}", row.capacity)))?;
        let total_messages = u64::try_from(row.total_messages)
            .map_err(|_| corrupt(format!("total_messages {}", row.total_messages)))?;

        Ok(Profile {
            quota: Quota {
                sent_count,
                window_start: from_ms(row.window_start_ms).map_err(corrupt)?,
                window_length: Duration::seconds(row.window_length_secs),
                capacity,
            },
            tier,
            total_messages,
            created_at: from_ms(row.created_at_ms).map_err(corrupt)?,
            updated_at: from_ms(row.updated_at_ms).map_err(corrupt)?,
            handle: row.handle,
            display_name: row.display_name,
            uid: row.uid,
        })
    }
}

fn to_ms(t: OffsetDateTime) -> i64 {
    (t.unix_timestamp_nanos() / 1_000_000) as i64
}

fn from_ms(ms: i64) -> Result<OffsetDateTime, String> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .map_err(|e| format!("timestamp {ms}: {e}"))
}

fn push_precondition(qb: &mut QueryBuilder<'_, Sqlite>, precondition: &Precondition) {
    if let Some(tier) = precondition.tier {
        qb.push(" AND tier = ").push_bind(tier.as_str());
    }
    if let Some(window_start) = precondition.window_start {
        qb.push(" AND window_start_ms = ").push_bind(to_ms(window_start));
    }
    if let Some(handle) = &precondition.handle {
        qb.push(" AND handle = ").push_bind(handle.clone());
    }
    if precondition.sent_below_capacity {
        qb.push(" AND sent_count < capacity");
    }
}

#[async_trait]
impl ProfileStore for SqliteStore {
    async fn get(&self, uid: &str) -> StoreResult<Option<Profile>> {
        let row: Option<ProfileRow> = sqlx::query_as("SELECT * FROM profiles WHERE uid=?")
            .bind(uid)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Profile::try_from).transpose()
    }

    async fn create_if_absent(&self, profile: &Profile) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO profiles \
             (uid,handle,display_name,tier,sent_count,window_start_ms,window_length_secs,capacity,total_messages,created_at_ms,updated_at_ms) \
             VALUES (?,?,?,?,?,?,?,?,?,?,?) ON CONFLICT(uid) DO NOTHING",
        )
        .bind(&profile.uid)
        .bind(&profile.handle)
        .bind(&profile.display_name)
        .bind(profile.tier.as_str())
        .bind(i64::from(profile.quota.sent_count))
        .bind(to_ms(profile.quota.window_start))
        .bind(profile.quota.window_length.whole_seconds())
        .bind(i64::from(profile.quota.capacity))
        .bind(i64::try_from(profile.total_messages).unwrap_or(i64::MAX))
        .bind(to_ms(profile.created_at))
        .bind(to_ms(profile.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn atomic_increment(
        &self,
        uid: &str,
        delta: CounterDelta,
        precondition: &Precondition,
        now: OffsetDateTime,
    ) -> StoreResult<Option<Profile>> {
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE profiles SET sent_count = sent_count + ");
        qb.push_bind(i64::from(delta.sent_count))
            .push(", total_messages = total_messages + ")
            .push_bind(i64::from(delta.total_messages))
            .push(", updated_at_ms = ")
            .push_bind(to_ms(now))
            .push(" WHERE uid = ")
            .push_bind(uid.to_owned());
        push_precondition(&mut qb, precondition);
        qb.push(" RETURNING *");

        let row: Option<ProfileRow> = qb.build_query_as().fetch_optional(&self.pool).await?;
        row.map(Profile::try_from).transpose()
    }

    async fn conditional_update(
        &self,
        uid: &str,
        update: &ProfileUpdate,
        precondition: &Precondition,
        now: OffsetDateTime,
    ) -> StoreResult<bool> {
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE profiles SET ");
        match update {
            ProfileUpdate::ResetWindow { window_start } => {
                qb.push("sent_count = 0, window_start_ms = ").push_bind(to_ms(*window_start));
            }
            ProfileUpdate::SetTier(tier) => {
                qb.push("tier = ").push_bind(tier.as_str());
            }
            ProfileUpdate::SetHandle(handle) => {
                qb.push("handle = ").push_bind(handle.clone());
            }
        }
        qb.push(", updated_at_ms = ")
            .push_bind(to_ms(now))
            .push(" WHERE uid = ")
            .push_bind(uid.to_owned());
        push_precondition(&mut qb, precondition);

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl HandleIndex for SqliteStore {
    async fn owner(&self, handle_key: &str) -> StoreResult<Option<String>> {
        let owner: Option<(String,)> = sqlx::query_as("SELECT uid FROM handles WHERE handle_key=?")
            .bind(handle_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(owner.map(|(uid,)| uid))
    }

    async fn claim(&self, handle_key: &str, uid: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO handles (handle_key,uid) VALUES (?,?) ON CONFLICT(handle_key) DO NOTHING",
        )
        .bind(handle_key)
        .bind(uid)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, handle_key: &str, uid: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM handles WHERE handle_key=? AND uid=?")
            .bind(handle_key)
            .bind(uid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
