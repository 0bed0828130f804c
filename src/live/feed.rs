//! Redis-backed storage for live match state.
//!
//! The current state of a match lives under `live:match:{id}` with a TTL. Writers
//! take a per-match `SET NX PX` lock before reading the snapshot, and the snapshot
//! is only written while that lock still holds the writer's token, so every
//! update is applied to the latest version and versions never fork.

use std::time::Duration;

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use fred::{
    clients::Pool as RedisPool,
    interfaces::{KeysInterface, LuaInterface},
    types::{Expiration, SetOptions},
};
use rand::{distr::Alphanumeric, Rng};
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use super::{LiveError, LiveMatchState, LiveStatus, LiveUpdate};
use crate::{
    models::matches::{complete_match, Match, Outcome},
    schema::matches,
};

const LOCK_RETRY: Duration = Duration::from_millis(25);

/// Writes the snapshot only if the lock still holds our token.
const STORE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    redis.call("SET", KEYS[2], ARGV[2], "EX", ARGV[3])
    return 1
end
return 0
"#;

/// Deletes the lock only if it still holds our token.
const UNLOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

fn snapshot_key(match_id: i32) -> String {
    format!("live:match:{match_id}")
}

fn lock_key(match_id: i32) -> String {
    format!("live:lock:{match_id}")
}

pub struct LiveFeed<'a> {
    redis: &'a RedisPool,
    snapshot_ttl_secs: i64,
    backlog: usize,
    lock_timeout: Duration,
    lock_ttl: Duration,
}

struct Lock {
    key: String,
    token: String,
}

impl<'a> LiveFeed<'a> {
    #[must_use]
    pub fn new(redis: &'a RedisPool, config: &crate::Live) -> Self {
        Self {
            redis,
            snapshot_ttl_secs: config.snapshot_ttl_secs,
            backlog: config.backlog,
            lock_timeout: Duration::from_millis(config.lock_timeout_ms),
            lock_ttl: Duration::from_millis(config.lock_ttl_ms),
        }
    }

    async fn cached(&self, match_id: i32) -> anyhow::Result<Option<LiveMatchState>> {
        let raw: Option<String> = self.redis.get(snapshot_key(match_id)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn store(&self, state: &LiveMatchState, lock: &Lock) -> anyhow::Result<()> {
        let serialized = serde_json::to_string(state)?;
        let stored: i64 = self
            .redis
            .eval(
                STORE_SCRIPT,
                vec![lock.key.clone(), snapshot_key(state.match_id)],
                vec![
                    lock.token.clone(),
                    serialized,
                    self.snapshot_ttl_secs.to_string(),
                ],
            )
            .await?;
        if stored == 0 {
            warn!(match_id = state.match_id, "Live lock expired before the snapshot was stored");
            return Err(LiveError::Busy.into());
        }
        Ok(())
    }

    /// Drops the cached state so the next read starts again from the match row.
    ///
    /// # Errors
    /// Fails if Redis is unreachable.
    pub async fn evict(&self, match_id: i32) -> anyhow::Result<()> {
        let _: i64 = self.redis.del(snapshot_key(match_id)).await?;
        Ok(())
    }

    async fn lock(&self, match_id: i32) -> anyhow::Result<Lock> {
        let key = lock_key(match_id);
        let token: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        let expiry = expiry_millis(self.lock_ttl);
        let deadline = tokio::time::Instant::now() + self.lock_timeout;

        loop {
            let acquired: Option<String> = self
                .redis
                .set(
                    key.as_str(),
                    token.as_str(),
                    Some(Expiration::PX(expiry)),
                    Some(SetOptions::NX),
                    false,
                )
                .await?;
            if acquired.is_some() {
                return Ok(Lock { key, token });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(LiveError::Busy.into());
            }
            tokio::time::sleep(LOCK_RETRY).await;
        }
    }

    async fn unlock(&self, lock: Lock) {
        let released: Result<i64, _> = self
            .redis
            .eval(UNLOCK_SCRIPT, lock.key.clone(), lock.token)
            .await;
        match released {
            Ok(1) => {}
            Ok(_) => warn!(key = %lock.key, "Live lock expired before it was released"),
            Err(e) => warn!(key = %lock.key, "Failed to release live lock: {e}"),
        }
    }

    /// The latest state of a match, starting from its row if nothing is cached.
    ///
    /// # Errors
    /// Fails for unknown matches or if Redis or the database can't be read.
    pub async fn state(
        &self,
        conn: &mut AsyncPgConnection,
        match_id: i32,
    ) -> anyhow::Result<LiveMatchState> {
        if let Some(state) = self.cached(match_id).await? {
            return Ok(state);
        }
        let row: Match = matches::table
            .find(match_id)
            .select(Match::as_select())
            .first(conn)
            .await?;
        Ok(initial_state(&row, OffsetDateTime::now_utc()))
    }

    /// Applies one scorer update under the match lock.
    ///
    /// The match row is updated before the snapshot, so a failed write leaves the
    /// cached version untouched. Completing the series runs match completion.
    ///
    /// # Errors
    /// Fails with [`LiveError::Busy`] if the lock can't be taken in time, with
    /// [`LiveError::NotLive`] for matches that are closed, and with whatever
    /// [`LiveMatchState::apply`] rejects.
    #[instrument(skip(self, conn, update), err(Debug))]
    pub async fn publish(
        &self,
        conn: &mut AsyncPgConnection,
        match_id: i32,
        update: LiveUpdate,
        k_factor: f64,
    ) -> anyhow::Result<LiveMatchState> {
        let lock = self.lock(match_id).await?;
        let result = self.publish_locked(conn, &lock, match_id, update, k_factor).await;
        self.unlock(lock).await;
        result
    }

    async fn publish_locked(
        &self,
        conn: &mut AsyncPgConnection,
        lock: &Lock,
        match_id: i32,
        update: LiveUpdate,
        k_factor: f64,
    ) -> anyhow::Result<LiveMatchState> {
        let now = OffsetDateTime::now_utc();
        let mut state = if let Some(state) = self.cached(match_id).await? {
            state
        } else {
            let row: Match = matches::table
                .find(match_id)
                .select(Match::as_select())
                .first(conn)
                .await?;
            if row.is_closed() {
                return Err(LiveError::NotLive.into());
            }
            initial_state(&row, now)
        };

        let version = state.apply(update, self.backlog, now)?;
        if state.status == LiveStatus::Completed {
            complete_match(
                conn,
                match_id,
                Outcome::Maps {
                    maps: state.maps.clone(),
                },
                k_factor,
            )
            .await?;
        } else {
            Match::mirror_live(conn, &state).await?;
        }
        self.store(&state, lock).await?;
        debug!(match_id, version, status = ?state.status, "Live update applied");
        Ok(state)
    }
}

/// `PX` argument for a lock lifetime, at least one millisecond.
fn expiry_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1)
}

fn initial_state(row: &Match, now: OffsetDateTime) -> LiveMatchState {
    LiveMatchState::from_match(
        row.id,
        row.best_of,
        row.status.live_status(),
        row.maps_data.0.clone(),
        now,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bracket::BestOf, models::maps::MapsData, models::matches::MatchStatus};

    #[test]
    fn keys_are_namespaced_per_match() {
        assert_eq!(snapshot_key(42), "live:match:42");
        assert_eq!(lock_key(42), "live:lock:42");
    }

    #[test]
    fn initial_state_follows_the_row() {
        let row = Match {
            id: 5,
            team1_id: 1,
            team2_id: 2,
            team1_score: 0,
            team2_score: 0,
            best_of: BestOf::FIVE,
            status: MatchStatus::Upcoming,
            maps_data: MapsData::default(),
            winner_id: None,
            stage_id: None,
            bracket_code: None,
            scheduled_at: None,
            completed_at: None,
            created_at: OffsetDateTime::UNIX_EPOCH,
        };
        let state = initial_state(&row, OffsetDateTime::UNIX_EPOCH);
        assert_eq!(state.match_id, 5);
        assert_eq!(state.version, 0);
        assert_eq!(state.status, LiveStatus::Upcoming);
        assert_eq!(state.best_of, BestOf::FIVE);
        assert_eq!(state.current_map, 0);
    }

    #[test]
    fn lock_expiry_is_in_whole_millis() {
        assert_eq!(expiry_millis(Duration::from_secs(30)), 30_000);
        assert_eq!(expiry_millis(Duration::ZERO), 1);
    }
}
