//! Redis-backed session store
//!
//! Layout, under the configured key prefix:
//! - `session:{id}`: JSON record
//! - `pending`: sorted set of pending ids scored by deadline in epoch millis
//! - `user:{user_id}:pending`: set of the account's pending ids
//! - `events:{id}`: pub/sub channel carrying every applied record
//!
//! Insertion and compare-and-set run as Lua scripts, so each one is a single
//! atomic step on the server. The deadline check inside compare-and-set reads
//! the server's own clock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::cache::RedisPool;
use common::error::{StoreError, StoreResult};
use futures::StreamExt;
use redis::{AsyncCommands, Script};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::{CasOutcome, SessionFeed, SessionStore, ensure_transition};
use crate::models::{Session, SessionId, SessionStatus};

const INSERT_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
redis.call('SET', KEYS[1], ARGV[1])
redis.call('ZADD', KEYS[2], ARGV[2], ARGV[3])
redis.call('SADD', KEYS[3], ARGV[3])
return 1
"#;

// KEYS: record, pending index, events channel, account's pending set
// Returns {code, record}: 0 missing, 1 conflict, 2 lapsed, 3 applied
const CAS_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
  return {0, ''}
end
local current = cjson.decode(raw)
if current.status ~= ARGV[1] then
  return {1, raw}
end
if ARGV[3] ~= 'expired' then
  local t = redis.call('TIME')
  local now_ms = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
  if now_ms >= tonumber(current.expires_at_ms) then
    return {2, raw}
  end
end
redis.call('SET', KEYS[1], ARGV[2])
redis.call('ZREM', KEYS[2], ARGV[4])
redis.call('SREM', KEYS[4], ARGV[4])
redis.call('PUBLISH', KEYS[3], ARGV[2])
return {3, ARGV[2]}
"#;

/// Stored form of a session: the deadline is duplicated in millis so the
/// scripts can compare it without parsing timestamps
#[derive(Serialize, Deserialize)]
struct Record {
    #[serde(flatten)]
    session: Session,
    expires_at_ms: i64,
}

impl Record {
    fn encode(session: &Session) -> StoreResult<String> {
        let record = Record {
            session: session.clone(),
            expires_at_ms: session.expires_at.timestamp_millis(),
        };
        serde_json::to_string(&record).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    fn decode(raw: &str) -> StoreResult<Session> {
        serde_json::from_str::<Record>(raw)
            .map(|record| record.session)
            .map_err(|e| StoreError::Corrupt(e.to_string()))
    }
}

/// Session store kept in Redis
#[derive(Clone)]
pub struct RedisSessionStore {
    pool: RedisPool,
    insert: Script,
    cas: Script,
}

impl RedisSessionStore {
    pub fn new(pool: RedisPool) -> Self {
        info!("Using Redis session store");
        Self {
            pool,
            insert: Script::new(INSERT_SCRIPT),
            cas: Script::new(CAS_SCRIPT),
        }
    }

    fn session_key(&self, id: &SessionId) -> String {
        self.pool.key(&format!("session:{}", id))
    }

    fn pending_key(&self) -> String {
        self.pool.key("pending")
    }

    fn user_pending_key(&self, user_id: Uuid) -> String {
        self.pool.key(&format!("user:{}:pending", user_id))
    }

    fn channel(&self, id: &SessionId) -> String {
        self.pool.key(&format!("events:{}", id))
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn insert(&self, session: &Session) -> StoreResult<bool> {
        let mut conn = self.pool.connection().await?;
        let inserted: i64 = self
            .insert
            .key(self.session_key(&session.id))
            .key(self.pending_key())
            .key(self.user_pending_key(session.user_id))
            .arg(Record::encode(session)?)
            .arg(session.expires_at.timestamp_millis())
            .arg(session.id.as_str())
            .invoke_async(&mut conn)
            .await?;
        Ok(inserted == 1)
    }

    async fn get(&self, id: &SessionId) -> StoreResult<Option<Session>> {
        self.pool
            .get(&self.session_key(id))
            .await?
            .map(|raw| Record::decode(&raw))
            .transpose()
    }

    async fn compare_and_set(
        &self,
        expected: SessionStatus,
        next: &Session,
    ) -> StoreResult<CasOutcome> {
        ensure_transition(expected, next)?;
        let mut conn = self.pool.connection().await?;
        let (code, raw): (i64, String) = self
            .cas
            .key(self.session_key(&next.id))
            .key(self.pending_key())
            .key(self.channel(&next.id))
            .key(self.user_pending_key(next.user_id))
            .arg(expected.as_str())
            .arg(Record::encode(next)?)
            .arg(next.status.as_str())
            .arg(next.id.as_str())
            .invoke_async(&mut conn)
            .await?;

        match code {
            0 => Ok(CasOutcome::Missing),
            1 => Ok(CasOutcome::Conflict(Record::decode(&raw)?)),
            2 => Ok(CasOutcome::Lapsed(Record::decode(&raw)?)),
            3 => Ok(CasOutcome::Applied),
            other => Err(StoreError::Corrupt(format!(
                "unexpected compare-and-set reply {}",
                other
            ))),
        }
    }

    async fn due_pending(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<SessionId>> {
        let mut conn = self.pool.connection().await?;
        // Exclusive upper bound: expires_at < now
        let max = format!("({}", now.timestamp_millis());
        let ids: Vec<String> = conn
            .zrangebyscore_limit(self.pending_key(), "-inf", max, 0, limit as isize)
            .await?;

        Ok(ids
            .iter()
            .filter_map(|raw| {
                let id = SessionId::parse(raw);
                if id.is_none() {
                    warn!("Skipping malformed id in pending index: {}", raw);
                }
                id
            })
            .collect())
    }

    async fn pending_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Session>> {
        let mut conn = self.pool.connection().await?;
        let ids: Vec<String> = conn.smembers(self.user_pending_key(user_id)).await?;
        let keys: Vec<String> = ids
            .iter()
            .filter_map(|raw| SessionId::parse(raw))
            .map(|id| self.session_key(&id))
            .collect();
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let raws: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        // The set may briefly hold ids whose deadline passed but the reaper
        // has not expired yet
        let now = Utc::now();
        let mut sessions = Vec::with_capacity(raws.len());
        for raw in raws.into_iter().flatten() {
            let session = Record::decode(&raw)?;
            if session.status == SessionStatus::Pending && !session.is_past_deadline(now) {
                sessions.push(session);
            }
        }
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    async fn subscribe(&self, id: &SessionId) -> StoreResult<SessionFeed> {
        let mut pubsub = self.pool.pubsub().await?;
        pubsub.subscribe(self.channel(id)).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Dropping unreadable session notification: {}", e);
                    return None;
                }
            };
            match Record::decode(&payload) {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!("Dropping undecodable session notification: {}", e);
                    None
                }
            }
        });
        Ok(SessionFeed::new(stream))
    }

    async fn health_check(&self) -> StoreResult<bool> {
        self.pool.health_check().await
    }
}
