//! Per-session conversation history, in memory for the process lifetime.
//!
//! A session's history is always the full turn sequence of its most recent
//! dispatch: `replace` overwrites, it never merges. The store is bounded:
//! - `max_turns` trims old turns on write, cutting at a user turn
//! - `max_sessions` evicts the least recently written sessions
//! - `ttl_secs` expires idle sessions (expired sessions load as empty)
//!
//! `lock_session` hands out a per-session async mutex so that a whole
//! load → dispatch → replace cycle can be serialized per session. A lock
//! entry lives only while some dispatch holds or waits on it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::types::{Message, Role};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Maximum turns kept per session (0 = unbounded).
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// Maximum sessions kept (0 = unbounded).
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Idle time after which a session is dropped (0 = never).
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_max_turns() -> usize {
    40
}

fn default_max_sessions() -> usize {
    10_000
}

fn default_ttl_secs() -> u64 {
    86_400
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_sessions: default_max_sessions(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone)]
struct SessionRecord {
    turns: Vec<Message>,
    updated_at: DateTime<Utc>,
    /// Write order, for eviction. Timestamps can tie.
    seq: u64,
}

#[derive(Default)]
struct Sessions {
    records: HashMap<String, SessionRecord>,
    next_seq: u64,
}

type SessionLocks = Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>;

pub struct HistoryStore {
    config: HistoryConfig,
    sessions: RwLock<Sessions>,
    locks: SessionLocks,
}

/// Holds a session's dispatch lock. Dropping it releases the lock and
/// removes the session's entry once nobody else holds or awaits it.
pub struct SessionGuard {
    guard: Option<OwnedMutexGuard<()>>,
    session_id: String,
    locks: SessionLocks,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.session_id);
        }
    }
}

impl HistoryStore {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(Sessions::default()),
            locks: Arc::default(),
        }
    }

    /// Turns stored for `session_id`; empty if unseen or expired.
    pub async fn load(&self, session_id: &str) -> Vec<Message> {
        let now = Utc::now();
        let sessions = self.sessions.read().await;
        match sessions.records.get(session_id) {
            Some(record) if !self.is_expired(record, now) => record.turns.clone(),
            _ => Vec::new(),
        }
    }

    /// Replace the history of `session_id` with `turns`.
    ///
    /// An empty id or an empty turn list is a no-op: an existing session is
    /// never cleared by an empty write.
    pub async fn replace(&self, session_id: &str, turns: Vec<Message>) {
        if session_id.is_empty() || turns.is_empty() {
            return;
        }
        let turns = trim_turns(turns, self.config.max_turns);
        let now = Utc::now();

        let evicted = {
            let mut sessions = self.sessions.write().await;
            let seq = sessions.next_seq;
            sessions.next_seq += 1;
            sessions.records.insert(
                session_id.to_string(),
                SessionRecord {
                    turns,
                    updated_at: now,
                    seq,
                },
            );

            let mut evicted: Vec<String> = sessions
                .records
                .iter()
                .filter(|(_, record)| self.is_expired(record, now))
                .map(|(id, _)| id.clone())
                .collect();
            for id in &evicted {
                sessions.records.remove(id);
            }

            let max_sessions = self.config.max_sessions;
            if max_sessions > 0 && sessions.records.len() > max_sessions {
                let mut by_age: Vec<(u64, String)> = sessions
                    .records
                    .iter()
                    .map(|(id, record)| (record.seq, id.clone()))
                    .collect();
                by_age.sort_unstable();
                let excess = sessions.records.len() - max_sessions;
                for (_, id) in by_age.into_iter().take(excess) {
                    sessions.records.remove(&id);
                    evicted.push(id);
                }
            }
            evicted
        };

        if !evicted.is_empty() {
            tracing::debug!(count = evicted.len(), "Evicted session histories");
        }
    }

    /// Acquire the per-session dispatch lock. Held until the guard drops.
    pub async fn lock_session(&self, session_id: &str) -> SessionGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries left behind by waiters that were cancelled.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let guard = lock.lock_owned().await;
        SessionGuard {
            guard: Some(guard),
            session_id: session_id.to_string(),
            locks: self.locks.clone(),
        }
    }

    /// Number of stored sessions, expired ones included until purged.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn is_expired(&self, record: &SessionRecord, now: DateTime<Utc>) -> bool {
        if self.config.ttl_secs == 0 {
            return false;
        }
        let idle = now.signed_duration_since(record.updated_at);
        idle.num_seconds() >= 0 && idle.num_seconds() as u64 >= self.config.ttl_secs
    }
}

/// Keep at most `max_turns` of the newest turns, starting at a user turn
/// when the retained window contains one.
fn trim_turns(mut turns: Vec<Message>, max_turns: usize) -> Vec<Message> {
    if max_turns == 0 || turns.len() <= max_turns {
        return turns;
    }
    let window_start = turns.len() - max_turns;
    let cut = turns[window_start..]
        .iter()
        .position(|m| m.role == Role::User)
        .map(|offset| window_start + offset)
        .unwrap_or(window_start);
    turns.split_off(cut)
}
