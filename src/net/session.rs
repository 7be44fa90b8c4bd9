//! Session state for authenticated connections.
//!
//! A session exists exactly as long as its channel is connected: the
//! login handler registers it, heartbeats refresh it, and the reactor
//! drops it unconditionally on close.

use super::endpoint::EndPoint;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("no session registered for endpoint {0}")]
    UnknownEndpoint(EndPoint),
}

/// Server-side record of one authenticated connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: u64,
    pub local: EndPoint,
    pub remote: EndPoint,
    pub session_start_ts: i64,
    pub last_heartbeat_ack_ts: i64,
}

/// Snowflake-style id source: millisecond timestamp, worker bits and a
/// per-millisecond sequence. Ids are unique under concurrent generation
/// and roughly time-ordered.
struct SessionIdGenerator {
    worker_id: u16,
    state: Mutex<IdState>,
}

struct IdState {
    last_ts: i64,
    sequence: u16,
}

const WORKER_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const SEQUENCE_MASK: u16 = (1 << SEQUENCE_BITS) - 1;

impl SessionIdGenerator {
    fn new(worker_id: u16) -> Self {
        Self {
            worker_id: worker_id & ((1 << WORKER_BITS) - 1),
            state: Mutex::new(IdState {
                last_ts: 0,
                sequence: 0,
            }),
        }
    }

    fn next(&self) -> u64 {
        let mut state = self.state.lock().unwrap();
        let mut ts = now_millis();
        if ts < state.last_ts {
            // Clock went backwards; stay on the last timestamp so ids
            // remain monotonic.
            ts = state.last_ts;
        }
        if ts == state.last_ts {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                // Sequence exhausted for this millisecond.
                while ts <= state.last_ts {
                    ts = now_millis();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_ts = ts;

        (ts as u64) << (WORKER_BITS + SEQUENCE_BITS)
            | (self.worker_id as u64) << SEQUENCE_BITS
            | state.sequence as u64
    }
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Endpoint-keyed session registry. Reads are concurrent; structural
/// mutation is synchronized through the write lock.
pub struct SessionManager {
    sessions: RwLock<HashMap<EndPoint, Session>>,
    ids: SessionIdGenerator,
}

impl SessionManager {
    pub fn new(worker_id: u16) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ids: SessionIdGenerator::new(worker_id),
        }
    }

    /// Register a session for a freshly authenticated connection. The
    /// first registration for an endpoint wins; a duplicate call is a
    /// no-op returning the existing id.
    pub fn add_session(&self, local: EndPoint, remote: EndPoint) -> u64 {
        let mut sessions = self.sessions.write().unwrap();
        if let Some(existing) = sessions.get(&remote) {
            return existing.session_id;
        }
        let now = now_millis();
        let session = Session {
            session_id: self.ids.next(),
            local,
            remote,
            session_start_ts: now,
            last_heartbeat_ack_ts: now,
        };
        let id = session.session_id;
        debug!(
            session_id = id,
            local = %session.local,
            remote = %session.remote,
            start_ts = session.session_start_ts,
            "session registered"
        );
        sessions.insert(remote, session);
        id
    }

    /// Refresh the heartbeat ack timestamp for a live session.
    pub fn update_session(&self, remote: EndPoint) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().unwrap();
        match sessions.get_mut(&remote) {
            Some(session) => {
                let now = now_millis();
                trace!(
                    remote = %remote,
                    since_last_ms = now - session.last_heartbeat_ack_ts,
                    "heartbeat ack"
                );
                session.last_heartbeat_ack_ts = now;
                Ok(())
            }
            None => Err(SessionError::UnknownEndpoint(remote)),
        }
    }

    /// Drop the session for a closed channel. Unconditional and
    /// idempotent.
    pub fn remove_session(&self, remote: EndPoint) {
        if self.sessions.write().unwrap().remove(&remote).is_some() {
            debug!(remote = %remote, "session removed");
        }
    }

    pub fn get(&self, remote: EndPoint) -> Option<Session> {
        self.sessions.read().unwrap().get(&remote).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().unwrap().is_empty()
    }
}
