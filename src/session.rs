use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::clock::Clock;
use crate::http::response::{Response, ResponseCookie};

/// Name of the session identifier cookie.
pub const SESSION_COOKIE: &str = "clinplace_session";

/// The session id is rotated once the session is older than this, to limit
/// the window of a fixated identifier. Stored data survives the rotation.
const REGENERATE_INTERVAL_SECS: i64 = 1800;

const USER_KEY: &str = "user";
const AUTHENTICATED_KEY: &str = "user_authenticated";
const LAST_ACTIVITY_KEY: &str = "last_activity";

#[derive(Clone, Debug)]
struct SessionRecord {
    created_at: DateTime<Utc>,
    data: HashMap<String, Value>,
    flash: HashMap<String, Value>,
}

impl SessionRecord {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            data: HashMap::new(),
            flash: HashMap::new(),
        }
    }
}

/// The server-side session store, keyed by session id.
///
/// Concurrent requests sharing one session id are read-modify-write with
/// last-writer-wins semantics; there is no optimistic locking.
///
/// Records of sessions abandoned without a logout are purged opportunistically
/// on the next write, once they outlive both the idle lifetime and the
/// rotation interval, so the map stays bounded by live traffic.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, SessionRecord>>>,
    clock: Arc<dyn Clock>,
    lifetime_secs: i64,
}

impl SessionStore {
    /// Creates a store with the given idle lifetime and time source.
    pub fn new(clock: Arc<dyn Clock>, lifetime_secs: i64) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            clock,
            lifetime_secs,
        }
    }

    /// Opens a per-request session handle. No state is created until the
    /// handle is first accessed.
    pub fn open(&self, cookie_id: Option<&str>, secure: bool) -> Session {
        Session {
            store: self.clone(),
            state: SessionState::Unstarted,
            id: None,
            initial_id: cookie_id.map(str::to_string),
            record: None,
            secure,
            cookie_expired: false,
        }
    }

    fn load(&self, id: &str) -> Option<SessionRecord> {
        self.sessions
            .lock()
            .expect("session store lock")
            .get(id)
            .cloned()
    }

    fn write(&self, id: &str, record: SessionRecord) {
        // Actively used sessions rotate within the interval, so their
        // created_at never falls behind this horizon.
        let horizon = self.lifetime_secs.max(REGENERATE_INTERVAL_SECS);
        let cutoff = self.clock.now() - chrono::Duration::seconds(horizon);

        let mut sessions = self.sessions.lock().expect("session store lock");
        sessions.retain(|_, stored| stored.created_at > cutoff);
        sessions.insert(id.to_string(), record);
    }

    fn remove(&self, id: &str) {
        self.sessions.lock().expect("session store lock").remove(id);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionState {
    Unstarted,
    Active,
}

/// A per-request view of one session.
///
/// The handle starts lazily on first access, mirrors the stored record while
/// the request runs, and is written back (plus the id cookie) by `persist`.
pub struct Session {
    store: SessionStore,
    state: SessionState,
    id: Option<String>,
    initial_id: Option<String>,
    record: Option<SessionRecord>,
    secure: bool,
    cookie_expired: bool,
}

impl Session {
    /// Starts the session if it is not already active. Idempotent.
    ///
    /// An existing id from the cookie resumes its stored record; anything else
    /// creates a fresh session. Sessions older than the rotation interval get
    /// a new id, keeping their data.
    pub fn start(&mut self) {
        if self.state == SessionState::Active {
            return;
        }

        let now = self.store.clock.now();

        let resumed = self
            .initial_id
            .as_ref()
            .and_then(|id| self.store.load(id).map(|record| (id.clone(), record)));

        let (id, mut record) = match resumed {
            Some(pair) => pair,
            None => (Uuid::new_v4().to_string(), SessionRecord::new(now)),
        };

        let id = if (now - record.created_at).num_seconds() > REGENERATE_INTERVAL_SECS {
            self.store.remove(&id);
            record.created_at = now;
            Uuid::new_v4().to_string()
        } else {
            id
        };

        self.id = Some(id);
        self.record = Some(record);
        self.state = SessionState::Active;
    }

    /// The session id, if the session is active.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn record_mut(&mut self) -> &mut SessionRecord {
        self.start();
        self.record.as_mut().expect("active session has a record")
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.record_mut().data.insert(key.to_string(), value);
    }

    pub fn get(&mut self, key: &str) -> Option<Value> {
        self.record_mut().data.get(key).cloned()
    }

    pub fn has(&mut self, key: &str) -> bool {
        self.record_mut().data.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) {
        self.record_mut().data.remove(key);
    }

    /// Clears stored data, preserving pending flash messages.
    pub fn clear(&mut self) {
        self.record_mut().data.clear();
    }

    /// Stores a value visible to exactly one subsequent read.
    pub fn flash(&mut self, key: &str, value: Value) {
        self.record_mut().flash.insert(key.to_string(), value);
    }

    /// Returns and deletes a flash value, or the default when absent.
    pub fn get_flash(&mut self, key: &str, default: Value) -> Value {
        self.record_mut().flash.remove(key).unwrap_or(default)
    }

    pub fn has_flash(&mut self, key: &str) -> bool {
        self.record_mut().flash.contains_key(key)
    }

    /// Drains the whole flash store in one call.
    pub fn get_all_flash(&mut self) -> HashMap<String, Value> {
        std::mem::take(&mut self.record_mut().flash)
    }

    /// Stores the authenticated user alongside the activity timestamp.
    pub fn set_user(&mut self, user: Value) {
        let now = self.store.clock.now().timestamp();
        self.set(USER_KEY, user);
        self.set(AUTHENTICATED_KEY, Value::Bool(true));
        self.set(LAST_ACTIVITY_KEY, Value::from(now));
    }

    pub fn get_user(&mut self) -> Option<Value> {
        self.get(USER_KEY)
    }

    /// Whether an authenticated user is present and within the idle timeout.
    ///
    /// Expiry is checked lazily at access time: a timed-out session drops its
    /// user state and reports unauthenticated. A live session refreshes the
    /// activity timestamp (sliding expiration).
    pub fn is_authenticated(&mut self) -> bool {
        if !self.has(AUTHENTICATED_KEY) {
            return false;
        }

        let now = self.store.clock.now().timestamp();
        let last_activity = self
            .get(LAST_ACTIVITY_KEY)
            .and_then(|v| v.as_i64())
            .unwrap_or(0);

        if now - last_activity > self.store.lifetime_secs {
            self.logout();
            return false;
        }

        self.set(LAST_ACTIVITY_KEY, Value::from(now));
        self.get(AUTHENTICATED_KEY)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Clears user-related keys without destroying the session.
    pub fn logout(&mut self) {
        self.remove(USER_KEY);
        self.remove(AUTHENTICATED_KEY);
        self.remove(LAST_ACTIVITY_KEY);
    }

    /// Assigns a fresh session id, keeping all stored data.
    pub fn regenerate_id(&mut self) {
        self.start();
        if let Some(old) = self.id.take() {
            self.store.remove(&old);
        }
        self.id = Some(Uuid::new_v4().to_string());
        if let Some(record) = self.record.as_mut() {
            record.created_at = self.store.clock.now();
        }
    }

    /// Destroys the session: all data is dropped, the cookie is expired
    /// client-side, and the handle returns to the unstarted state.
    pub fn destroy(&mut self) {
        self.start();
        if let Some(id) = self.id.take() {
            self.store.remove(&id);
        }
        self.record = None;
        self.initial_id = None;
        self.state = SessionState::Unstarted;
        self.cookie_expired = true;
    }

    /// Writes the session back to the store and queues the id cookie.
    ///
    /// Untouched sessions leave no trace: no record, no cookie.
    pub fn persist(&mut self, response: &mut Response) {
        if self.state == SessionState::Active {
            if let (Some(id), Some(record)) = (self.id.as_ref(), self.record.as_ref()) {
                self.store.write(id, record.clone());
                response.force_set_cookie(
                    ResponseCookie::new(SESSION_COOKIE, id, self.store.lifetime_secs)
                        .secure(self.secure),
                );
            }
        } else if self.cookie_expired {
            response.force_set_cookie(ResponseCookie::new(SESSION_COOKIE, "", 0));
        }
    }
}
