//! Session registry shared by all file handles of a server
//!
//! Sessions live in one of two tables, chosen by the access mode of the open that touches them;
//! the same key may exist independently in both. All tables sit behind a single lock, every
//! logical step (create, verify, liveness check, erase, sweep) holds it for its duration.

use enum_map::EnumMap;
use tokio::time::Instant;

/// Selects the session table, read opens and write opens have separate key spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, enum_map::Enum)]
pub enum AccessMode {
    Read,
    Write,
}

impl AccessMode {
    pub fn of(mode: &remote::protocol::OpenMode) -> Self {
        if mode.write || mode.create || mode.truncate {
            AccessMode::Write
        } else {
            AccessMode::Read
        }
    }
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessMode::Read => write!(f, "read"),
            AccessMode::Write => write!(f, "write"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub key: String,
    /// `<name>@<host>` of the creating client, replaced by the verifier's origin on consumption
    pub org: String,
    /// source endpoint, `host:port`
    pub src: String,
    pub dst: String,
    /// server-local path registered by the creating open
    pub path: String,
    /// logical file name on the source
    pub lfn: String,
    /// full opaque of the creating open
    pub opaque: String,
    pub expires: Instant,
}

#[derive(Debug, Default)]
pub struct SessionTable {
    entries: std::collections::HashMap<String, SessionEntry>,
}

impl SessionTable {
    pub fn exists(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&SessionEntry> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut SessionEntry> {
        self.entries.get_mut(key)
    }

    /// Inserts the entry, replacing any previous entry with the same key.
    pub fn set(&mut self, entry: SessionEntry) {
        self.entries.insert(entry.key.clone(), entry);
    }

    pub fn erase(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Removes entries that expired more than `grace` before `now`, returns how many.
    pub fn sweep(&mut self, now: Instant, grace: std::time::Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, entry| {
            let keep = entry.expires + grace >= now;
            if !keep {
                tracing::debug!(key = %key, "expire tpc key");
            }
            keep
        });
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub type SessionTables = EnumMap<AccessMode, SessionTable>;

/// Owner of the session tables, one per server process.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    tables: std::sync::Mutex<SessionTables>,
    // woken whenever a session is created, verifying opens wait on it for missing keys
    inserted: tokio::sync::Notify,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks all tables. Never hold the guard across an await point.
    pub fn lock(&self) -> std::sync::MutexGuard<'_, SessionTables> {
        self.tables
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn exists(&self, mode: AccessMode, key: &str) -> bool {
        self.lock()[mode].exists(key)
    }

    pub fn lookup(&self, mode: AccessMode, key: &str) -> Option<SessionEntry> {
        self.lock()[mode].get(key).cloned()
    }

    pub fn erase(&self, mode: AccessMode, key: &str) -> bool {
        let removed = self.lock()[mode].erase(key);
        if removed {
            tracing::debug!(key = %key, %mode, "remove tpc key");
            common::get_progress().sessions_removed.inc();
        }
        removed
    }

    pub fn len(&self, mode: AccessMode) -> usize {
        self.lock()[mode].len()
    }

    pub(crate) fn notify_inserted(&self) {
        self.inserted.notify_waiters();
    }

    pub(crate) fn inserted(&self) -> &tokio::sync::Notify {
        &self.inserted
    }
}
