//! Key-value backends with per-key expiry.
//!
//! Expiry is expressed as an absolute millisecond timestamp. A key whose
//! `expires_at` is not in the future does not exist as far as readers are
//! concerned; `purge_expired` reclaims the space.

use std::collections::HashMap;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

use super::StoreError;
use crate::db::Database;

/// Read-modify-write callback. Receives the current value and returns the
/// replacement, or `None` to leave the value untouched.
pub type UpdateFn<'a> = &'a mut dyn FnMut(&str) -> Result<Option<String>, StoreError>;

pub trait KeyValueBackend: Send + Sync {
    fn get(&self, key: &str, now_ms: i64) -> Result<Option<String>, StoreError>;

    /// Inserts or overwrites a value.
    fn put(&self, key: &str, value: &str, expires_at_ms: i64) -> Result<(), StoreError>;

    /// Atomically reads, transforms and writes a live key. Returns whether a
    /// value was written; a missing or expired key yields `false`.
    fn update(
        &self,
        key: &str,
        now_ms: i64,
        expires_at_ms: i64,
        apply: UpdateFn<'_>,
    ) -> Result<bool, StoreError>;

    /// Removes a live key. Returns false if it did not exist.
    fn delete(&self, key: &str, now_ms: i64) -> Result<bool, StoreError>;

    /// Drops every expired key and returns how many were removed.
    fn purge_expired(&self, now_ms: i64) -> Result<usize, StoreError>;
}

// ─── SQLite ─────────────────────────────────────────────────────────────────

/// Backend over the `job_records` table.
#[derive(Clone)]
pub struct SqliteBackend {
    db: Database,
}

impl SqliteBackend {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn update_locked(
    conn: &Connection,
    key: &str,
    now_ms: i64,
    expires_at_ms: i64,
    apply: UpdateFn<'_>,
) -> Result<bool, StoreError> {
    // IMMEDIATE takes the write lock up front so another process cannot
    // interleave between our read and write.
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let current: Option<String> = tx
        .query_row(
            "SELECT value FROM job_records WHERE key = ?1 AND expires_at > ?2",
            params![key, now_ms],
            |r| r.get(0),
        )
        .optional()?;

    let Some(current) = current else {
        return Ok(false);
    };

    match apply(&current)? {
        Some(next) => {
            tx.execute(
                "UPDATE job_records SET value = ?2, expires_at = ?3 WHERE key = ?1",
                params![key, next, expires_at_ms],
            )?;
            tx.commit()?;
            Ok(true)
        }
        None => Ok(false),
    }
}

impl KeyValueBackend for SqliteBackend {
    fn get(&self, key: &str, now_ms: i64) -> Result<Option<String>, StoreError> {
        let value = self.db.with_conn(|conn| {
            let value: Option<String> = conn
                .query_row(
                    "SELECT value FROM job_records WHERE key = ?1 AND expires_at > ?2",
                    params![key, now_ms],
                    |r| r.get(0),
                )
                .optional()?;
            Ok(value)
        })?;
        Ok(value)
    }

    fn put(&self, key: &str, value: &str, expires_at_ms: i64) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO job_records (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
                params![key, value, expires_at_ms],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    fn update(
        &self,
        key: &str,
        now_ms: i64,
        expires_at_ms: i64,
        apply: UpdateFn<'_>,
    ) -> Result<bool, StoreError> {
        self.db
            .with_conn(|conn| Ok(update_locked(conn, key, now_ms, expires_at_ms, apply)))?
    }

    fn delete(&self, key: &str, now_ms: i64) -> Result<bool, StoreError> {
        let removed = self.db.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM job_records WHERE key = ?1 AND expires_at > ?2",
                params![key, now_ms],
            )?;
            Ok(n)
        })?;
        Ok(removed > 0)
    }

    fn purge_expired(&self, now_ms: i64) -> Result<usize, StoreError> {
        let removed = self.db.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM job_records WHERE expires_at <= ?1",
                params![now_ms],
            )?;
            Ok(n)
        })?;
        if removed > 0 {
            log::debug!("Purged {} expired job records", removed);
        }
        Ok(removed)
    }
}

// ─── In-memory ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at_ms: i64,
}

/// Process-local backend. Every operation holds the map lock, so updates are
/// serialized.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Memory backend lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl KeyValueBackend for MemoryBackend {
    fn get(&self, key: &str, now_ms: i64) -> Result<Option<String>, StoreError> {
        let entries = self.lock();
        Ok(entries
            .get(key)
            .filter(|e| e.expires_at_ms > now_ms)
            .map(|e| e.value.clone()))
    }

    fn put(&self, key: &str, value: &str, expires_at_ms: i64) -> Result<(), StoreError> {
        self.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at_ms,
            },
        );
        Ok(())
    }

    fn update(
        &self,
        key: &str,
        now_ms: i64,
        expires_at_ms: i64,
        apply: UpdateFn<'_>,
    ) -> Result<bool, StoreError> {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(key).filter(|e| e.expires_at_ms > now_ms) else {
            return Ok(false);
        };
        match apply(&entry.value)? {
            Some(next) => {
                entry.value = next;
                entry.expires_at_ms = expires_at_ms;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(&self, key: &str, now_ms: i64) -> Result<bool, StoreError> {
        let mut entries = self.lock();
        match entries.remove(key) {
            Some(e) => Ok(e.expires_at_ms > now_ms),
            None => Ok(false),
        }
    }

    fn purge_expired(&self, now_ms: i64) -> Result<usize, StoreError> {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at_ms > now_ms);
        Ok(before - entries.len())
    }
}
