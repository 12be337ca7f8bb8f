//! Refresh-lock cache.
//!
//! Process-wide map keyed by (clinic, date) that keeps concurrent quota
//! calculations from all asking the authority for the same schedule.
//!
//! Entries expire on their own: a refreshing entry after `lock_ttl`, a
//! failed entry once its circuit window has passed. A stuck "refreshing"
//! flag therefore cannot block a key forever.
//!
//! Only valid inside one process. Several instances need a shared claim
//! row with a TTL instead.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub type RefreshKey = (String, NaiveDate);

#[derive(Debug, Clone)]
struct LockEntry {
    refreshing: bool,
    started_at: Instant,
    failed_at: Option<Instant>,
    last_error: Option<String>,
}

/// refresh の許可を求めた結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshGate {
    /// 呼び出し側が refresh を担当する（complete / fail で必ず報告する）
    Acquired,
    /// 他のタスクが refresh 中
    InFlight,
    /// 直近の試行が失敗した（サーキットが開いている）。古いデータを使う
    CircuitOpen { last_error: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshCacheStats {
    pub total: usize,
    pub refreshing: usize,
    pub failed: usize,
}

pub struct RefreshLocks {
    entries: Mutex<HashMap<RefreshKey, LockEntry>>,
    lock_ttl: Duration,
    circuit_window: Duration,
}

impl RefreshLocks {
    pub fn new(lock_ttl: Duration, circuit_window: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            lock_ttl,
            circuit_window,
        }
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut HashMap<RefreshKey, LockEntry>) -> R) -> R {
        let mut guard = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        guard.retain(|_, e| !self.expired(e, now));
        f(&mut guard)
    }

    fn expired(&self, entry: &LockEntry, now: Instant) -> bool {
        match entry.failed_at {
            Some(failed_at) => now.duration_since(failed_at) >= self.circuit_window,
            None => now.duration_since(entry.started_at) >= self.lock_ttl,
        }
    }

    pub fn try_acquire(&self, key: &RefreshKey) -> RefreshGate {
        self.with_entries(|entries| {
            if let Some(entry) = entries.get(key) {
                if entry.refreshing {
                    return RefreshGate::InFlight;
                }
                if entry.failed_at.is_some() {
                    return RefreshGate::CircuitOpen {
                        last_error: entry.last_error.clone().unwrap_or_default(),
                    };
                }
            }
            entries.insert(
                key.clone(),
                LockEntry {
                    refreshing: true,
                    started_at: Instant::now(),
                    failed_at: None,
                    last_error: None,
                },
            );
            RefreshGate::Acquired
        })
    }

    /// 成功した refresh はキーごと解放する
    pub fn complete(&self, key: &RefreshKey) {
        self.with_entries(|entries| {
            entries.remove(key);
        });
    }

    /// 失敗した refresh はそのキーのサーキットを開く
    pub fn fail(&self, key: &RefreshKey, error: impl Into<String>) {
        let error = error.into();
        self.with_entries(|entries| {
            let now = Instant::now();
            let entry = entries.entry(key.clone()).or_insert(LockEntry {
                refreshing: false,
                started_at: now,
                failed_at: None,
                last_error: None,
            });
            entry.refreshing = false;
            entry.failed_at = Some(now);
            entry.last_error = Some(error);
        });
    }

    pub fn is_refreshing(&self, key: &RefreshKey) -> bool {
        self.with_entries(|entries| entries.get(key).is_some_and(|e| e.refreshing))
    }

    pub fn stats(&self) -> RefreshCacheStats {
        self.with_entries(|entries| RefreshCacheStats {
            total: entries.len(),
            refreshing: entries.values().filter(|e| e.refreshing).count(),
            failed: entries.values().filter(|e| e.failed_at.is_some()).count(),
        })
    }
}
