//! Volatile, code-keyed store for anonymous transfers.
//!
//! A transfer is parked under a random numeric code and handed out at most
//! once. Downloaded codes are remembered separately so the sender can poll
//! for pickup after the live entry is gone.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::clock::{self, Timestamp};
use crate::error::{Result, TransferError};

/// Inclusive numeric range codes are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSpace {
    pub min: u32,
    pub max: u32,
}

impl Default for CodeSpace {
    fn default() -> Self {
        Self { min: 100_000, max: 999_999 }
    }
}

impl CodeSpace {
    /// Number of addressable codes.
    pub fn size(&self) -> u64 {
        if self.max < self.min {
            return 0;
        }
        u64::from(self.max - self.min) + 1
    }

    fn draw(&self) -> String {
        let offset = OsRng.next_u64() % self.size().max(1);
        (u64::from(self.min) + offset).to_string()
    }

    /// Draw a code for which `is_taken` is false, giving up after
    /// `max_attempts` draws. `taken` is how many codes are in use, used to
    /// fail fast once the space is full.
    pub(crate) fn draw_unique<F>(&self, max_attempts: u32, taken: usize, is_taken: F) -> Result<String>
    where
        F: Fn(&str) -> bool,
    {
        if taken as u64 >= self.size() {
            return Err(TransferError::CapacityExhausted { attempts: 0 });
        }

        for attempt in 1..=max_attempts {
            let code = self.draw();
            if !is_taken(&code) {
                return Ok(code);
            }
            tracing::debug!("Code collision on attempt {}", attempt);
        }

        Err(TransferError::CapacityExhausted { attempts: max_attempts })
    }
}

/// An anonymous transfer waiting for pickup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub code: String,
    pub filename: String,
    pub payload: Vec<u8>,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

#[derive(Default)]
struct CodeTable {
    live: HashMap<String, Transfer>,
    downloaded: HashSet<String>,
}

/// Process-wide store of code transfers. All access goes through one lock,
/// so a pop and a status query always agree on a single history per code.
pub struct CodeStore {
    table: Mutex<CodeTable>,
    space: CodeSpace,
    max_attempts: u32,
}

impl CodeStore {
    pub fn new(space: CodeSpace, max_attempts: u32) -> Self {
        Self {
            table: Mutex::new(CodeTable::default()),
            space,
            max_attempts,
        }
    }

    fn table(&self) -> MutexGuard<'_, CodeTable> {
        // No method leaves the table half-updated, so a poisoned lock is safe to reuse
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Park `payload` under a fresh code that lives for `ttl`.
    pub fn create(&self, filename: &str, payload: Vec<u8>, ttl: Duration, now: Timestamp) -> Result<String> {
        let mut table = self.table();
        // Picked-up codes stay retired so their downloaded marker never flips back
        let taken = table.live.len() + table.downloaded.len();
        let code = self.space.draw_unique(self.max_attempts, taken, |c| {
            table.live.contains_key(c) || table.downloaded.contains(c)
        })?;

        let size = payload.len();
        table.live.insert(
            code.clone(),
            Transfer {
                code: code.clone(),
                filename: filename.to_string(),
                payload,
                created_at: now,
                expires_at: clock::expiry(now, ttl),
            },
        );

        tracing::info!("Parked {} ({} bytes) under code {}", filename, size, code);
        Ok(code)
    }

    /// Take the transfer out if it is still live. Exactly one caller wins.
    pub fn pop_if_live(&self, code: &str, now: Timestamp) -> Result<Transfer> {
        let mut table = self.table();

        let live = table
            .live
            .get(code)
            .map(|t| clock::is_live(t.expires_at, now))
            .unwrap_or(false);
        if !live {
            return Err(TransferError::NotFound);
        }

        let transfer = table.live.remove(code).ok_or(TransferError::NotFound)?;
        table.downloaded.insert(code.to_string());

        tracing::info!("Code {} picked up ({})", code, transfer.filename);
        Ok(transfer)
    }

    /// Whether `code` names a transfer that can still be picked up.
    pub fn is_live(&self, code: &str, now: Timestamp) -> bool {
        self.table()
            .live
            .get(code)
            .map(|t| clock::is_live(t.expires_at, now))
            .unwrap_or(false)
    }

    /// True only for codes that were live and then successfully popped.
    pub fn was_downloaded(&self, code: &str) -> bool {
        self.table().downloaded.contains(code)
    }

    /// Drop every expired transfer without marking it downloaded.
    pub fn sweep_expired(&self, now: Timestamp) -> usize {
        let mut table = self.table();
        let before = table.live.len();
        table.live.retain(|_, t| clock::is_live(t.expires_at, now));
        before - table.live.len()
    }

    pub fn live_count(&self) -> usize {
        self.table().live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(600);

    fn store() -> CodeStore {
        CodeStore::new(CodeSpace::default(), 64)
    }

    #[test]
    fn test_create_then_pop_once() -> Result<()> {
        let store = store();
        let code = store.create("a.txt", b"hello".to_vec(), TTL, 1_000)?;

        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        assert!(!store.was_downloaded(&code));

        let transfer = store.pop_if_live(&code, 1_001)?;
        assert_eq!(transfer.filename, "a.txt");
        assert_eq!(transfer.payload, b"hello");

        assert!(matches!(store.pop_if_live(&code, 1_002), Err(TransferError::NotFound)));
        assert!(store.was_downloaded(&code));
        Ok(())
    }

    #[test]
    fn test_unknown_code_is_not_found() {
        let store = store();
        assert!(matches!(store.pop_if_live("123456", 0), Err(TransferError::NotFound)));
        assert!(!store.was_downloaded("123456"));
    }

    #[test]
    fn test_expired_transfer_is_never_returned() -> Result<()> {
        let store = store();
        let code = store.create("late.bin", vec![1, 2, 3], TTL, 1_000)?;

        assert!(store.is_live(&code, 1_599));
        assert!(!store.is_live(&code, 1_600));
        assert!(matches!(store.pop_if_live(&code, 1_600), Err(TransferError::NotFound)));
        assert!(!store.was_downloaded(&code));
        Ok(())
    }

    #[test]
    fn test_sweep_removes_only_expired() -> Result<()> {
        let store = store();
        let old = store.create("old", vec![], Duration::from_secs(10), 0)?;
        let fresh = store.create("fresh", vec![], Duration::from_secs(100), 0)?;

        assert_eq!(store.sweep_expired(10), 1);
        assert_eq!(store.live_count(), 1);
        assert!(!store.is_live(&old, 10));
        assert!(store.is_live(&fresh, 10));
        assert!(!store.was_downloaded(&old));
        Ok(())
    }

    #[test]
    fn test_capacity_exhausted_when_space_is_full() -> Result<()> {
        let store = CodeStore::new(CodeSpace { min: 42, max: 42 }, 8);
        let code = store.create("only", vec![], TTL, 0)?;
        assert_eq!(code, "42");

        let err = store.create("second", vec![], TTL, 0).unwrap_err();
        assert!(matches!(err, TransferError::CapacityExhausted { .. }));

        // A picked-up code is retired, so the space stays full
        store.pop_if_live(&code, 1)?;
        let err = store.create("third", vec![], TTL, 2).unwrap_err();
        assert!(matches!(err, TransferError::CapacityExhausted { .. }));
        Ok(())
    }

    #[test]
    fn test_downloaded_marker_is_permanent() -> Result<()> {
        let store = CodeStore::new(CodeSpace { min: 10, max: 11 }, 64);
        let picked = store.create("picked", vec![], TTL, 0)?;
        store.pop_if_live(&picked, 1)?;
        assert!(store.was_downloaded(&picked));

        // Later creates never hand the picked-up code out again
        let other = store.create("other", vec![], Duration::from_secs(5), 2)?;
        assert_ne!(other, picked);
        assert!(store.was_downloaded(&picked));

        store.sweep_expired(1_000);
        assert!(store.was_downloaded(&picked));
        assert!(!store.was_downloaded(&other));

        // The expired, never-fetched code is free again; the picked one is not
        let reused = store.create("again", vec![], TTL, 1_000)?;
        assert_eq!(reused, other);
        assert!(store.was_downloaded(&picked));
        assert!(matches!(
            store.create("full", vec![], TTL, 1_000),
            Err(TransferError::CapacityExhausted { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_bounded_retries_on_collisions() {
        let space = CodeSpace { min: 1, max: 2 };
        let err = space.draw_unique(5, 1, |_| true).unwrap_err();
        assert!(matches!(err, TransferError::CapacityExhausted { attempts: 5 }));
    }

    #[test]
    fn test_concurrent_pops_succeed_exactly_once() -> Result<()> {
        let store = Arc::new(store());
        let code = store.create("race.txt", b"x".to_vec(), TTL, 0)?;

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                let code = code.clone();
                std::thread::spawn(move || store.pop_if_live(&code, 1).is_ok())
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(wins, 1);
        assert!(store.was_downloaded(&code));
        Ok(())
    }
}
