use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::Mutex;

use super::{CatalogBackend, StoredTrack};
use crate::error::{RadioError, Result};

/// In-process backend.  Used when no data directory is configured and by
/// tests, which can flip the failure switches to simulate an unreachable
/// engine.
#[derive(Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<String, StoredTrack>>,
    /// Total payload bytes the backend accepts; `None` = unlimited.
    quota_bytes: Option<u64>,
    fail_open: AtomicBool,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    opens: AtomicUsize,
    puts: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::default()
        }
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of times `open` ran (including failed attempts).
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of `put` calls that reached the backend.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

impl CatalogBackend for MemoryBackend {
    async fn open(&self) -> Result<()> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        // give racing callers a chance to pile up on the init gate
        tokio::task::yield_now().await;
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(RadioError::storage("schema setup failed"));
        }
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<StoredTrack>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RadioError::storage("backend unreachable"));
        }
        Ok(self.records.lock().await.values().cloned().collect())
    }

    async fn put(&self, record: StoredTrack) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RadioError::storage("backend unreachable"));
        }
        let mut records = self.records.lock().await;
        if let Some(limit) = self.quota_bytes {
            let others: u64 = records
                .values()
                .filter(|r| r.id != record.id)
                .map(|r| r.payload_len())
                .sum();
            let needed = others + record.payload_len();
            if needed > limit {
                return Err(RadioError::QuotaExceeded { needed, limit });
            }
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RadioError::storage("backend unreachable"));
        }
        self.records.lock().await.remove(id);
        Ok(())
    }
}
