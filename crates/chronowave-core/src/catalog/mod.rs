//! Media catalog: durable track records plus optional binary payload.
//!
//! The persisted shape (`StoredTrack`) has no playback-reference field.  A
//! fresh reference is derived by `playback_reference` every time records are
//! read, so a handle from a previous session can never leak back in.
//!
//! ```text
//!   CatalogStore ──open once──▶ CatalogBackend (MemoryBackend | DirBackend)
//!        │
//!        └── get_all ──▶ StoredTrack ──playback_reference──▶ Track
//!                                            │
//!                                            └── BlobRegistry::mint (Local)
//! ```

mod blob;
mod dir;
mod memory;
mod payload;

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::{RadioError, Result};
use crate::protocol::{PlaybackReference, Track, TrackOrigin};

pub use blob::BlobRegistry;
pub use dir::DirBackend;
pub use memory::MemoryBackend;
pub use payload::Payload;

/// Schema version written by backends on first open.
pub const SCHEMA_VERSION: u32 = 1;

/// A catalog record exactly as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTrack {
    pub id: String,
    pub name: String,
    pub origin: TrackOrigin,
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default)]
    pub mime: Option<String>,
    pub offset_seed: u32,
    #[serde(default)]
    pub created_seq: u64,
    /// Stored beside the metadata, never inside it.
    #[serde(skip)]
    pub payload: Option<Payload>,
}

impl StoredTrack {
    pub fn payload_len(&self) -> u64 {
        self.payload.as_ref().map(Payload::len).unwrap_or(0)
    }

    /// `payload` present iff `origin == Local`.
    pub fn check_shape(&self) -> Result<()> {
        match (self.origin, self.payload.is_some()) {
            (TrackOrigin::Local, true) | (TrackOrigin::Remote, false) => Ok(()),
            (TrackOrigin::Local, false) => Err(RadioError::InvalidInput(format!(
                "local track {} has no payload",
                self.id
            ))),
            (TrackOrigin::Remote, true) => Err(RadioError::InvalidInput(format!(
                "remote track {} carries a payload",
                self.id
            ))),
        }
    }

    pub fn into_track(self, reference: PlaybackReference) -> Track {
        Track {
            id: self.id,
            name: self.name,
            origin: self.origin,
            payload: self.payload,
            remote_url: self.remote_url,
            mime: self.mime,
            offset_seed: self.offset_seed,
            created_seq: self.created_seq,
            reference,
        }
    }
}

/// Key-value persistence engine keyed by track id.
///
/// `open` performs schema setup and may be called more than once; the store
/// guarantees it is driven to completion only once per process.
pub trait CatalogBackend: Send + Sync {
    fn open(&self) -> impl Future<Output = Result<()>> + Send;
    fn get_all(&self) -> impl Future<Output = Result<Vec<StoredTrack>>> + Send;
    fn put(&self, record: StoredTrack) -> impl Future<Output = Result<()>> + Send;
    /// Deleting an unknown id succeeds.
    fn delete(&self, id: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Derive the handle the audio primitive will open for `record`.
///
/// Payload-backed records get a newly minted blob reference; everything else
/// falls back to the stored address, or an empty reference.
pub fn playback_reference(record: &StoredTrack, blobs: &BlobRegistry) -> PlaybackReference {
    match &record.payload {
        Some(payload) => blobs.mint(payload.clone()),
        None => record
            .remote_url
            .as_deref()
            .map(PlaybackReference::new)
            .unwrap_or_else(PlaybackReference::empty),
    }
}

/// Durable CRUD over track records with lazy, single-shot initialization.
pub struct CatalogStore<B> {
    backend: B,
    ready: OnceCell<()>,
    blobs: Arc<BlobRegistry>,
}

impl<B: CatalogBackend> CatalogStore<B> {
    pub fn new(backend: B, blobs: Arc<BlobRegistry>) -> Self {
        Self {
            backend,
            ready: OnceCell::new(),
            blobs,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn blobs(&self) -> &Arc<BlobRegistry> {
        &self.blobs
    }

    /// Concurrent first callers wait on the same initialization; a failed
    /// open leaves the gate unset so the next call retries.
    async fn ensure_open(&self) -> Result<()> {
        self.ready
            .get_or_try_init(|| async {
                info!("[catalog] opening store (schema v{})", SCHEMA_VERSION);
                self.backend.open().await
            })
            .await
            .map(|_| ())
    }

    /// Every persisted record with a freshly derived playback reference,
    /// ordered by creation sequence.
    pub async fn get_all(&self) -> Result<Vec<Track>> {
        self.ensure_open().await?;
        let mut records = self.backend.get_all().await?;
        records.sort_by(|a, b| {
            a.created_seq
                .cmp(&b.created_seq)
                .then_with(|| a.id.cmp(&b.id))
        });
        debug!("[catalog] loaded {} records", records.len());
        Ok(records
            .into_iter()
            .map(|r| {
                let reference = playback_reference(&r, &self.blobs);
                r.into_track(reference)
            })
            .collect())
    }

    /// Persist `record`.  Partial writes are not rolled back by the backend.
    pub async fn add(&self, record: StoredTrack) -> Result<()> {
        record.check_shape()?;
        self.ensure_open().await?;
        let id = record.id.clone();
        let bytes = record.payload_len();
        self.backend.put(record).await?;
        info!("[catalog] stored id={} payload={}B", id, bytes);
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        self.ensure_open().await?;
        self.backend.delete(id).await?;
        info!("[catalog] removed id={}", id);
        Ok(())
    }
}
