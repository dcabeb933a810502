//! On-disk backend: one directory, two files per record.
//!
//! ```text
//!   <root>/SCHEMA          schema version marker
//!   <root>/<id>.json       StoredTrack metadata (no payload, no reference)
//!   <root>/<id>.bin        payload bytes (Local tracks only)
//! ```
//!
//! Files are written to `*.tmp` and renamed into place.  The payload lands
//! before the metadata; a `.bin` without its `.json` is not a record and does
//! not count against the quota.
//!
//! Reads never load payload bytes: a local record comes back as
//! `Payload::File` and the bytes stay on disk until someone asks for them.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{CatalogBackend, Payload, StoredTrack, SCHEMA_VERSION};
use crate::error::{RadioError, Result};
use crate::protocol::TrackOrigin;

const SCHEMA_FILE: &str = "SCHEMA";

pub struct DirBackend {
    root: PathBuf,
    quota_bytes: Option<u64>,
}

impl DirBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            quota_bytes: None,
        }
    }

    pub fn with_quota(mut self, quota_bytes: Option<u64>) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.json", id))
    }

    fn payload_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.bin", id))
    }

    async fn stored_payload_bytes(&self, except: &str) -> Result<u64> {
        let mut total = 0;
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("bin") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if id == except || !tokio::fs::try_exists(self.meta_path(id)).await? {
                continue;
            }
            total += entry.metadata().await?.len();
        }
        Ok(total)
    }

    async fn read_record(&self, meta_path: &Path) -> Result<StoredTrack> {
        let content = tokio::fs::read_to_string(meta_path).await?;
        let mut record: StoredTrack = serde_json::from_str(&content)?;
        if record.origin == TrackOrigin::Local {
            let path = self.payload_path(&record.id);
            let len = tokio::fs::metadata(&path).await?.len();
            record.payload = Some(Payload::File { path, len });
        }
        Ok(record)
    }
}

/// Ids become file names, so only a conservative character set is accepted.
fn check_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(RadioError::InvalidInput(format!("unusable track id {:?}", id)))
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl CatalogBackend for DirBackend {
    async fn open(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let marker = self.root.join(SCHEMA_FILE);
        match tokio::fs::read_to_string(&marker).await {
            Ok(found) => {
                let version: u32 = found.trim().parse().map_err(|_| {
                    RadioError::Storage(format!("unreadable schema marker {:?}", found.trim()))
                })?;
                if version != SCHEMA_VERSION {
                    return Err(RadioError::Storage(format!(
                        "unsupported schema version {} (expected {})",
                        version, SCHEMA_VERSION
                    )));
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("[catalog] initialising {}", self.root.display());
                write_atomic(&marker, SCHEMA_VERSION.to_string().as_bytes()).await?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<StoredTrack>> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read_record(&path).await {
                Ok(r) => records.push(r),
                Err(e) => warn!("[catalog] skipping unreadable record {}: {}", path.display(), e),
            }
        }
        Ok(records)
    }

    async fn put(&self, record: StoredTrack) -> Result<()> {
        check_id(&record.id)?;
        if let Some(limit) = self.quota_bytes {
            let needed = self.stored_payload_bytes(&record.id).await? + record.payload_len();
            if needed > limit {
                return Err(RadioError::QuotaExceeded { needed, limit });
            }
        }
        let payload_path = self.payload_path(&record.id);
        match &record.payload {
            Some(Payload::Bytes(bytes)) => write_atomic(&payload_path, bytes).await?,
            Some(file @ Payload::File { .. }) => {
                let bytes = file.read_all().await?;
                write_atomic(&payload_path, &bytes).await?;
            }
            None => {}
        }
        let meta_path = self.meta_path(&record.id);
        let meta = serde_json::to_vec_pretty(&record)?;
        if let Err(e) = write_atomic(&meta_path, &meta).await {
            // no metadata means no record: drop the payload with it
            if !tokio::fs::try_exists(&meta_path).await.unwrap_or(true) {
                if let Err(cleanup) = remove_if_present(&payload_path).await {
                    warn!("[catalog] orphaned {}: {}", payload_path.display(), cleanup);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        if check_id(id).is_err() {
            // nothing with that id can have been stored
            return Ok(());
        }
        remove_if_present(&self.meta_path(id)).await?;
        remove_if_present(&self.payload_path(id)).await?;
        Ok(())
    }
}
