//! Track registry: one coherent track list on top of the catalog.
//!
//! An empty or unreadable catalog yields the built-in stations, so the radio
//! always has something to play.  Write failures, by contrast, are returned
//! to the caller so an upload can be reported as failed.

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};

use rand::Rng;
use tracing::{info, warn};

use crate::catalog::{CatalogBackend, CatalogStore, Payload, StoredTrack};
use crate::error::{RadioError, Result};
use crate::protocol::{PlaybackReference, Track, TrackOrigin};

/// Longest display name kept after normalization.
pub const MAX_NAME_LEN: usize = 25;
/// Longest name suggested from an uploaded file name.
pub const SUGGESTED_NAME_LEN: usize = 20;

/// Seed range for the built-in stations (one hour).
const DEFAULT_SEED_RANGE: u32 = 3600;
/// Seed range for uploaded tracks (two hours).
const LOCAL_SEED_RANGE: u32 = 7200;

const BUILTIN_STATIONS: [(&str, &str, &str); 4] = [
    (
        "1",
        "SYNTHWAVE_MIX_VOL1",
        "https://commondatastorage.googleapis.com/codeskulptor-demos/DDR_assets/Sevish_-__nbsp_.mp3",
    ),
    (
        "2",
        "LATE_NIGHT_TALK",
        "https://commondatastorage.googleapis.com/codeskulptor-assets/Epoq-Lepidoptera.ogg",
    ),
    (
        "3",
        "JAZZ_CAFE_85",
        "https://commondatastorage.googleapis.com/codeskulptor-demos/pyman_assets/intromusic.ogg",
    ),
    (
        "4",
        "NEWS_BROADCAST_AM",
        "https://commondatastorage.googleapis.com/codeskulptor-demos/riceracer_assets/music/win.ogg",
    ),
];

/// The built-in remote stations with seeds drawn from `rng`.
pub fn default_tracks<R: Rng>(rng: &mut R) -> Vec<Track> {
    BUILTIN_STATIONS
        .iter()
        .enumerate()
        .map(|(seq, (id, name, url))| Track {
            id: id.to_string(),
            name: name.to_string(),
            origin: TrackOrigin::Remote,
            payload: None,
            remote_url: Some(url.to_string()),
            mime: None,
            offset_seed: rng.gen_range(0..DEFAULT_SEED_RANGE),
            created_seq: seq as u64,
            reference: PlaybackReference::new(*url),
        })
        .collect()
}

/// Uppercase, `[A-Z0-9_]` only, at most `MAX_NAME_LEN` characters.
pub fn normalize_name(name: &str) -> String {
    name.to_uppercase()
        .chars()
        .map(|c| {
            if c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_LEN)
        .collect()
}

/// Station-style name derived from an uploaded file name.
pub fn suggest_name(file_name: &str) -> String {
    let stem = match file_name.rfind('.') {
        Some(dot) if dot > 0 && !file_name[dot + 1..].contains('/') => &file_name[..dot],
        _ => file_name,
    };
    stem.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .take(SUGGESTED_NAME_LEN)
        .collect()
}

/// MIME type for an audio file, judged by extension.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp3" => "audio/mpeg",
        "ogg" | "oga" | "opus" => "audio/ogg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        "m4a" | "mp4" => "audio/mp4",
        "webm" => "audio/webm",
        _ => "application/octet-stream",
    }
}

/// Raw upload handed over by a client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    /// Read `path` from disk.  An absent or blank `name` is derived from the
    /// file name.
    pub async fn from_file(path: &Path, name: Option<String>) -> Result<Self> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            RadioError::InvalidInput(format!("cannot read {}: {}", path.display(), e))
        })?;
        let name = match name.filter(|n| !n.trim().is_empty()) {
            Some(n) => n,
            None => suggest_name(
                path.file_name()
                    .and_then(|f| f.to_str())
                    .unwrap_or_default(),
            ),
        };
        Ok(Self {
            name,
            mime: mime_for_path(path).to_string(),
            bytes,
        })
    }
}

pub struct TrackRegistry<B> {
    store: CatalogStore<B>,
    defaults: Vec<Track>,
    allowed_mime_types: Vec<String>,
    last_id: AtomicI64,
}

impl<B: CatalogBackend> TrackRegistry<B> {
    /// Defaults get fresh seeds for this process.
    pub fn new(store: CatalogStore<B>, allowed_mime_types: Vec<String>) -> Self {
        let defaults = default_tracks(&mut rand::thread_rng());
        Self::with_defaults(store, defaults, allowed_mime_types)
    }

    pub fn with_defaults(
        store: CatalogStore<B>,
        defaults: Vec<Track>,
        allowed_mime_types: Vec<String>,
    ) -> Self {
        Self {
            store,
            defaults,
            allowed_mime_types,
            last_id: AtomicI64::new(0),
        }
    }

    pub fn store(&self) -> &CatalogStore<B> {
        &self.store
    }

    pub fn defaults(&self) -> &[Track] {
        &self.defaults
    }

    /// Persisted tracks, or the built-in stations when there are none or
    /// the catalog cannot be read.
    pub async fn list_tracks(&self) -> Vec<Track> {
        match self.store.get_all().await {
            Ok(tracks) if tracks.is_empty() => self.defaults.clone(),
            Ok(tracks) => tracks,
            Err(e) => {
                warn!("[registry] catalog read failed, using built-in stations: {}", e);
                self.defaults.clone()
            }
        }
    }

    pub async fn add_track(&self, upload: Upload) -> Result<Vec<Track>> {
        if upload.name.trim().is_empty() {
            return Err(RadioError::InvalidInput("track name is empty".into()));
        }
        if upload.bytes.is_empty() {
            return Err(RadioError::InvalidInput("audio payload is missing".into()));
        }
        if !self.mime_allowed(&upload.mime) {
            return Err(RadioError::InvalidInput(format!(
                "unsupported audio type {}",
                upload.mime
            )));
        }

        let seq = self.next_id();
        let record = StoredTrack {
            id: seq.to_string(),
            name: normalize_name(&upload.name),
            origin: TrackOrigin::Local,
            remote_url: None,
            mime: Some(upload.mime),
            offset_seed: rand::thread_rng().gen_range(0..LOCAL_SEED_RANGE),
            created_seq: seq as u64,
            payload: Some(Payload::from_bytes(upload.bytes)),
        };
        info!(
            "[registry] adding {} ({}, seed={})",
            record.name, record.id, record.offset_seed
        );
        self.store.add(record).await?;
        Ok(self.list_tracks().await)
    }

    pub async fn remove_track(&self, id: &str) -> Result<Vec<Track>> {
        self.store.remove(id).await?;
        Ok(self.list_tracks().await)
    }

    fn mime_allowed(&self, mime: &str) -> bool {
        let essence = mime.split(';').next().unwrap_or("").trim();
        self.allowed_mime_types
            .iter()
            .any(|m| m.eq_ignore_ascii_case(essence))
    }

    /// Millisecond timestamp, bumped so ids issued by this process strictly
    /// increase.
    fn next_id(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let mut last = self.last_id.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self
                .last_id
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}
