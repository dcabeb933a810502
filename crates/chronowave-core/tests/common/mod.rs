#![allow(dead_code)]

pub mod fake_audio;

use std::sync::Arc;

use chronowave_core::catalog::{BlobRegistry, CatalogBackend, CatalogStore, MemoryBackend};
use chronowave_core::registry::{default_tracks, TrackRegistry, Upload};
use rand::rngs::StdRng;
use rand::SeedableRng;

pub const AUDIO_TYPES: [&str; 3] = ["audio/mpeg", "audio/ogg", "audio/wav"];

pub fn allowed() -> Vec<String> {
    AUDIO_TYPES.iter().map(|s| s.to_string()).collect()
}

/// Registry over `backend` with deterministic default seeds.
pub fn registry_with<B: CatalogBackend>(backend: B) -> TrackRegistry<B> {
    let store = CatalogStore::new(backend, Arc::new(BlobRegistry::new()));
    let defaults = default_tracks(&mut StdRng::seed_from_u64(42));
    TrackRegistry::with_defaults(store, defaults, allowed())
}

pub fn memory_registry() -> TrackRegistry<MemoryBackend> {
    registry_with(MemoryBackend::new())
}

pub fn upload(name: &str, bytes: &[u8]) -> Upload {
    Upload {
        name: name.to_string(),
        mime: "audio/mpeg".to_string(),
        bytes: bytes.to_vec(),
    }
}
