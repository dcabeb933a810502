use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use super::Payload;
use crate::protocol::{PlaybackReference, BLOB_SCHEME};

/// Process-local table of minted blob references.
///
/// Every `mint` yields a reference that has never been handed out before,
/// even for the same payload.  References die with the process.
#[derive(Default)]
pub struct BlobRegistry {
    next: AtomicU64,
    blobs: RwLock<HashMap<String, Payload>>,
}

impl BlobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint(&self, payload: Payload) -> PlaybackReference {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        let token = format!("{}-{:08x}", n, rand::random::<u32>());
        self.blobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(token.clone(), payload);
        PlaybackReference::new(format!("{}{}", BLOB_SCHEME, token))
    }

    pub fn resolve(&self, token: &str) -> Option<Payload> {
        self.blobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(token)
            .cloned()
    }

    /// Forget the payload behind `reference`.  Remote references are ignored.
    pub fn revoke(&self, reference: &PlaybackReference) -> bool {
        let Some(token) = reference.blob_token() else {
            return false;
        };
        self.blobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(token)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_never_repeats() {
        let reg = BlobRegistry::new();
        let payload = Payload::from_bytes(b"abc".to_vec());
        let a = reg.mint(payload.clone());
        let b = reg.mint(payload);
        assert_ne!(a, b);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn revoke_releases_bytes() {
        let reg = BlobRegistry::new();
        let r = reg.mint(Payload::from_bytes(vec![1, 2, 3]));
        let token = r.blob_token().unwrap().to_string();
        assert!(reg.resolve(&token).is_some());
        assert!(reg.revoke(&r));
        assert!(reg.resolve(&token).is_none());
        assert!(!reg.revoke(&r));
        assert!(!reg.revoke(&PlaybackReference::new("https://x/y.mp3")));
        assert!(reg.is_empty());
    }
}
