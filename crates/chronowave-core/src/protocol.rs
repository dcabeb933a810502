use serde::{Deserialize, Serialize};

use crate::catalog::Payload;

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect and can refuse to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

/// Scheme prefix of references minted for locally stored payloads.
pub const BLOB_SCHEME: &str = "blob:chronowave/";

// ── Tracks ────────────────────────────────────────────────────────────────────

/// Where a track's audio comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackOrigin {
    /// Fixed external http(s) address fetched by the audio primitive.
    Remote,
    /// Owns a binary payload persisted in the catalog.
    Local,
}

/// Transient handle the audio primitive can open.  Derived on every load,
/// never persisted, never assumed stable across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PlaybackReference(String);

impl PlaybackReference {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Token part of a `blob:` reference; `None` for remote addresses.
    pub fn blob_token(&self) -> Option<&str> {
        self.0.strip_prefix(BLOB_SCHEME)
    }
}

impl std::fmt::Display for PlaybackReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A catalog entry as held in memory.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub origin: TrackOrigin,
    /// Present iff `origin == Local`.
    pub payload: Option<Payload>,
    /// Address for remote tracks.
    pub remote_url: Option<String>,
    pub mime: Option<String>,
    /// Phase shift against the broadcast epoch, seconds.  Immutable.
    pub offset_seed: u32,
    /// Creation sequence used to give catalog reads a stable order.
    pub created_seq: u64,
    pub reference: PlaybackReference,
}

impl Track {
    pub fn summary(&self) -> TrackSummary {
        TrackSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            origin: self.origin,
            offset_seed: self.offset_seed,
            size_bytes: self.payload.as_ref().map(Payload::len),
        }
    }
}

/// Wire form of a track: metadata only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSummary {
    pub id: String,
    pub name: String,
    pub origin: TrackOrigin,
    pub offset_seed: u32,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

// ── Snapshot ──────────────────────────────────────────────────────────────────

/// Everything a client needs to render the radio.  `rev` increments on every
/// change so clients can detect missed updates.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RadioSnapshot {
    #[serde(default)]
    pub rev: u64,
    pub power: bool,
    pub tuning: bool,
    pub playing: bool,
    pub volume: f32,
    pub current_index: usize,
    /// Dial label for `current_index` (only meaningful while on).
    pub frequency_mhz: f64,
    pub tracks: Vec<TrackSummary>,
    /// Last user-visible failure (e.g. an upload that did not persist).
    #[serde(default)]
    pub last_error: Option<String>,
}

impl RadioSnapshot {
    pub fn current_track(&self) -> Option<&TrackSummary> {
        if !self.power {
            return None;
        }
        self.tracks.get(self.current_index)
    }
}

// ── Wire messages ─────────────────────────────────────────────────────────────

/// Messages sent from a client to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    Power,
    TuneUp,
    TuneDown,
    VolumeCycle,
    /// Upload a local file.  `name` falls back to one derived from the file name.
    AddTrack { path: String, name: Option<String> },
    RemoveTrack { id: String },
    /// Re-read the catalog.
    Refresh,
    GetState,
}

/// Messages sent from the daemon to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + full snapshot.
    Hello {
        protocol_version: u32,
        state: RadioSnapshot,
    },
    State {
        data: RadioSnapshot,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_encode_decode() {
        let msg = Message::Command(Command::RemoveTrack { id: "1700".into() });
        let encoded = msg.encode().unwrap();
        let (decoded, len) = Message::decode(&encoded).unwrap();
        assert_eq!(len, encoded.len());
        match decoded {
            Message::Command(Command::RemoveTrack { id }) => assert_eq!(id, "1700"),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_hello_carries_snapshot() {
        let state = RadioSnapshot {
            rev: 42,
            power: true,
            current_index: 1,
            tracks: vec![TrackSummary {
                id: "2".into(),
                name: "LATE_NIGHT_TALK".into(),
                origin: TrackOrigin::Remote,
                offset_seed: 10,
                size_bytes: None,
            }],
            ..Default::default()
        };
        let msg = Message::Broadcast(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION,
            state,
        });
        let encoded = msg.encode().unwrap();
        let (decoded, _) = Message::decode(&encoded).unwrap();
        match decoded {
            Message::Broadcast(Broadcast::Hello {
                protocol_version,
                state,
            }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(state.rev, 42);
                assert_eq!(state.current_track().map(|t| t.id.as_str()), None);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_partial_frame_is_rejected() {
        let encoded = Message::Command(Command::Power).encode().unwrap();
        assert!(Message::decode(&encoded[..encoded.len() - 1]).is_err());
        assert!(Message::decode(&encoded[..2]).is_err());
    }

    #[test]
    fn blob_token_only_for_blob_scheme() {
        let blob = PlaybackReference::new(format!("{}7-abc", BLOB_SCHEME));
        assert_eq!(blob.blob_token(), Some("7-abc"));
        let remote = PlaybackReference::new("https://example.com/a.ogg");
        assert_eq!(remote.blob_token(), None);
        assert!(PlaybackReference::empty().is_empty());
    }
}
