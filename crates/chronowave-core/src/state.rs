use crate::player::PlayerState;
use crate::protocol::{RadioSnapshot, Track};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Read side of the radio for socket clients.  Only the core event loop
/// calls the `publish*` methods; everyone else reads snapshots.
pub struct StateManager {
    state: Arc<RwLock<RadioSnapshot>>,
}

impl StateManager {
    pub fn new(volume: f32) -> Self {
        let state = RadioSnapshot {
            rev: 1,
            volume,
            frequency_mhz: crate::clock::frequency_mhz(0),
            ..RadioSnapshot::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub async fn get_state(&self) -> RadioSnapshot {
        self.state.read().await.clone()
    }

    /// Mirror the player and the current list.  Returns the new revision.
    pub async fn publish(&self, player: &PlayerState, tracks: &[Track]) -> u64 {
        let mut state = self.state.write().await;
        state.power = player.power;
        state.tuning = player.tuning;
        state.playing = player.playing;
        state.volume = player.volume;
        state.current_index = player.current_index;
        state.frequency_mhz = player.frequency_mhz();
        state.tracks = tracks.iter().map(Track::summary).collect();
        state.rev += 1;
        state.rev
    }

    pub async fn set_error(&self, message: Option<String>) {
        let mut state = self.state.write().await;
        state.last_error = message;
        state.rev += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::default_tracks;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[tokio::test]
    async fn publish_bumps_revision_and_mirrors_player() {
        let sm = StateManager::new(0.5);
        let tracks = default_tracks(&mut StdRng::seed_from_u64(2));
        let player = PlayerState {
            power: true,
            current_index: 2,
            volume: 0.7,
            tuning: true,
            playing: true,
        };
        let before = sm.get_state().await.rev;
        let rev = sm.publish(&player, &tracks).await;
        assert_eq!(rev, before + 1);

        let snap = sm.get_state().await;
        assert!(snap.tuning);
        assert_eq!(snap.tracks.len(), 4);
        assert_eq!(snap.frequency_mhz, 90.5);
        assert_eq!(snap.current_track().unwrap().name, "JAZZ_CAFE_85");
    }

    #[tokio::test]
    async fn errors_are_kept_until_cleared() {
        let sm = StateManager::new(0.5);
        sm.set_error(Some("upload failed".into())).await;
        assert_eq!(sm.get_state().await.last_error.as_deref(), Some("upload failed"));
        sm.set_error(None).await;
        assert!(sm.get_state().await.last_error.is_none());
    }
}
