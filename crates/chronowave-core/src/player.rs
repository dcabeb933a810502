//! Player state machine.
//!
//! # States
//! ```text
//!   Off ──power──▶ On ──tune──▶ Tuning ──(tuning delay)──▶ On
//!    ▲              │
//!    └────power─────┘
//! ```
//!
//! The machine itself never sleeps: `begin_tune` marks the transition and the
//! owner of the player settles it with `settle_tune` after the configured
//! delay.  After every transition (and whenever the primitive reports a
//! duration) the owner calls `sync`, which is the only place the audio
//! primitive is touched.

use rand::Rng;
use tracing::{debug, info, warn};

use crate::audio::AudioOutput;
use crate::clock::{frequency_mhz, BroadcastClock};
use crate::config::PlayerConfig;
use crate::protocol::{PlaybackReference, Track};

/// Session-local player state.  Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub power: bool,
    pub current_index: usize,
    /// `[0, 1]`
    pub volume: f32,
    /// True only between `begin_tune` and `settle_tune`.
    pub tuning: bool,
    /// Best-effort mirror of the primitive's play/pause status.
    pub playing: bool,
}

impl PlayerState {
    pub fn new(volume: f32) -> Self {
        Self {
            power: false,
            current_index: 0,
            volume: volume.clamp(0.0, 1.0),
            tuning: false,
            playing: false,
        }
    }

    pub fn mode(&self) -> PlayerMode {
        match (self.power, self.tuning) {
            (false, _) => PlayerMode::Off,
            (true, false) => PlayerMode::On,
            (true, true) => PlayerMode::Tuning,
        }
    }

    pub fn frequency_mhz(&self) -> f64 {
        frequency_mhz(self.current_index)
    }
}

impl Default for PlayerState {
    fn default() -> Self {
        Self::new(0.5)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerMode {
    Off,
    On,
    Tuning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuneDirection {
    Up,
    Down,
}

impl TuneDirection {
    fn delta(self) -> isize {
        match self {
            Self::Up => 1,
            Self::Down => -1,
        }
    }
}

/// What `sync` did to the primitive.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Off or tuning: primitive paused.
    Silenced,
    /// On, but there is nothing to play.
    NoTrack,
    /// Was paused; seeked (when the duration is known) and started.
    Started { position: f64 },
    /// Already playing but drifted past the threshold; seeked.
    Resynced { position: f64 },
    /// Already playing close enough to the broadcast position.
    InSync,
    /// The primitive refused.  State is left as is; the next user action
    /// retries through the same path.
    Rejected(String),
    /// Drift check found nothing audibly playing; the primitive was not
    /// touched.
    Untouched,
}

/// Track currently loaded into the primitive.
#[derive(Debug, Clone, PartialEq)]
struct Loaded {
    id: String,
    reference: PlaybackReference,
}

pub struct Player {
    clock: BroadcastClock,
    config: PlayerConfig,
    state: PlayerState,
    loaded: Option<Loaded>,
}

impl Player {
    pub fn new(clock: BroadcastClock, config: PlayerConfig) -> Self {
        let state = PlayerState::new(config.default_volume);
        Self {
            clock,
            config,
            state,
            loaded: None,
        }
    }

    pub fn state(&self) -> &PlayerState {
        &self.state
    }

    pub fn clock(&self) -> &BroadcastClock {
        &self.clock
    }

    /// Reference most recently loaded into the primitive.
    pub fn loaded_reference(&self) -> Option<&PlaybackReference> {
        self.loaded.as_ref().map(|l| &l.reference)
    }

    pub fn current_track<'a>(&self, tracks: &'a [Track]) -> Option<&'a Track> {
        tracks.get(self.state.current_index)
    }

    // ── transitions ───────────────────────────────────────────────────────────

    /// Off → On picks a uniformly random channel; On → Off stops playback.
    pub fn toggle_power<R: Rng>(&mut self, track_count: usize, rng: &mut R) {
        if self.state.power {
            self.state.power = false;
            self.state.playing = false;
            info!("[player] power off");
            return;
        }
        self.state.power = true;
        if track_count == 0 {
            self.state.playing = false;
            info!("[player] power on, no tracks");
        } else {
            self.state.current_index = rng.gen_range(0..track_count);
            self.state.playing = true;
            info!("[player] power on, channel {}", self.state.current_index);
        }
    }

    /// Enter `Tuning`.  Ignored (returns false) while off.
    pub fn begin_tune(&mut self, direction: TuneDirection) -> bool {
        if !self.state.power {
            debug!("[player] tune {:?} ignored while off", direction);
            return false;
        }
        self.state.tuning = true;
        true
    }

    /// Complete a tuning transition: step the index with wraparound and
    /// leave `Tuning`.
    ///
    /// Runs even if power went off in the meantime; with power off the next
    /// `sync` keeps the primitive paused, so the index change is harmless.
    pub fn settle_tune(&mut self, direction: TuneDirection, track_count: usize) {
        if track_count > 0 {
            let n = track_count as isize;
            let i = (self.state.current_index as isize).min(n - 1);
            self.state.current_index = ((i + direction.delta() + n) % n) as usize;
        }
        self.state.tuning = false;
        debug!(
            "[player] settled on channel {} ({:.1} MHz)",
            self.state.current_index,
            self.state.frequency_mhz()
        );
    }

    /// Step the volume up; from the top it wraps to the configured floor
    /// rather than to silence.
    pub fn cycle_volume(&mut self) -> f32 {
        let next = if self.state.volume >= 1.0 - f32::EPSILON {
            self.config.volume_floor
        } else {
            (self.state.volume + self.config.volume_step).min(1.0)
        };
        self.state.volume = next.clamp(0.0, 1.0);
        self.state.volume
    }

    /// Reset the index to 0 when the list no longer covers it.  Returns true
    /// when the index changed.
    pub fn clamp_index(&mut self, track_count: usize) -> bool {
        if self.state.current_index >= track_count && self.state.current_index != 0 {
            debug!(
                "[player] channel {} gone (have {}), back to 0",
                self.state.current_index, track_count
            );
            self.state.current_index = 0;
            return true;
        }
        false
    }

    // ── synchronization ───────────────────────────────────────────────────────

    /// Bring the primitive in line with the state and the broadcast clock.
    pub async fn sync<A: AudioOutput>(
        &mut self,
        tracks: &[Track],
        now_ms: i64,
        audio: &mut A,
    ) -> SyncOutcome {
        if !self.state.power || self.state.tuning {
            self.silence(audio).await;
            return SyncOutcome::Silenced;
        }
        let Some(track) = self.current_track(tracks) else {
            self.silence(audio).await;
            return SyncOutcome::NoTrack;
        };
        if track.reference.is_empty() {
            warn!("[player] {} has no playable reference", track.name);
            self.silence(audio).await;
            return SyncOutcome::NoTrack;
        }

        let needs_load = self
            .loaded
            .as_ref()
            .map(|l| l.id != track.id)
            .unwrap_or(true);
        if needs_load {
            info!("[player] loading {} ({})", track.name, track.id);
            if let Err(e) = audio.load(&track.reference).await {
                warn!("[player] load failed for {}: {}", track.name, e);
                return SyncOutcome::Rejected(e.to_string());
            }
            self.loaded = Some(Loaded {
                id: track.id.clone(),
                reference: track.reference.clone(),
            });
        }

        if let Err(e) = audio.set_volume(self.state.volume).await {
            warn!("[player] set volume failed: {}", e);
        }

        let duration = audio.duration().filter(|d| d.is_finite() && *d > 0.0);
        let target = self.clock.position(track.offset_seed, duration, now_ms);

        if audio.is_paused() {
            if duration.is_some() {
                if let Err(e) = audio.seek(target).await {
                    warn!("[player] seek to {:.1}s failed: {}", target, e);
                }
            }
            return match audio.play().await {
                Ok(()) => {
                    debug!("[player] started {} at {:.1}s", track.name, target);
                    SyncOutcome::Started { position: target }
                }
                Err(e) => {
                    warn!("[player] playback rejected: {}", e);
                    SyncOutcome::Rejected(e.to_string())
                }
            };
        }

        let Some(duration) = duration else {
            return SyncOutcome::InSync;
        };
        let drift = audio
            .position()
            .map(|pos| loop_distance(pos, target, duration))
            .unwrap_or(f64::INFINITY);
        if drift > self.config.resync_threshold_secs {
            debug!("[player] drift {:.2}s, seeking to {:.1}s", drift, target);
            if let Err(e) = audio.seek(target).await {
                warn!("[player] resync seek failed: {}", e);
            }
            SyncOutcome::Resynced { position: target }
        } else {
            SyncOutcome::InSync
        }
    }

    /// The primitive just learned the loop length: resynchronize.
    pub async fn on_duration_available<A: AudioOutput>(
        &mut self,
        tracks: &[Track],
        now_ms: i64,
        audio: &mut A,
    ) -> SyncOutcome {
        debug!("[player] duration available: {:?}", audio.duration());
        self.sync(tracks, now_ms, audio).await
    }

    /// Periodic drift correction.  Only the selected track, already loaded
    /// and playing, is re-seeked; a paused, refused or failed primitive is
    /// left alone until the next user action.
    pub async fn correct_drift<A: AudioOutput>(
        &mut self,
        tracks: &[Track],
        now_ms: i64,
        audio: &mut A,
    ) -> SyncOutcome {
        let selected_is_loaded = match (&self.loaded, self.current_track(tracks)) {
            (Some(loaded), Some(track)) => loaded.id == track.id,
            _ => false,
        };
        if !self.state.power || self.state.tuning || !selected_is_loaded || audio.is_paused() {
            return SyncOutcome::Untouched;
        }
        self.sync(tracks, now_ms, audio).await
    }

    /// The primitive dropped its media (process restart, playback error):
    /// forget what was loaded so the next sync loads again.  Returns the
    /// reference the primitive was holding.
    pub fn forget_loaded(&mut self) -> Option<PlaybackReference> {
        self.loaded.take().map(|l| l.reference)
    }

    async fn silence<A: AudioOutput>(&mut self, audio: &mut A) {
        if !audio.is_paused() {
            if let Err(e) = audio.pause().await {
                warn!("[player] pause failed: {}", e);
            }
        }
    }
}

/// Distance between two positions on a loop of length `duration`.
fn loop_distance(a: f64, b: f64, duration: f64) -> f64 {
    let d = (a - b).abs() % duration;
    d.min(duration - d)
}
