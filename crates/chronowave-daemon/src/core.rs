//! DaemonCore: single-owner event loop for the radio.
//!
//! Client commands, tuning timers, mpv events and the heartbeat all arrive
//! as `DaemonEvent`s on one channel.  DaemonCore owns the `Player`, the
//! `TrackRegistry` and the mpv driver exclusively; nothing else mutates
//! player state, so transitions are applied strictly one at a time.
//!
//! After every event that changes what clients see, the snapshot in
//! `StateManager` is republished and `BroadcastMessage::StateUpdated` goes
//! out on the broadcast channel.
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chronowave_core::audio::{AudioEvent, AudioOutput};
use chronowave_core::catalog::{BlobRegistry, CatalogBackend};
use chronowave_core::clock::BroadcastClock;
use chronowave_core::config::Config;
use chronowave_core::player::{Player, SyncOutcome, TuneDirection};
use chronowave_core::protocol::{Command, PlaybackReference, Track};
use chronowave_core::registry::{TrackRegistry, Upload};
use chronowave_core::state::StateManager;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::blob_server;
use crate::mpv::{MpvAudio, MpvDriver, MpvEvent};
use crate::BroadcastMessage;

const HEARTBEAT: Duration = Duration::from_secs(10);

/// All inputs into the DaemonCore loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A command from a socket client.
    ClientCommand(Command),
    /// The tuning delay for one tune press elapsed.
    TuneSettled(TuneDirection),
    /// Unsolicited mpv event (forwarded from the reader task).
    MpvEvent(MpvEvent),
    /// Liveness check plus drift correction of a track that is playing.
    HeartbeatTick,
    Shutdown,
}

/// Post `TuneSettled(direction)` back into the loop after `delay`.
pub fn schedule_tune_settle(
    event_tx: mpsc::Sender<DaemonEvent>,
    direction: TuneDirection,
    delay: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if event_tx.send(DaemonEvent::TuneSettled(direction)).await.is_err() {
            debug!("DaemonCore: loop gone before tune settled");
        }
    })
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Revoke `reference` unless a track in `tracks` still hands it out.
fn release_unlisted(blobs: &BlobRegistry, tracks: &[Track], reference: &PlaybackReference) -> bool {
    if tracks.iter().any(|t| &t.reference == reference) {
        return false;
    }
    blobs.revoke(reference)
}

/// Revoke the references of a list that was just replaced, except `keep`.
fn release_replaced(blobs: &BlobRegistry, old: Vec<Track>, keep: Option<&PlaybackReference>) {
    for track in old {
        if track.reference.blob_token().is_some() && Some(&track.reference) != keep {
            blobs.revoke(&track.reference);
        }
    }
}

pub struct DaemonCore<B> {
    config: Config,
    registry: TrackRegistry<B>,
    player: Player,
    /// The list the player indexes into: persisted tracks or the built-in
    /// stations.
    tracks: Vec<Track>,
    state_manager: Arc<StateManager>,
    mpv_driver: MpvDriver,
    audio: MpvAudio,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl<B: CatalogBackend> DaemonCore<B> {
    pub async fn new(
        config: Config,
        registry: TrackRegistry<B>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> anyhow::Result<Self> {
        let clock = match config.player.epoch_ms {
            Some(ms) => BroadcastClock::from_epoch_ms(ms),
            None => BroadcastClock::starting_now(),
        };
        info!("DaemonCore: broadcast epoch {}", clock.epoch());

        let player = Player::new(clock, config.player.clone());
        let state_manager = Arc::new(StateManager::new(player.state().volume));
        let tracks = registry.list_tracks().await;
        info!("DaemonCore: {} tracks on the dial", tracks.len());

        let audio = MpvAudio::new(blob_server::base_url(
            &config.http.bind_address,
            config.http.blob_port,
        ));
        let mpv_driver = MpvDriver::new(player.state().volume);

        let core = Self {
            config,
            registry,
            player,
            tracks,
            state_manager,
            mpv_driver,
            audio,
            event_tx,
            broadcast_tx,
        };
        core.state_manager
            .publish(core.player.state(), &core.tracks)
            .await;
        Ok(core)
    }

    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    /// Run until `Shutdown` or until every sender is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!("DaemonCore: starting event loop");

        let heartbeat_tx = self.event_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(HEARTBEAT).await;
                if heartbeat_tx.send(DaemonEvent::HeartbeatTick).await.is_err() {
                    break;
                }
            }
        });

        loop {
            match event_rx.recv().await {
                None => {
                    info!("DaemonCore: event channel closed, shutting down");
                    break;
                }
                Some(DaemonEvent::Shutdown) => {
                    info!("DaemonCore: shutdown requested");
                    break;
                }
                Some(DaemonEvent::ClientCommand(cmd)) => {
                    info!("DaemonCore: command {:?}", cmd);
                    // last_error describes the most recent command only
                    self.state_manager.set_error(None).await;
                    if let Err(e) = self.handle_command(cmd).await {
                        let message = e.to_string();
                        error!("DaemonCore: {}", message);
                        self.state_manager.set_error(Some(message.clone())).await;
                        let _ = self.broadcast_tx.send(BroadcastMessage::Error(message));
                    }
                    self.publish().await;
                }
                Some(DaemonEvent::TuneSettled(direction)) => {
                    self.player.settle_tune(direction, self.tracks.len());
                    self.sync().await;
                    self.publish().await;
                }
                Some(DaemonEvent::MpvEvent(evt)) => self.handle_mpv_event(evt).await,
                Some(DaemonEvent::HeartbeatTick) => self.heartbeat().await,
            }
        }

        self.cleanup().await;
        Ok(())
    }

    // ── commands ──────────────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) -> anyhow::Result<()> {
        match cmd {
            Command::Power => {
                self.player
                    .toggle_power(self.tracks.len(), &mut rand::thread_rng());
                self.sync().await;
            }
            Command::TuneUp => self.tune(TuneDirection::Up).await,
            Command::TuneDown => self.tune(TuneDirection::Down).await,
            Command::VolumeCycle => {
                let volume = self.player.cycle_volume();
                debug!("DaemonCore: volume {:.1}", volume);
                if self.audio.is_attached() {
                    if let Err(e) = self.audio.set_volume(volume).await {
                        warn!("DaemonCore: volume change failed: {}", e);
                    }
                }
            }
            Command::AddTrack { path, name } => {
                let upload = Upload::from_file(Path::new(&path), name)
                    .await
                    .map_err(|e| anyhow::anyhow!("upload failed: {}", e))?;
                let tracks = self
                    .registry
                    .add_track(upload)
                    .await
                    .map_err(|e| anyhow::anyhow!("upload failed: {}", e))?;
                self.replace_tracks(tracks);
                self.sync().await;
            }
            Command::RemoveTrack { id } => {
                let tracks = self
                    .registry
                    .remove_track(&id)
                    .await
                    .map_err(|e| anyhow::anyhow!("remove failed: {}", e))?;
                self.replace_tracks(tracks);
                self.sync().await;
            }
            Command::Refresh => {
                let tracks = self.registry.list_tracks().await;
                self.replace_tracks(tracks);
                self.sync().await;
            }
            Command::GetState => {}
        }
        Ok(())
    }

    async fn tune(&mut self, direction: TuneDirection) {
        if !self.player.begin_tune(direction) {
            return;
        }
        self.sync().await;
        let delay = Duration::from_millis(self.config.player.tuning_delay_ms);
        schedule_tune_settle(self.event_tx.clone(), direction, delay);
    }

    /// Swap in a fresh track list.  References minted for the old list are
    /// revoked, except the one mpv is currently playing.
    fn replace_tracks(&mut self, tracks: Vec<Track>) {
        let old = std::mem::replace(&mut self.tracks, tracks);
        release_replaced(
            self.registry.store().blobs(),
            old,
            self.player.loaded_reference(),
        );
        self.player.clamp_index(self.tracks.len());
    }

    /// mpv lost its media.  The reference it held goes too, unless the
    /// current list still uses it.
    fn forget_loaded(&mut self) {
        if let Some(reference) = self.player.forget_loaded() {
            if release_unlisted(self.registry.store().blobs(), &self.tracks, &reference) {
                debug!("DaemonCore: released {}", reference);
            }
        }
    }

    // ── audio ─────────────────────────────────────────────────────────────────

    /// Run the player's synchronization contract against mpv.
    async fn sync(&mut self) {
        if self.player.state().power {
            self.ensure_audio().await;
        }
        let before = self.player.loaded_reference().cloned();
        let outcome = self
            .player
            .sync(&self.tracks, now_ms(), &mut self.audio)
            .await;
        self.after_sync(before, outcome).await;
    }

    async fn after_sync(&mut self, before: Option<PlaybackReference>, outcome: SyncOutcome) {
        if let Some(prev) = before {
            if self.player.loaded_reference() != Some(&prev) {
                release_unlisted(self.registry.store().blobs(), &self.tracks, &prev);
            }
        }
        match outcome {
            SyncOutcome::Rejected(why) => {
                // no retry loop: the next power/tune action goes through sync again
                self.state_manager
                    .set_error(Some(format!("playback rejected: {}", why)))
                    .await;
            }
            other => debug!("DaemonCore: sync {:?}", other),
        }
    }

    /// Make sure mpv is running and connected.
    async fn ensure_audio(&mut self) {
        if self.audio.is_attached() && self.mpv_driver.process_alive() {
            return;
        }
        if self.audio.detach().is_some() {
            warn!("DaemonCore: mpv process died, restarting");
            self.forget_loaded();
        }

        let (mpv_tx, mut mpv_rx) = mpsc::channel::<MpvEvent>(64);
        let core_tx = self.event_tx.clone();
        tokio::spawn(async move {
            while let Some(evt) = mpv_rx.recv().await {
                if core_tx.send(DaemonEvent::MpvEvent(evt)).await.is_err() {
                    break;
                }
            }
        });

        self.mpv_driver.initial_volume = self.player.state().volume;
        match self.mpv_driver.spawn_and_connect(mpv_tx).await {
            Ok(handle) => {
                handle.observe_properties().await;
                self.audio.attach(handle);
            }
            Err(e) => warn!("DaemonCore: failed to start mpv: {}", e),
        }
    }

    async fn handle_mpv_event(&mut self, evt: MpvEvent) {
        match self.audio.apply_event(&evt) {
            Some(AudioEvent::DurationAvailable(secs)) => {
                debug!("DaemonCore: loop length {:.1}s", secs);
                let before = self.player.loaded_reference().cloned();
                let outcome = self
                    .player
                    .on_duration_available(&self.tracks, now_ms(), &mut self.audio)
                    .await;
                self.after_sync(before, outcome).await;
                self.publish().await;
            }
            Some(AudioEvent::PlaybackError(why)) => {
                warn!("DaemonCore: playback error: {}", why);
                self.forget_loaded();
                self.state_manager
                    .set_error(Some(format!("playback error: {}", why)))
                    .await;
                self.publish().await;
            }
            None => {}
        }
    }

    /// Never starts, loads or retries playback: a refused or failed track
    /// waits for the next power or tune press.
    async fn heartbeat(&mut self) {
        if self.audio.is_attached() && !self.mpv_driver.process_alive() {
            warn!("DaemonCore: heartbeat: mpv process died");
            self.audio.detach();
            self.forget_loaded();
            return;
        }
        if !self.audio.is_attached() {
            return;
        }
        let outcome = self
            .player
            .correct_drift(&self.tracks, now_ms(), &mut self.audio)
            .await;
        if outcome != SyncOutcome::Untouched {
            debug!("DaemonCore: heartbeat {:?}", outcome);
        }
    }

    async fn publish(&self) {
        let rev = self
            .state_manager
            .publish(self.player.state(), &self.tracks)
            .await;
        debug!("DaemonCore: published rev {}", rev);
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    async fn cleanup(&mut self) {
        info!("DaemonCore: cleanup, stopping mpv");
        if let Some(handle) = self.audio.detach() {
            handle.stop().await;
        }
        self.mpv_driver.kill().await;
    }
}
