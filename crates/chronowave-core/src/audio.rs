//! Contract of the external audio primitive the player drives.
//!
//! Implementations keep looping on: when the end of the media is reached,
//! playback continues from the start.  Duration is unknown until the media's
//! metadata has loaded, which the implementation reports as
//! `AudioEvent::DurationAvailable`.

use std::future::Future;

use crate::error::Result;
use crate::protocol::PlaybackReference;

pub trait AudioOutput {
    /// Replace the current media.  Leaves the primitive paused with an
    /// unknown duration.
    fn load(&mut self, reference: &PlaybackReference) -> impl Future<Output = Result<()>>;

    /// Loop length in seconds, once known.
    fn duration(&self) -> Option<f64>;

    /// Current playback position in seconds, if reported.
    fn position(&self) -> Option<f64>;

    fn is_paused(&self) -> bool;

    fn seek(&mut self, secs: f64) -> impl Future<Output = Result<()>>;

    /// Start playback.  Fails with `RadioError::PlaybackRejected` when the
    /// primitive refuses.
    fn play(&mut self) -> impl Future<Output = Result<()>>;

    fn pause(&mut self) -> impl Future<Output = Result<()>>;

    /// `volume` in `[0, 1]`.
    fn set_volume(&mut self, volume: f32) -> impl Future<Output = Result<()>>;
}

/// Unsolicited notifications from the primitive.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    DurationAvailable(f64),
    PlaybackError(String),
}
