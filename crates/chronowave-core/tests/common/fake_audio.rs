use chronowave_core::audio::AudioOutput;
use chronowave_core::error::{RadioError, Result};
use chronowave_core::protocol::PlaybackReference;

/// Scriptable stand-in for the audio primitive.  Records every call.
#[derive(Debug)]
pub struct FakeAudio {
    pub loaded: Vec<PlaybackReference>,
    pub duration: Option<f64>,
    pub position: Option<f64>,
    pub paused: bool,
    pub volume: f32,
    pub seeks: Vec<f64>,
    pub plays: usize,
    /// `play` calls, refused ones included.
    pub play_attempts: usize,
    pub pauses: usize,
    pub reject_play: bool,
}

impl FakeAudio {
    pub fn new() -> Self {
        Self {
            loaded: Vec::new(),
            duration: None,
            position: None,
            paused: true,
            volume: 1.0,
            seeks: Vec::new(),
            plays: 0,
            play_attempts: 0,
            pauses: 0,
            reject_play: false,
        }
    }

    /// The media failed: mpv goes idle and forgets the file.
    pub fn fail_media(&mut self) {
        self.paused = true;
        self.duration = None;
        self.position = None;
    }

    /// Metadata finished loading.
    pub fn report_duration(&mut self, secs: f64) {
        self.duration = Some(secs);
    }
}

impl AudioOutput for FakeAudio {
    async fn load(&mut self, reference: &PlaybackReference) -> Result<()> {
        self.loaded.push(reference.clone());
        self.duration = None;
        self.position = Some(0.0);
        self.paused = true;
        Ok(())
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }

    fn position(&self) -> Option<f64> {
        self.position
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    async fn seek(&mut self, secs: f64) -> Result<()> {
        self.seeks.push(secs);
        self.position = Some(secs);
        Ok(())
    }

    async fn play(&mut self) -> Result<()> {
        self.play_attempts += 1;
        if self.reject_play {
            return Err(RadioError::PlaybackRejected("autoplay blocked".into()));
        }
        self.plays += 1;
        self.paused = false;
        Ok(())
    }

    async fn pause(&mut self) -> Result<()> {
        self.pauses += 1;
        self.paused = true;
        Ok(())
    }

    async fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.volume = volume;
        Ok(())
    }
}
