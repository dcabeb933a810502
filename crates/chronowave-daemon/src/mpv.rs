//! mpv as the audio primitive.
//!
//! ```text
//!   MpvDriver::spawn_and_connect()
//!         │
//!         ├── writer_task   ← PendingRequest via mpsc → socket
//!         └── reader_task   ← JSON lines from socket
//!                                ├── reply (request_id) → oneshot
//!                                └── event / property-change → event_tx
//! ```
//!
//! `MpvHandle` is the cloneable command side.  `MpvAudio` wraps an optional
//! handle plus the values mpv pushes through `observe_property`, and is what
//! the player drives through `AudioOutput`.
//!
//! mpv runs with `--loop-file=inf`, so media never ends on its own and the
//! reported `duration` is the loop length.
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use chronowave_core::audio::{AudioEvent, AudioOutput};
use chronowave_core::platform;
use chronowave_core::protocol::PlaybackReference;
use chronowave_core::{RadioError, Result};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

pub const OBS_PAUSE: u64 = 1;
pub const OBS_TIME_POS: u64 = 2;
pub const OBS_DURATION: u64 = 3;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String,
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// Unsolicited line from mpv (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }
}

// ── handle ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let mut payload = serde_json::to_string(&json!({
            "command": command,
            "request_id": req_id,
        }))?;
        payload.push('\n');

        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload,
                reply,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub async fn set_property(&self, name: &str, value: Value) -> anyhow::Result<()> {
        self.send(json!(["set_property", name, value])).await?;
        Ok(())
    }

    pub async fn observe_properties(&self) {
        let props = [
            (OBS_PAUSE, "pause"),
            (OBS_TIME_POS, "time-pos"),
            (OBS_DURATION, "duration"),
        ];
        for (id, name) in props {
            if let Err(e) = self.send(json!(["observe_property", id, name])).await {
                warn!("mpv: observe_property {} failed: {}", name, e);
            }
        }
    }

    pub async fn stop(&self) {
        let _ = self.send(json!(["stop"])).await;
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
    pub initial_volume: f32,
}

impl MpvDriver {
    pub fn new(initial_volume: f32) -> Self {
        Self {
            socket_name: platform::mpv_socket_name(),
            process: None,
            initial_volume,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        match self.process {
            Some(ref mut child) => child.try_wait().ok().flatten().is_none(),
            None => false,
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    fn spawn_process(&mut self) -> anyhow::Result<()> {
        let mpv_binary =
            platform::find_mpv_binary().ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;
        info!("mpv: spawning {:?}", mpv_binary);

        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--loop-file=inf")
            .arg("--pause")
            .arg("--quiet")
            .arg(platform::mpv_socket_arg())
            .arg(format!("--volume={}", volume_percent(self.initial_volume)))
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);
        Ok(())
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;
        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        self.spawn_process()?;

        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to {}", self.socket_name);
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(read_half, write_half, event_tx))
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;
        self.spawn_process()?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to {}", pipe_path);
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(read_half, write_half, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

fn start_io_tasks<R, W>(read_half: R, write_half: W, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);
    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));
    MpvHandle { tx: cmd_tx }
}

async fn fail_pending(pending: &PendingMap, why: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("mpv IPC {}", why)));
    }
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap, event_tx: mpsc::Sender<MpvEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_pending(&pending, "connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };
                match val.get("request_id").and_then(Value::as_u64) {
                    Some(req_id) => {
                        let waiting = pending.lock().await.remove(&req_id);
                        let Some(tx) = waiting else {
                            debug!("mpv reader: reply for unknown req={}", req_id);
                            continue;
                        };
                        let result = match val["error"].as_str() {
                            Some("success") => Ok(val),
                            other => Err(anyhow::anyhow!(
                                "mpv error: {}",
                                other.unwrap_or("unknown error")
                            )),
                        };
                        let _ = tx.send(result);
                    }
                    None => {
                        if event_tx.send(MpvEvent { raw: val }).await.is_err() {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_pending(&pending, "read error").await;
                break;
            }
        }
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // register before writing so the reader can always match the reply
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: req={} {}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

fn volume_percent(volume: f32) -> i64 {
    (volume * 100.0).clamp(0.0, 100.0).round() as i64
}

// ── AudioOutput ───────────────────────────────────────────────────────────────

/// mpv seen through the `AudioOutput` contract.
///
/// Without a connected handle every command is rejected, which the player
/// treats like a refused `play`.
pub struct MpvAudio {
    handle: Option<MpvHandle>,
    /// Base URL of the blob server, e.g. `http://127.0.0.1:8990`.
    blob_base: String,
    duration: Option<f64>,
    time_pos: Option<f64>,
    paused: bool,
}

impl MpvAudio {
    pub fn new(blob_base: impl Into<String>) -> Self {
        Self {
            handle: None,
            blob_base: blob_base.into(),
            duration: None,
            time_pos: None,
            paused: true,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.handle.is_some()
    }

    pub fn attach(&mut self, handle: MpvHandle) {
        self.handle = Some(handle);
        self.reset();
    }

    pub fn detach(&mut self) -> Option<MpvHandle> {
        self.reset();
        self.handle.take()
    }

    fn reset(&mut self) {
        self.duration = None;
        self.time_pos = None;
        self.paused = true;
    }

    /// What mpv should open for a playback reference.
    pub fn media_url(&self, reference: &PlaybackReference) -> String {
        match reference.blob_token() {
            Some(token) => format!("{}/blob/{}", self.blob_base, token),
            None => reference.as_str().to_string(),
        }
    }

    fn handle(&self) -> Result<&MpvHandle> {
        self.handle
            .as_ref()
            .ok_or_else(|| RadioError::PlaybackRejected("audio output not running".into()))
    }

    async fn command(&self, name: &str, value: Value) -> Result<()> {
        self.handle()?
            .set_property(name, value)
            .await
            .map_err(|e| RadioError::PlaybackRejected(e.to_string()))
    }

    /// Fold an mpv event into the cached properties.  Returns the audio
    /// event the player has to react to, if any.
    pub fn apply_event(&mut self, evt: &MpvEvent) -> Option<AudioEvent> {
        if let Some((id, data)) = evt.as_property_change() {
            match id {
                OBS_PAUSE => self.paused = data.as_bool().unwrap_or(true),
                OBS_TIME_POS => self.time_pos = data.as_f64(),
                OBS_DURATION => {
                    let known = data.as_f64().filter(|d| d.is_finite() && *d > 0.0);
                    let was_unknown = self.duration.is_none();
                    self.duration = known;
                    if let Some(d) = known.filter(|_| was_unknown) {
                        return Some(AudioEvent::DurationAvailable(d));
                    }
                }
                _ => {}
            }
            return None;
        }

        match evt.event_name() {
            Some("end-file") => {
                let reason = evt.raw.get("reason").and_then(Value::as_str).unwrap_or("unknown");
                debug!("mpv: end-file reason={}", reason);
                if reason == "error" {
                    let detail = evt
                        .raw
                        .get("file_error")
                        .and_then(Value::as_str)
                        .unwrap_or("unplayable media");
                    self.reset();
                    return Some(AudioEvent::PlaybackError(detail.to_string()));
                }
                None
            }
            _ => None,
        }
    }
}

impl AudioOutput for MpvAudio {
    async fn load(&mut self, reference: &PlaybackReference) -> Result<()> {
        let url = self.media_url(reference);
        // pause sticks across files, so the new media starts paused
        self.command("pause", json!(true)).await?;
        self.handle()?
            .send(json!(["loadfile", url, "replace"]))
            .await
            .map_err(|e| RadioError::PlaybackRejected(e.to_string()))?;
        self.reset();
        Ok(())
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }

    fn position(&self) -> Option<f64> {
        self.time_pos
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    async fn seek(&mut self, secs: f64) -> Result<()> {
        self.command("time-pos", json!(secs)).await?;
        self.time_pos = Some(secs);
        Ok(())
    }

    async fn play(&mut self) -> Result<()> {
        self.command("pause", json!(false)).await?;
        self.paused = false;
        Ok(())
    }

    async fn pause(&mut self) -> Result<()> {
        self.command("pause", json!(true)).await?;
        self.paused = true;
        Ok(())
    }

    async fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.command("volume", json!(volume_percent(volume))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(id: u64, data: Value) -> MpvEvent {
        MpvEvent {
            raw: json!({ "event": "property-change", "id": id, "data": data }),
        }
    }

    #[test]
    fn blob_references_go_through_blob_server() {
        let audio = MpvAudio::new("http://127.0.0.1:8990");
        let blob = PlaybackReference::new("blob:chronowave/3-00ab12cd");
        assert_eq!(audio.media_url(&blob), "http://127.0.0.1:8990/blob/3-00ab12cd");
        let remote = PlaybackReference::new("https://example.com/a.mp3");
        assert_eq!(audio.media_url(&remote), "https://example.com/a.mp3");
    }

    #[test]
    fn duration_is_announced_once() {
        let mut audio = MpvAudio::new("http://x");
        assert_eq!(audio.apply_event(&change(OBS_DURATION, Value::Null)), None);
        assert_eq!(
            audio.apply_event(&change(OBS_DURATION, json!(212.5))),
            Some(AudioEvent::DurationAvailable(212.5))
        );
        assert_eq!(audio.apply_event(&change(OBS_DURATION, json!(212.5))), None);
        assert_eq!(audio.duration(), Some(212.5));
    }

    #[test]
    fn properties_are_cached() {
        let mut audio = MpvAudio::new("http://x");
        audio.apply_event(&change(OBS_PAUSE, json!(false)));
        audio.apply_event(&change(OBS_TIME_POS, json!(12.0)));
        assert!(!audio.is_paused());
        assert_eq!(audio.position(), Some(12.0));
    }

    #[test]
    fn load_errors_surface_as_playback_errors() {
        let mut audio = MpvAudio::new("http://x");
        let evt = MpvEvent {
            raw: json!({ "event": "end-file", "reason": "error", "file_error": "unrecognized file format" }),
        };
        assert_eq!(
            audio.apply_event(&evt),
            Some(AudioEvent::PlaybackError("unrecognized file format".into()))
        );
        let eof = MpvEvent {
            raw: json!({ "event": "end-file", "reason": "stop" }),
        };
        assert_eq!(audio.apply_event(&eof), None);
    }

    #[tokio::test]
    async fn detached_output_rejects_playback() {
        let mut audio = MpvAudio::new("http://x");
        let err = audio.play().await.unwrap_err();
        assert!(matches!(err, RadioError::PlaybackRejected(_)));
        assert!(audio.is_paused());
    }
}
