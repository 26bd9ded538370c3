//! mpv as a [`PlaybackResource`].
//!
//! Architecture:
//!
//! ```text
//!   MpvResource::spawn()
//!         │
//!         ├── writer_task      ← PendingRequest via mpsc, serialised → socket
//!         ├── reader_task      ← JSON lines from socket
//!         │                        ├── response (request_id) → matched oneshot
//!         │                        └── event / property-change → event channel
//!         └── translator_task  ← event channel → MediaEvent → MediaSink
//! ```
//!
//! The player never waits on mpv: transport calls enqueue a command in order
//! and return.  Replies are only awaited for logging (and for `play`).
//!
//! Platform notes:
//! - Unix:   Unix domain sockets
//! - Windows: Named pipes  \\.\pipe\<name>
use parking_lot::Mutex as SyncMutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wave_engine::{MediaEvent, MediaSink, PlaybackResource};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

// ── global request-id counter ─────────────────────────────────────────────────

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

// ── observation property IDs ──────────────────────────────────────────────────

pub const OBS_DURATION: u64 = 1;
pub const OBS_TIME_POS: u64 = 2;
pub const OBS_PAUSE: u64 = 3;
pub const OBS_PAUSED_FOR_CACHE: u64 = 4;

const OBSERVED: [(u64, &str); 4] = [
    (OBS_DURATION, "duration"),
    (OBS_TIME_POS, "time-pos"),
    (OBS_PAUSE, "pause"),
    (OBS_PAUSED_FOR_CACHE, "paused-for-cache"),
];

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

// ── internal channel types ────────────────────────────────────────────────────

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// Returns `Some((obs_id, data))` if this is a property-change event.
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    /// Returns the event name, e.g. "end-file", "file-loaded".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }
}

// ── handle ────────────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::UnboundedSender<PendingRequest>,
}

impl MpvHandle {
    /// Enqueue `command` without waiting.  Commands reach mpv in submission
    /// order; the receiver resolves with mpv's reply.
    pub fn submit(&self, command: Value) -> anyhow::Result<oneshot::Receiver<anyhow::Result<Value>>> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;
        Ok(reply_rx)
    }

    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let reply_rx = self.submit(command)?;
        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout"))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped"))?
    }

    /// Fire `command`, logging a failed reply in the background.
    pub fn fire(&self, command: Value) {
        let label = command.to_string();
        match self.submit(command) {
            Ok(reply_rx) => {
                tokio::spawn(async move {
                    match reply_rx.await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => warn!("mpv: {} failed: {}", label, e),
                        Err(_) => debug!("mpv: {} reply dropped", label),
                    }
                });
            }
            Err(e) => warn!("mpv: {} not sent: {}", label, e),
        }
    }

    /// Register observe_property for everything the translator reads.
    pub async fn observe_all_properties(&self) {
        for (id, name) in &OBSERVED {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }
}

// ── event translation ─────────────────────────────────────────────────────────

/// What the translator has seen so far for the current file.
#[derive(Debug, Default)]
struct Observed {
    loaded: bool,
    /// `MetadataLoaded` already reported for this file.
    metadata_sent: bool,
    paused: bool,
    can_play: bool,
    time_pos: f64,
    /// Target of a seek waiting for `playback-restart`.
    seeking: Option<f64>,
}

impl Observed {
    fn reset(&mut self) {
        *self = Observed {
            paused: self.paused,
            ..Observed::default()
        };
    }
}

/// Map one mpv event onto the media events it implies.
fn translate(observed: &mut Observed, event: &MpvEvent) -> Vec<MediaEvent> {
    if let Some((obs_id, data)) = event.as_property_change() {
        return match obs_id {
            // mpv refines `duration` mid-file for streams and VBR sources;
            // metadata resolves once per file.
            OBS_DURATION => match data.as_f64() {
                Some(duration) if !observed.metadata_sent => {
                    observed.metadata_sent = true;
                    vec![MediaEvent::MetadataLoaded { duration }]
                }
                Some(duration) => {
                    debug!("mpv: duration refined to {}", duration);
                    Vec::new()
                }
                None => Vec::new(),
            },
            OBS_TIME_POS => match data.as_f64() {
                Some(current_time) => {
                    observed.time_pos = current_time;
                    vec![MediaEvent::TimeUpdate { current_time }]
                }
                None => Vec::new(),
            },
            OBS_PAUSE => {
                let paused = data.as_bool().unwrap_or(false);
                let changed = paused != observed.paused;
                observed.paused = paused;
                match (observed.loaded && changed, paused) {
                    (true, true) => vec![MediaEvent::Paused],
                    (true, false) => vec![MediaEvent::Playing],
                    _ => Vec::new(),
                }
            }
            OBS_PAUSED_FOR_CACHE => match data.as_bool() {
                Some(true) => vec![MediaEvent::Waiting],
                Some(false) => {
                    observed.can_play = true;
                    vec![MediaEvent::CanPlay]
                }
                None => Vec::new(),
            },
            _ => Vec::new(),
        };
    }

    match event.event_name() {
        Some("file-loaded") => {
            observed.loaded = true;
            observed.can_play = true;
            let mut events = vec![MediaEvent::CanPlay];
            if !observed.paused {
                events.push(MediaEvent::Playing);
            }
            events
        }
        Some("playback-restart") => match observed.seeking.take() {
            Some(time) => vec![MediaEvent::Seeked { time }],
            None => Vec::new(),
        },
        Some("end-file") => {
            let reason = event.raw.get("reason").and_then(|r| r.as_str());
            let was_loaded = observed.loaded;
            observed.reset();
            match reason {
                Some("eof") => vec![MediaEvent::Ended],
                Some("error") => {
                    let message = event
                        .raw
                        .get("file_error")
                        .and_then(|e| e.as_str())
                        .unwrap_or("playback error")
                        .to_string();
                    vec![MediaEvent::Error { message }]
                }
                _ if was_loaded => vec![MediaEvent::Paused],
                _ => Vec::new(),
            }
        }
        _ => Vec::new(),
    }
}

async fn translator_task(
    mut rx: mpsc::Receiver<MpvEvent>,
    observed: Arc<SyncMutex<Observed>>,
    sink: Arc<OnceLock<MediaSink>>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        debug!("mpv event: {:?}", event.raw);
        let media = translate(&mut observed.lock(), &event);
        if let Some(sink) = sink.get() {
            for m in media {
                if !sink.emit(m) {
                    debug!("mpv translator: player gone");
                    return;
                }
            }
        }
    }
    debug!("mpv translator: exiting");
}

// ── resource ──────────────────────────────────────────────────────────────────

/// Owns the mpv child process and its IPC tasks.
pub struct MpvResource {
    handle: MpvHandle,
    socket_name: String,
    process: Mutex<Option<tokio::process::Child>>,
    observed: Arc<SyncMutex<Observed>>,
    sink: Arc<OnceLock<MediaSink>>,
    cancel: CancellationToken,
}

impl MpvResource {
    /// Start an idle mpv at `volume` (0.0..=1.0) and connect to it.
    pub async fn spawn(volume: f32) -> anyhow::Result<Self> {
        let socket_name = wave_proto::platform::mpv_socket_name();
        let (child, handle, event_rx) = spawn_and_connect(&socket_name, volume).await?;
        handle.observe_all_properties().await;

        let observed = Arc::new(SyncMutex::new(Observed::default()));
        let sink = Arc::new(OnceLock::new());
        let cancel = CancellationToken::new();
        tokio::spawn(translator_task(
            event_rx,
            Arc::clone(&observed),
            Arc::clone(&sink),
            cancel.clone(),
        ));

        Ok(Self {
            handle,
            socket_name,
            process: Mutex::new(Some(child)),
            observed,
            sink,
            cancel,
        })
    }

    /// Kill the process and remove the socket.
    pub async fn kill(&self) {
        self.cancel.cancel();
        if let Some(mut p) = self.process.lock().await.take() {
            let _ = p.kill().await;
        }
        #[cfg(unix)]
        {
            let _ = tokio::fs::remove_file(&self.socket_name).await;
        }
        info!("mpv: stopped");
    }
}

#[async_trait::async_trait]
impl PlaybackResource for MpvResource {
    fn attach(&self, sink: MediaSink) {
        if self.sink.set(sink).is_err() {
            warn!("mpv: resource attached twice; keeping the first player");
        }
    }

    fn set_source(&self, url: &str) {
        {
            let mut observed = self.observed.lock();
            observed.reset();
            observed.paused = true;
        }
        // Load paused; playback starts only on an explicit play.
        self.handle.fire(json!(["set_property", "pause", true]));
        self.handle.fire(json!(["loadfile", url]));
    }

    async fn play(&self) -> anyhow::Result<()> {
        self.handle
            .send(json!(["set_property", "pause", false]))
            .await?;
        Ok(())
    }

    fn pause(&self) {
        self.handle.fire(json!(["set_property", "pause", true]));
    }

    fn seek(&self, time: f64) {
        self.observed.lock().seeking = Some(time);
        self.handle.fire(json!(["seek", time, "absolute"]));
    }

    fn set_rate(&self, rate: f64) {
        self.handle.fire(json!(["set_property", "speed", rate]));
    }

    fn can_play(&self) -> bool {
        self.observed.lock().can_play
    }

    fn release(&self) {
        self.handle.fire(json!(["set_property", "pause", true]));
        self.handle.fire(json!(["stop"]));
    }
}

// ── spawn / connect ───────────────────────────────────────────────────────────

fn volume_arg(volume: f32) -> String {
    format!(
        "--volume={}",
        (volume * 100.0).clamp(0.0, 100.0).round() as i64
    )
}

#[cfg(unix)]
async fn spawn_and_connect(
    socket_name: &str,
    volume: f32,
) -> anyhow::Result<(tokio::process::Child, MpvHandle, mpsc::Receiver<MpvEvent>)> {
    let socket_path = std::path::PathBuf::from(socket_name);
    let _ = tokio::fs::remove_file(&socket_path).await;

    info!("mpv: spawning new process");
    let mpv_binary = wave_proto::platform::find_mpv_binary()
        .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

    let data_dir = wave_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let stderr_path = data_dir.join("mpv-stderr.log");
    let stderr_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&stderr_path)?;
    info!("mpv: logging stderr to {:?}", stderr_path);

    let child = tokio::process::Command::new(&mpv_binary)
        .arg("--no-video")
        .arg("--idle=yes")
        .arg(wave_proto::platform::mpv_socket_arg(socket_name))
        .arg("--quiet")
        .arg(volume_arg(volume))
        .stdout(std::process::Stdio::null())
        .stderr(stderr_file)
        .kill_on_drop(true)
        .spawn()?;
    info!("mpv: spawned process with pid {:?}", child.id());

    for _ in 0..50 {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        if socket_path.exists() {
            break;
        }
    }
    if !socket_path.exists() {
        anyhow::bail!("mpv IPC socket did not appear");
    }

    let stream = UnixStream::connect(&socket_path).await?;
    info!("mpv: connected to IPC socket");
    let (read_half, write_half) = stream.into_split();
    let (handle, event_rx) = start_io_tasks(BufReader::new(read_half), write_half);
    Ok((child, handle, event_rx))
}

#[cfg(windows)]
async fn spawn_and_connect(
    socket_name: &str,
    volume: f32,
) -> anyhow::Result<(tokio::process::Child, MpvHandle, mpsc::Receiver<MpvEvent>)> {
    info!("mpv: spawning new process");
    let mpv_binary = wave_proto::platform::find_mpv_binary()
        .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

    let child = tokio::process::Command::new(mpv_binary)
        .arg("--no-video")
        .arg("--idle=yes")
        .arg(wave_proto::platform::mpv_socket_arg(socket_name))
        .arg("--quiet")
        .arg(volume_arg(volume))
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    let pipe_path = format!(r"\\.\pipe\{}", socket_name);
    for _ in 0..50 {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        if let Ok(client) = ClientOptions::new().open(&pipe_path) {
            info!("mpv: connected to named pipe");
            let (read_half, write_half) = tokio::io::split(client);
            let (handle, event_rx) = start_io_tasks(BufReader::new(read_half), write_half);
            return Ok((child, handle, event_rx));
        }
    }
    anyhow::bail!("mpv named pipe did not appear")
}

fn start_io_tasks<R, W>(reader: BufReader<R>, writer: W) -> (MpvHandle, mpsc::Receiver<MpvEvent>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    // req_id → reply channel.  Writer inserts, reader resolves.
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<PendingRequest>();
    let (event_tx, event_rx) = mpsc::channel::<MpvEvent>(256);

    tokio::spawn(writer_task(writer, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(reader, pending, event_tx));

    (MpvHandle { tx: cmd_tx }, event_rx)
}

// ── reader task ───────────────────────────────────────────────────────────────

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
                fail_pending(&pending, "mpv IPC connection closed").await;
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

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"].as_str().unwrap_or("unknown error").to_string();
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else if event_tx.send(MpvEvent { raw: val }).await.is_err() {
                    debug!("mpv reader: translator gone");
                    break;
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_pending(&pending, "mpv IPC read error").await;
                break;
            }
        }
    }
}

async fn fail_pending(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<PendingRequest>,
    pending: PendingMap,
) where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register before writing so the reader can match the reply.
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
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

#[cfg(test)]
mod tests {
    use super::*;

    fn prop(id: u64, data: Value) -> MpvEvent {
        MpvEvent {
            raw: json!({ "event": "property-change", "id": id, "data": data }),
        }
    }

    fn event(name: &str) -> MpvEvent {
        MpvEvent {
            raw: json!({ "event": name }),
        }
    }

    #[test]
    fn test_duration_and_time() {
        let mut obs = Observed::default();
        assert_eq!(
            translate(&mut obs, &prop(OBS_DURATION, json!(12.3))),
            vec![MediaEvent::MetadataLoaded { duration: 12.3 }]
        );
        assert_eq!(
            translate(&mut obs, &prop(OBS_TIME_POS, json!(4.5))),
            vec![MediaEvent::TimeUpdate { current_time: 4.5 }]
        );
        // Unloaded properties arrive as null.
        assert!(translate(&mut obs, &prop(OBS_DURATION, Value::Null)).is_empty());
    }

    #[test]
    fn test_duration_refinement_keeps_playback() {
        let mut obs = Observed::default();
        let mut seen = Vec::new();
        for evt in [
            prop(OBS_DURATION, json!(180.0)),
            event("file-loaded"),
            prop(OBS_PAUSE, json!(false)),
            prop(OBS_DURATION, json!(181.5)),
        ] {
            seen.extend(translate(&mut obs, &evt));
        }
        assert_eq!(
            seen,
            vec![
                MediaEvent::MetadataLoaded { duration: 180.0 },
                MediaEvent::CanPlay,
                MediaEvent::Playing,
            ]
        );

        // The next file reports its own metadata.
        let stop = MpvEvent {
            raw: json!({ "event": "end-file", "reason": "stop" }),
        };
        translate(&mut obs, &stop);
        assert_eq!(
            translate(&mut obs, &prop(OBS_DURATION, json!(42.0))),
            vec![MediaEvent::MetadataLoaded { duration: 42.0 }]
        );
    }

    #[test]
    fn test_pause_only_reported_for_loaded_file() {
        let mut obs = Observed {
            paused: true,
            ..Observed::default()
        };
        assert!(translate(&mut obs, &prop(OBS_PAUSE, json!(false))).is_empty());
        obs.paused = true;

        assert_eq!(
            translate(&mut obs, &event("file-loaded")),
            vec![MediaEvent::CanPlay]
        );
        assert!(obs.can_play);
        assert_eq!(
            translate(&mut obs, &prop(OBS_PAUSE, json!(false))),
            vec![MediaEvent::Playing]
        );
        assert!(translate(&mut obs, &prop(OBS_PAUSE, json!(false))).is_empty());
        assert_eq!(
            translate(&mut obs, &prop(OBS_PAUSE, json!(true))),
            vec![MediaEvent::Paused]
        );
    }

    #[test]
    fn test_buffering() {
        let mut obs = Observed::default();
        assert_eq!(
            translate(&mut obs, &prop(OBS_PAUSED_FOR_CACHE, json!(true))),
            vec![MediaEvent::Waiting]
        );
        assert_eq!(
            translate(&mut obs, &prop(OBS_PAUSED_FOR_CACHE, json!(false))),
            vec![MediaEvent::CanPlay]
        );
    }

    #[test]
    fn test_seek_completes_on_restart() {
        let mut obs = Observed::default();
        assert!(translate(&mut obs, &event("playback-restart")).is_empty());
        obs.seeking = Some(30.0);
        assert_eq!(
            translate(&mut obs, &event("playback-restart")),
            vec![MediaEvent::Seeked { time: 30.0 }]
        );
        assert!(obs.seeking.is_none());
    }

    #[test]
    fn test_end_file_reasons() {
        let mut obs = Observed {
            loaded: true,
            ..Observed::default()
        };
        let eof = MpvEvent {
            raw: json!({ "event": "end-file", "reason": "eof" }),
        };
        assert_eq!(translate(&mut obs, &eof), vec![MediaEvent::Ended]);
        assert!(!obs.loaded);

        let err = MpvEvent {
            raw: json!({ "event": "end-file", "reason": "error", "file_error": "unrecognized file format" }),
        };
        assert_eq!(
            translate(&mut obs, &err),
            vec![MediaEvent::Error {
                message: "unrecognized file format".to_string()
            }]
        );
    }

    #[test]
    fn test_volume_arg_is_clamped_percent() {
        assert_eq!(volume_arg(0.5), "--volume=50");
        assert_eq!(volume_arg(3.0), "--volume=100");
        assert_eq!(volume_arg(-1.0), "--volume=0");
    }

    #[tokio::test]
    async fn test_io_tasks_route_replies_and_events() {
        let (client, server) = tokio::io::duplex(4096);
        let (read_half, write_half) = tokio::io::split(client);
        let (handle, mut events) = start_io_tasks(BufReader::new(read_half), write_half);

        let (server_read, mut server_write) = tokio::io::split(server);
        let mut server_lines = BufReader::new(server_read).lines();

        let reply = tokio::spawn({
            let handle = handle.clone();
            async move { handle.send(json!(["get_property", "volume"])).await }
        });

        let line = server_lines.next_line().await.unwrap().unwrap();
        let req: Value = serde_json::from_str(&line).unwrap();
        let req_id = req["request_id"].as_u64().unwrap();
        let response = json!({ "request_id": req_id, "error": "success", "data": 50.0 });
        server_write
            .write_all(format!("{}\n{}\n", response, json!({ "event": "file-loaded" })).as_bytes())
            .await
            .unwrap();

        let value = reply.await.unwrap().unwrap();
        assert_eq!(value["data"], 50.0);
        let evt = events.recv().await.unwrap();
        assert_eq!(evt.event_name(), Some("file-loaded"));
    }
}
