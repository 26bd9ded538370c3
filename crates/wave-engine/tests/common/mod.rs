#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use wave_engine::{
    AudioDecoder, AudioFetcher, Capabilities, LoadError, MediaEvent, MediaSink, PlaybackResource,
    WavePlayer,
};
use wave_proto::protocol::{LifecycleEvent, PlayerSnapshot};

// ── Playback resource ─────────────────────────────────────────────────────────

#[derive(Default)]
struct ResourceState {
    playing: bool,
    can_play: bool,
    calls: Vec<String>,
}

/// Behaves like a well-mannered media element: reports `Playing`/`Paused`
/// only on an actual change, and `Seeked` for every seek.  With a
/// `duration`, a new source resolves its metadata immediately.
#[derive(Default)]
pub struct ScriptedResource {
    sink: Mutex<Option<MediaSink>>,
    duration: Option<f64>,
    fail_play: bool,
    state: Mutex<ResourceState>,
}

impl ScriptedResource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_duration(duration: f64) -> Arc<Self> {
        Arc::new(Self {
            duration: Some(duration),
            ..Self::default()
        })
    }

    pub fn failing_play() -> Arc<Self> {
        Arc::new(Self {
            fail_play: true,
            ..Self::default()
        })
    }

    pub fn emit(&self, event: MediaEvent) {
        if let Some(sink) = self.sink.lock().as_ref() {
            sink.emit(event);
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == call).count()
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    fn record(&self, call: impl Into<String>) {
        self.state.lock().calls.push(call.into());
    }
}

#[async_trait]
impl PlaybackResource for ScriptedResource {
    fn attach(&self, sink: MediaSink) {
        *self.sink.lock() = Some(sink);
    }

    fn set_source(&self, url: &str) {
        self.record(format!("set_source:{}", url));
        self.state.lock().playing = false;
        if let Some(duration) = self.duration {
            self.state.lock().can_play = true;
            self.emit(MediaEvent::MetadataLoaded { duration });
        }
    }

    async fn play(&self) -> anyhow::Result<()> {
        self.record("play");
        if self.fail_play {
            anyhow::bail!("not allowed to play");
        }
        let started = {
            let mut state = self.state.lock();
            !std::mem::replace(&mut state.playing, true)
        };
        if started {
            self.emit(MediaEvent::Playing);
        }
        Ok(())
    }

    fn pause(&self) {
        self.record("pause");
        let stopped = std::mem::replace(&mut self.state.lock().playing, false);
        if stopped {
            self.emit(MediaEvent::Paused);
        }
    }

    fn seek(&self, time: f64) {
        self.record(format!("seek:{}", time));
        self.emit(MediaEvent::Seeked { time });
    }

    fn set_rate(&self, rate: f64) {
        self.record(format!("rate:{}", rate));
    }

    fn can_play(&self) -> bool {
        self.state.lock().can_play
    }

    fn release(&self) {
        self.record("release");
        self.state.lock().playing = false;
    }
}

// ── Fetch / decode ────────────────────────────────────────────────────────────

/// Serves fixed bytes per URL; unknown URLs are a 404.  A gated URL blocks
/// until [`MapFetcher::open`] is called for it.
#[derive(Default)]
pub struct MapFetcher {
    sources: HashMap<String, Vec<u8>>,
    gates: HashMap<String, Arc<Notify>>,
}

impl MapFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.sources.insert(url.to_string(), bytes);
        self
    }

    pub fn gated(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.gates.insert(url.to_string(), Arc::new(Notify::new()));
        self.with(url, bytes)
    }

    pub fn open(&self, url: &str) {
        if let Some(gate) = self.gates.get(url) {
            gate.notify_one();
        }
    }
}

#[async_trait]
impl AudioFetcher for MapFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        if let Some(gate) = self.gates.get(url) {
            gate.notified().await;
        }
        self.sources
            .get(url)
            .cloned()
            .ok_or_else(|| LoadError::FetchStatus {
                url: url.to_string(),
                status: 404,
            })
    }
}

/// Treats each byte as one sample of amplitude `byte / 255`.
#[derive(Default)]
pub struct ByteDecoder {
    pub closed: AtomicBool,
}

#[async_trait]
impl AudioDecoder for ByteDecoder {
    async fn decode(&self, bytes: Vec<u8>) -> Result<Vec<f32>, LoadError> {
        Ok(bytes.iter().map(|b| *b as f32 / 255.0).collect())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Never finishes decoding.
#[derive(Default)]
pub struct PendingDecoder {
    pub closed: AtomicBool,
}

#[async_trait]
impl AudioDecoder for PendingDecoder {
    async fn decode(&self, _bytes: Vec<u8>) -> Result<Vec<f32>, LoadError> {
        std::future::pending().await
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub fn caps(
    resource: &Arc<ScriptedResource>,
    fetcher: impl AudioFetcher + 'static,
    decoder: Arc<dyn AudioDecoder>,
) -> Capabilities {
    Capabilities {
        resource: resource.clone(),
        fetcher: Arc::new(fetcher),
        decoder,
    }
}

// ── Waiting ───────────────────────────────────────────────────────────────────

/// Long enough for the paused-clock tests to reach the 10 s analysis timeout
/// before giving up.
pub const WAIT_LIMIT: Duration = Duration::from_secs(30);

pub async fn wait_for<F>(player: &WavePlayer, what: &str, mut predicate: F) -> PlayerSnapshot
where
    F: FnMut(&PlayerSnapshot) -> bool,
{
    let mut rx = player.watch();
    let found = match tokio::time::timeout(WAIT_LIMIT, rx.wait_for(|s| predicate(s))).await {
        Ok(Ok(snapshot)) => Some((*snapshot).clone()),
        _ => None,
    };
    match found {
        Some(snapshot) => snapshot,
        None => panic!("timed out waiting for {}: {:?}", what, player.snapshot()),
    }
}

/// Everything buffered on `rx` right now.
pub fn drain(rx: &mut broadcast::Receiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Let spawned tasks run for a moment of real time.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
