//! WavePlayer — handle to a single-owner player task.
//!
//! All mutable state of one player lives in `PlayerCore`, which consumes one
//! ordered channel of [`CoreEvent`]s: transport requests from the handle,
//! media events from the playback resource, and load completions.  Readers
//! get a consistent [`PlayerSnapshot`] through a `watch` channel and discrete
//! [`LifecycleEvent`]s through a `broadcast` channel.
//!
//! Loads are tagged with a generation number.  A completion whose generation
//! is no longer current is dropped, so a slow analysis can never overwrite
//! the waveform of a newer source.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wave_proto::config::Config;
use wave_proto::protocol::{Command, LifecycleEvent, PlayerSnapshot, PlayerState};

use crate::coordinator::{PlaybackCoordinator, PlayerId, Subscription};
use crate::error::PlayerError;
use crate::loader::{AudioDecoder, AudioFetcher, LoadReport, SourceLoader, DEFAULT_ANALYSIS_TIMEOUT};
use crate::resource::{MediaEvent, MediaSink, PlaybackResource};
use crate::state_machine::{PlaybackMachine, Trigger};
use crate::waveform;

pub const DEFAULT_BAR_COUNT: usize = 32;

const LIFECYCLE_CAPACITY: usize = 256;

// ── Options ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerOptions {
    /// Initial source.  `None` or empty leaves the player in `loading` until
    /// [`WavePlayer::set_source`] is called.
    pub src: Option<String>,
    pub bar_count: usize,
    /// Start playing the first time the player is idle and the resource has
    /// enough data.  Fires at most once per player.
    pub autoplay: bool,
    pub analysis_timeout: Duration,
    pub fallback_seed: Option<u64>,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            src: None,
            bar_count: DEFAULT_BAR_COUNT,
            autoplay: false,
            analysis_timeout: DEFAULT_ANALYSIS_TIMEOUT,
            fallback_seed: None,
        }
    }
}

impl PlayerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            src: None,
            bar_count: config.player.bar_count,
            autoplay: config.player.autoplay,
            analysis_timeout: Duration::from_secs(config.analysis.timeout_secs),
            fallback_seed: config.analysis.fallback_seed,
        }
    }

    pub fn with_src(mut self, src: impl Into<String>) -> Self {
        self.src = Some(src.into());
        self
    }

    fn validate(&self) -> Result<(), PlayerError> {
        if self.bar_count == 0 {
            return Err(PlayerError::InvalidBarCount);
        }
        if self.analysis_timeout.is_zero() {
            return Err(PlayerError::InvalidTimeout);
        }
        Ok(())
    }
}

/// Host capabilities a player is built on.
#[derive(Clone)]
pub struct Capabilities {
    pub resource: Arc<dyn PlaybackResource>,
    pub fetcher: Arc<dyn AudioFetcher>,
    pub decoder: Arc<dyn AudioDecoder>,
}

// ── Core events ───────────────────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) enum Request {
    Play,
    Pause,
    Stop,
    Toggle,
    Seek(f64),
    SeekBy(f64),
    SeekProgress(f64),
    Rate(f64),
    Source(String),
    Waveform(Vec<f32>),
}

/// All inputs into the PlayerCore loop.
#[derive(Debug)]
pub(crate) enum CoreEvent {
    /// Reported by the playback resource through its [`MediaSink`].
    Media(MediaEvent),
    Request(Request),
    LoadSettled { generation: u64, report: LoadReport },
    Shutdown,
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Cheap-to-query handle.  Transport methods enqueue a request and return
/// immediately; observe the outcome through [`WavePlayer::watch`] or
/// [`WavePlayer::subscribe`].
pub struct WavePlayer {
    id: PlayerId,
    tx: mpsc::UnboundedSender<CoreEvent>,
    state_rx: watch::Receiver<PlayerSnapshot>,
    events_tx: broadcast::Sender<LifecycleEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WavePlayer {
    /// Validate `options`, attach to the resource, join `coordinator`'s
    /// exclusive-playback scope and start the core task.  Must be called
    /// from within a tokio runtime.
    pub fn spawn(
        options: PlayerOptions,
        caps: Capabilities,
        coordinator: Arc<PlaybackCoordinator>,
    ) -> Result<Self, PlayerError> {
        options.validate()?;

        let id = coordinator.allocate_id();
        let (tx, rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(LIFECYCLE_CAPACITY);

        let resource = Arc::clone(&caps.resource);
        resource.attach(MediaSink::new(tx.clone()));

        let pausable = Arc::clone(&resource);
        let subscription = coordinator.subscribe(id, move |announced| {
            if announced != id {
                debug!("player {}: pausing for player {}", id, announced);
                pausable.pause();
            }
        });

        let loader = Arc::new(SourceLoader::new(
            caps.fetcher,
            caps.decoder,
            options.bar_count,
            options.analysis_timeout,
            options.fallback_seed,
        ));

        let machine = PlaybackMachine::new();
        let initial = PlayerSnapshot {
            id,
            state: machine.state(),
            current_time: machine.current_time(),
            duration: machine.duration(),
            playback_rate: machine.playback_rate(),
            waveform: waveform::placeholder(options.bar_count),
            error: None,
            src: None,
        };
        let (state_tx, state_rx) = watch::channel(initial);

        if let Some(src) = options.src.as_deref().filter(|s| !s.is_empty()) {
            // Queued ahead of the task so subscribers attached right after
            // spawn still see the first `loading`.
            let _ = tx.send(CoreEvent::Request(Request::Source(src.to_string())));
        }

        let core = PlayerCore {
            id,
            machine,
            waveform: waveform::placeholder(options.bar_count),
            src: None,
            bar_count: options.bar_count,
            autoplay_pending: options.autoplay,
            generation: 0,
            load_pending: false,
            load_task: None,
            resource,
            loader,
            coordinator,
            subscription: Some(subscription),
            tx: tx.clone(),
            state_tx,
            events_tx: events_tx.clone(),
        };
        let task = tokio::spawn(core.run(rx));
        info!("player {}: spawned ({} bars)", id, options.bar_count);

        Ok(Self {
            id,
            tx,
            state_rx,
            events_tx,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    // ── Reactive fields ──

    pub fn snapshot(&self) -> PlayerSnapshot {
        self.state_rx.borrow().clone()
    }

    pub fn state(&self) -> PlayerState {
        self.state_rx.borrow().state
    }

    pub fn current_time(&self) -> f64 {
        self.state_rx.borrow().current_time
    }

    pub fn duration(&self) -> f64 {
        self.state_rx.borrow().duration
    }

    pub fn playback_rate(&self) -> f64 {
        self.state_rx.borrow().playback_rate
    }

    pub fn waveform(&self) -> Vec<f32> {
        self.state_rx.borrow().waveform.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.state_rx.borrow().error.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.state_rx.borrow().is_playing()
    }

    pub fn is_loading(&self) -> bool {
        self.state_rx.borrow().is_loading()
    }

    pub fn progress(&self) -> f64 {
        self.state_rx.borrow().progress()
    }

    pub fn watch(&self) -> watch::Receiver<PlayerSnapshot> {
        self.state_rx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events_tx.subscribe()
    }

    // ── Transport ──

    /// Claim exclusive playback and ask the resource to play.  Resource
    /// failures are logged, not returned.
    pub fn play(&self) {
        self.request(Request::Play);
    }

    pub fn pause(&self) {
        self.request(Request::Pause);
    }

    /// Pause and rewind to the start; the player rests in `idle`.
    pub fn stop(&self) {
        self.request(Request::Stop);
    }

    pub fn toggle(&self) {
        self.request(Request::Toggle);
    }

    /// Seek to `time` seconds, clamped to `[0, duration]`.
    pub fn seek(&self, time: f64) {
        self.request(Request::Seek(time));
    }

    /// Seek relative to the current position.
    pub fn seek_by(&self, delta: f64) {
        self.request(Request::SeekBy(delta));
    }

    pub fn seek_by_progress(&self, fraction: f64) {
        self.request(Request::SeekProgress(fraction));
    }

    pub fn set_rate(&self, rate: f64) -> Result<(), PlayerError> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(PlayerError::InvalidRate(rate));
        }
        self.request(Request::Rate(rate));
        Ok(())
    }

    /// Restart the load cycle with a new source.  Empty URLs are ignored.
    pub fn set_source(&self, url: impl Into<String>) {
        self.request(Request::Source(url.into()));
    }

    /// Show a precomputed waveform, resampled to the player's bar count.
    /// Supersedes any analysis still in flight.
    pub fn set_waveform(&self, data: Vec<f32>) {
        self.request(Request::Waveform(data));
    }

    /// Apply a wire-level [`Command`].
    pub fn dispatch(&self, cmd: Command) -> Result<(), PlayerError> {
        match cmd {
            Command::Play => self.play(),
            Command::Pause => self.pause(),
            Command::Stop => self.stop(),
            Command::Toggle => self.toggle(),
            Command::Seek { seconds } => self.seek(seconds),
            Command::SeekRelative { seconds } => self.seek_by(seconds),
            Command::SeekProgress { fraction } => self.seek_by_progress(fraction),
            Command::Rate { value } => self.set_rate(value)?,
            Command::Source { src } => self.set_source(src),
        }
        Ok(())
    }

    /// Tear down: release the resource, close the decoder and leave the
    /// coordinator.  Completes once the core task has exited; later calls
    /// return immediately.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(CoreEvent::Shutdown);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    fn request(&self, request: Request) {
        if self.tx.send(CoreEvent::Request(request)).is_err() {
            debug!("player {}: request after shutdown ignored", self.id);
        }
    }
}

impl Drop for WavePlayer {
    fn drop(&mut self) {
        if self.task.get_mut().is_some() {
            let _ = self.tx.send(CoreEvent::Shutdown);
        }
    }
}

// ── PlayerCore ────────────────────────────────────────────────────────────────

struct PlayerCore {
    id: PlayerId,
    machine: PlaybackMachine,
    waveform: Vec<f32>,
    src: Option<String>,
    bar_count: usize,
    autoplay_pending: bool,
    /// Generation of the most recent load; completions tagged otherwise are stale.
    generation: u64,
    /// True between a load starting and its current-generation settle.
    load_pending: bool,
    load_task: Option<JoinHandle<()>>,
    resource: Arc<dyn PlaybackResource>,
    loader: Arc<SourceLoader>,
    coordinator: Arc<PlaybackCoordinator>,
    subscription: Option<Subscription>,
    /// Load forwarders send their completions back through this.
    tx: mpsc::UnboundedSender<CoreEvent>,
    state_tx: watch::Sender<PlayerSnapshot>,
    events_tx: broadcast::Sender<LifecycleEvent>,
}

impl PlayerCore {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<CoreEvent>) {
        debug!("player {}: core started", self.id);

        loop {
            match rx.recv().await {
                None => {
                    info!("player {}: event channel closed", self.id);
                    break;
                }
                Some(CoreEvent::Shutdown) => {
                    info!("player {}: shutdown requested", self.id);
                    break;
                }
                Some(CoreEvent::Media(event)) => self.handle_media(event),
                Some(CoreEvent::Request(request)) => self.handle_request(request).await,
                Some(CoreEvent::LoadSettled { generation, report }) => {
                    self.handle_load_settled(generation, report)
                }
            }
            self.maybe_autoplay().await;
            self.publish();
        }

        self.teardown();
    }

    // ── Media events ──

    fn handle_media(&mut self, event: MediaEvent) {
        debug!("player {}: media {:?}", self.id, event);
        match event {
            MediaEvent::MetadataLoaded { duration } => {
                self.machine.apply(&Trigger::MetadataResolved { duration });
                self.emit(LifecycleEvent::DurationChange {
                    duration: self.machine.duration(),
                });
            }
            MediaEvent::TimeUpdate { current_time } => {
                self.machine.apply(&Trigger::TimeAdvanced { current_time });
                self.emit(LifecycleEvent::TimeUpdate {
                    current_time: self.machine.current_time(),
                });
            }
            MediaEvent::Playing => {
                self.machine.apply(&Trigger::PlaybackStarted);
                self.emit(LifecycleEvent::Play);
            }
            MediaEvent::Paused => {
                if self.machine.apply(&Trigger::PlaybackPaused) == Some(PlayerState::Paused) {
                    self.emit(LifecycleEvent::Pause);
                }
            }
            MediaEvent::Ended => {
                self.machine.apply(&Trigger::PlaybackEnded);
                self.emit(LifecycleEvent::Ended);
            }
            MediaEvent::Error { message } => {
                warn!("player {}: resource error: {}", self.id, message);
                self.machine.apply(&Trigger::ResourceError {
                    message: message.clone(),
                });
                self.emit(LifecycleEvent::Error { message });
            }
            MediaEvent::Waiting => {
                self.machine.apply(&Trigger::BufferingStall);
            }
            MediaEvent::CanPlay => {
                self.machine.apply(&Trigger::CanResume);
            }
            MediaEvent::Seeked { time } => {
                self.machine.apply(&Trigger::TimeAdvanced { current_time: time });
                self.emit(LifecycleEvent::Seeked {
                    time: self.machine.current_time(),
                });
            }
        }
    }

    // ── Requests ──

    async fn handle_request(&mut self, request: Request) {
        debug!("player {}: request {:?}", self.id, request);
        match request {
            Request::Play => self.play().await,
            Request::Pause => self.resource.pause(),
            Request::Toggle => {
                if self.machine.state() == PlayerState::Playing {
                    self.resource.pause();
                } else {
                    self.play().await;
                }
            }
            Request::Stop => {
                self.resource.pause();
                self.resource.seek(0.0);
                self.machine.apply(&Trigger::Stopped);
            }
            Request::Seek(time) => self.seek(time),
            Request::SeekBy(delta) => self.seek(self.machine.current_time() + delta),
            Request::SeekProgress(fraction) => self.seek(fraction * self.machine.duration()),
            Request::Rate(rate) => {
                self.machine.set_rate(rate);
                self.resource.set_rate(rate);
                self.emit(LifecycleEvent::RateChange { rate });
            }
            Request::Source(url) => {
                if url.is_empty() {
                    debug!("player {}: empty source ignored", self.id);
                } else {
                    self.start_load(url);
                }
            }
            Request::Waveform(data) => self.apply_waveform(data),
        }
    }

    async fn play(&mut self) {
        self.coordinator.announce_play(self.id);
        if let Err(e) = self.resource.play().await {
            warn!("player {}: play failed: {}", self.id, e);
        }
    }

    fn seek(&mut self, time: f64) {
        let time = self.machine.clamp_time(time);
        self.emit(LifecycleEvent::Seeking { time });
        self.machine.seek(time);
        self.resource.seek(time);
    }

    // ── Loading ──

    fn start_load(&mut self, url: String) {
        self.generation += 1;
        let generation = self.generation;
        info!("player {}: loading {} (generation {})", self.id, url, generation);

        self.machine.apply(&Trigger::LoadStarted);
        self.waveform = waveform::placeholder(self.bar_count);
        self.src = Some(url.clone());
        self.load_pending = true;
        self.emit(LifecycleEvent::Loading);

        self.resource.set_source(&url);

        // Superseded forwarders are left to finish; their generation is stale.
        let loader = Arc::clone(&self.loader);
        let tx = self.tx.clone();
        self.load_task = Some(tokio::spawn(async move {
            let report = loader.run(&url).await;
            let _ = tx.send(CoreEvent::LoadSettled { generation, report });
        }));
    }

    fn handle_load_settled(&mut self, generation: u64, report: LoadReport) {
        if generation != self.generation {
            debug!(
                "player {}: discarding stale load (generation {}, current {})",
                self.id, generation, self.generation
            );
            return;
        }
        if report.failure.is_some() {
            debug!("player {}: settled with fallback waveform", self.id);
        }
        self.load_task = None;
        self.settle(report.waveform);
    }

    fn apply_waveform(&mut self, data: Vec<f32>) {
        let waveform = waveform::interpolate(&data, self.bar_count);
        if self.load_pending {
            // Invalidate the in-flight analysis.
            self.generation += 1;
            self.settle(waveform);
        } else {
            self.waveform = waveform;
        }
    }

    fn settle(&mut self, waveform: Vec<f32>) {
        self.waveform = waveform;
        self.load_pending = false;
        self.machine.apply(&Trigger::LoadSettled);
        // Readers reacting to `loaded` see the settled snapshot.
        self.publish();
        self.emit(LifecycleEvent::Loaded);
    }

    async fn maybe_autoplay(&mut self) {
        if self.autoplay_pending
            && self.machine.state() == PlayerState::Idle
            && self.resource.can_play()
        {
            self.autoplay_pending = false;
            info!("player {}: autoplay", self.id);
            self.play().await;
        }
    }

    // ── Output ──

    fn emit(&self, event: LifecycleEvent) {
        // No receivers is fine.
        let _ = self.events_tx.send(event);
    }

    fn publish(&self) {
        let snapshot = PlayerSnapshot {
            id: self.id,
            state: self.machine.state(),
            current_time: self.machine.current_time(),
            duration: self.machine.duration(),
            playback_rate: self.machine.playback_rate(),
            waveform: self.waveform.clone(),
            error: self.machine.error().map(str::to_string),
            src: self.src.clone(),
        };
        self.state_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    fn teardown(&mut self) {
        self.subscription.take();
        if let Some(task) = self.load_task.take() {
            task.abort();
        }
        self.resource.release();
        self.loader.close();
        info!("player {}: torn down", self.id);
    }
}
