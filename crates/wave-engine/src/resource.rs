//! Host playback capability.
//!
//! The engine never produces sound itself.  A [`PlaybackResource`] (an mpv
//! process, a browser media element, a test double) performs transport
//! requests and reports what actually happened through a [`MediaSink`].  The
//! player's state only moves on those reports, never on the request.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::player::CoreEvent;

/// Lifecycle notifications raised by a playback resource.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// Duration is known.  Non-finite durations (live streams) count as zero.
    MetadataLoaded { duration: f64 },
    TimeUpdate { current_time: f64 },
    Playing,
    Paused,
    Ended,
    Error { message: String },
    /// Playback stalled waiting for data.
    Waiting,
    /// Enough data is buffered to play.
    CanPlay,
    /// A seek finished at `time`.
    Seeked { time: f64 },
}

/// Channel end a resource uses to report [`MediaEvent`]s to its player.
/// Events are applied in the order they are emitted.
#[derive(Debug, Clone)]
pub struct MediaSink {
    tx: mpsc::UnboundedSender<CoreEvent>,
}

impl MediaSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<CoreEvent>) -> Self {
        Self { tx }
    }

    /// Returns `false` once the player has shut down.
    pub fn emit(&self, event: MediaEvent) -> bool {
        self.tx.send(CoreEvent::Media(event)).is_ok()
    }
}

#[async_trait]
pub trait PlaybackResource: Send + Sync {
    /// Called once, before any other method, with the sink for this player.
    fn attach(&self, sink: MediaSink);

    /// Point the resource at a new source and start buffering it.
    fn set_source(&self, url: &str);

    /// Start playback.  Completes when the resource accepted the request.
    async fn play(&self) -> anyhow::Result<()>;

    fn pause(&self);

    fn seek(&self, time: f64);

    fn set_rate(&self, rate: f64);

    /// True when enough data is buffered to start playing immediately.
    fn can_play(&self) -> bool;

    /// Stop and detach the source.  The resource is not used afterwards.
    fn release(&self);
}
