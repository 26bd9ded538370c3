use serde::{Deserialize, Serialize};

/// Transport state of a single player.  Exactly one holds at any instant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    /// Source is being loaded or the resource is re-buffering from rest.
    #[default]
    Loading,
    /// Ready, not playing.
    Idle,
    Playing,
    Paused,
    /// The playback resource reported a failure.
    Error,
}

impl std::fmt::Display for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PlayerState::Loading => "loading",
            PlayerState::Idle => "idle",
            PlayerState::Playing => "playing",
            PlayerState::Paused => "paused",
            PlayerState::Error => "error",
        };
        f.write_str(label)
    }
}

/// Full observable state of one player.  Published on every change through a
/// `tokio::sync::watch` channel so readers always see a consistent copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlayerSnapshot {
    pub id: u64,
    pub state: PlayerState,
    /// Seconds.  Never negative; never above `duration` once it is known.
    pub current_time: f64,
    /// Seconds, `0.0` until metadata resolves.
    pub duration: f64,
    pub playback_rate: f64,
    /// Always exactly `bar_count` values long.
    pub waveform: Vec<f32>,
    /// Populated only while `state == Error`.
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub src: Option<String>,
}

impl PlayerSnapshot {
    pub fn is_playing(&self) -> bool {
        self.state == PlayerState::Playing
    }

    pub fn is_loading(&self) -> bool {
        self.state == PlayerState::Loading
    }

    /// Playback position as a fraction of the duration, `0.0` while the
    /// duration is unknown.
    pub fn progress(&self) -> f64 {
        if self.duration <= 0.0 {
            return 0.0;
        }
        self.current_time / self.duration
    }
}

/// Discrete notifications for consumers that observe events rather than
/// polling the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum LifecycleEvent {
    Play,
    Pause,
    Ended,
    TimeUpdate { current_time: f64 },
    DurationChange { duration: f64 },
    Seeking { time: f64 },
    Seeked { time: f64 },
    RateChange { rate: f64 },
    Error { message: String },
    Loading,
    Loaded,
}

/// Transport commands accepted by the control surfaces (terminal, HTTP).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    Play,
    Pause,
    Stop,
    Toggle,
    Seek { seconds: f64 },
    SeekRelative { seconds: f64 },
    SeekProgress { fraction: f64 },
    Rate { value: f64 },
    Source { src: String },
}
