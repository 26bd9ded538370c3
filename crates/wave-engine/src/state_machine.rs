//! Transport state machine.
//!
//! ```text
//!   loading ──metadata / can-resume / load-settled──▶ idle
//!   idle    ──stall──▶ loading
//!   any     ──started──▶ playing ──paused──▶ paused
//!   any     ──ended / stop──▶ idle
//!   any     ──resource error──▶ error
//!   any     ──load started──▶ loading
//! ```
//!
//! Every transition goes through [`transition`], a single table keyed on the
//! current state and the trigger.  Guards live there and nowhere else.

use wave_proto::protocol::PlayerState;

/// Inputs to the state machine.  Media triggers come from the playback
/// resource; the load and stop triggers come from the player itself.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    MetadataResolved { duration: f64 },
    TimeAdvanced { current_time: f64 },
    PlaybackStarted,
    PlaybackPaused,
    PlaybackEnded,
    ResourceError { message: String },
    /// Resource ran out of buffered data.
    BufferingStall,
    /// Resource has enough data to resume.
    CanResume,
    LoadStarted,
    LoadSettled,
    Stopped,
}

/// The transition table.  Returns the state after `trigger`, which equals
/// `current` when the trigger does not move the machine.
pub fn transition(current: PlayerState, trigger: &Trigger) -> PlayerState {
    use PlayerState::*;

    match (current, trigger) {
        (_, Trigger::MetadataResolved { .. }) => Idle,
        (state, Trigger::TimeAdvanced { .. }) => state,
        (_, Trigger::PlaybackStarted) => Playing,
        // A pause that arrives at rest (after stop or end) is not a user pause.
        (Idle, Trigger::PlaybackPaused) => Idle,
        (_, Trigger::PlaybackPaused) => Paused,
        (_, Trigger::PlaybackEnded) => Idle,
        (_, Trigger::ResourceError { .. }) => Error,
        // Stalls while playing or paused are seeks; only re-buffer from rest.
        (Idle, Trigger::BufferingStall) => Loading,
        (state, Trigger::BufferingStall) => state,
        (Loading, Trigger::CanResume) => Idle,
        (state, Trigger::CanResume) => state,
        (_, Trigger::LoadStarted) => Loading,
        (Loading, Trigger::LoadSettled) => Idle,
        (state, Trigger::LoadSettled) => state,
        (_, Trigger::Stopped) => Idle,
    }
}

/// Transport state plus the time, duration, rate and error fields that the
/// triggers update.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackMachine {
    state: PlayerState,
    current_time: f64,
    duration: f64,
    playback_rate: f64,
    error: Option<String>,
}

impl Default for PlaybackMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackMachine {
    pub fn new() -> Self {
        Self {
            state: PlayerState::Loading,
            current_time: 0.0,
            duration: 0.0,
            playback_rate: 1.0,
            error: None,
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn playback_rate(&self) -> f64 {
        self.playback_rate
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Apply one trigger.  Returns the new state when it changed.
    pub fn apply(&mut self, trigger: &Trigger) -> Option<PlayerState> {
        match trigger {
            Trigger::MetadataResolved { duration } => {
                self.duration = sanitize_seconds(*duration);
                self.current_time = self.clamp_reported(self.current_time);
            }
            Trigger::TimeAdvanced { current_time } => {
                self.current_time = self.clamp_reported(*current_time);
            }
            Trigger::PlaybackEnded | Trigger::Stopped => {
                self.current_time = 0.0;
            }
            Trigger::ResourceError { message } => {
                self.error = Some(message.clone());
            }
            Trigger::LoadStarted => {
                self.current_time = 0.0;
                self.duration = 0.0;
            }
            _ => {}
        }

        let next = transition(self.state, trigger);
        if next != PlayerState::Error {
            self.error = None;
        }
        if next == self.state {
            return None;
        }
        self.state = next;
        Some(next)
    }

    /// Clamp a requested position into `[0, duration]` and store it.
    pub fn seek(&mut self, time: f64) -> f64 {
        self.current_time = self.clamp_time(time);
        self.current_time
    }

    pub fn set_rate(&mut self, rate: f64) {
        self.playback_rate = rate;
    }

    /// Clamp a requested position into `[0, duration]`.  Gives 0 while the
    /// duration is still unknown.
    pub fn clamp_time(&self, time: f64) -> f64 {
        sanitize_seconds(time).min(self.duration)
    }

    /// Positions reported by the resource.  Live streams have no duration
    /// but still advance, so only the lower bound applies until one is known.
    fn clamp_reported(&self, time: f64) -> f64 {
        let time = sanitize_seconds(time);
        if self.duration > 0.0 {
            time.min(self.duration)
        } else {
            time
        }
    }
}

fn sanitize_seconds(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}
