//! Waveform audio player engine.
//!
//! A [`WavePlayer`] drives a host [`PlaybackResource`] through an explicit
//! transport state machine, summarizes the source audio into a fixed number
//! of waveform bars, and shares a [`PlaybackCoordinator`] with its siblings so
//! that only one of them plays at a time.

pub mod coordinator;
pub mod decode;
pub mod error;
pub mod fetch;
pub mod loader;
pub mod player;
pub mod resource;
pub mod state_machine;
pub mod time;
pub mod waveform;

pub use coordinator::{PlaybackCoordinator, PlayerId, Subscription};
pub use decode::SymphoniaDecoder;
pub use error::{LoadError, PlayerError};
pub use fetch::SourceFetcher;
pub use loader::{AudioDecoder, AudioFetcher, LoadReport, SourceLoader};
pub use player::{Capabilities, PlayerOptions, WavePlayer};
pub use resource::{MediaEvent, MediaSink, PlaybackResource};
