use std::time::Duration;
use thiserror::Error;

/// Misuse of the player API, reported before it can reach waveform math.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlayerError {
    #[error("bar count must be greater than zero")]
    InvalidBarCount,

    #[error("analysis timeout must be greater than zero")]
    InvalidTimeout,

    #[error("playback rate must be a positive finite number, got {0}")]
    InvalidRate(f64),
}

/// Failures inside the fetch → decode → analyze pipeline.  Never surfaced to
/// callers; the loader logs them and substitutes the fallback waveform.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("fetching {url} failed with HTTP {status}")]
    FetchStatus { url: String, status: u16 },

    #[error("fetching {url} failed: {message}")]
    Fetch { url: String, message: String },

    #[error("decoding failed: {0}")]
    Decode(String),

    #[error("analysis did not finish within {0:?}")]
    Timeout(Duration),

    #[error("analysis task ended unexpectedly: {0}")]
    Aborted(String),
}

impl LoadError {
    pub fn fetch(url: &str, err: impl std::fmt::Display) -> Self {
        LoadError::Fetch {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}
