//! Fetch → decode → analyze, raced against the analysis timeout.
//!
//! A load never fails from the caller's point of view: every error is logged
//! and masked with the fallback waveform.  The pipeline runs on its own task so
//! that a timeout only stops *waiting* for it; the work itself is detached and
//! its eventual result dropped.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::LoadError;
use crate::waveform;

pub const DEFAULT_ANALYSIS_TIMEOUT: Duration = Duration::from_secs(10);

/// Retrieves the raw bytes behind a source URL.
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError>;
}

/// Turns encoded audio into first-channel PCM samples.
#[async_trait]
pub trait AudioDecoder: Send + Sync {
    async fn decode(&self, bytes: Vec<u8>) -> Result<Vec<f32>, LoadError>;

    /// Release any decode context.  Called once at player teardown.
    fn close(&self) {}
}

/// Outcome of one load.  `waveform` is always `bar_count` long; `failure`
/// says whether it came from the fallback generator.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub waveform: Vec<f32>,
    pub failure: Option<LoadError>,
}

pub struct SourceLoader {
    fetcher: Arc<dyn AudioFetcher>,
    decoder: Arc<dyn AudioDecoder>,
    bar_count: usize,
    timeout: Duration,
    rng: Mutex<StdRng>,
}

impl SourceLoader {
    /// `seed` makes the fallback waveform reproducible; `None` seeds from OS
    /// entropy.
    pub fn new(
        fetcher: Arc<dyn AudioFetcher>,
        decoder: Arc<dyn AudioDecoder>,
        bar_count: usize,
        timeout: Duration,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            fetcher,
            decoder,
            bar_count,
            timeout,
            rng: Mutex::new(rng),
        }
    }

    /// Produce a waveform for `url`, falling back on any failure.
    pub async fn run(&self, url: &str) -> LoadReport {
        match self.analyze_source(url).await {
            Ok(waveform) => {
                debug!("loader: analyzed {}", url);
                LoadReport {
                    waveform,
                    failure: None,
                }
            }
            Err(e) => {
                warn!("loader: {}: {}; using fallback waveform", url, e);
                LoadReport {
                    waveform: self.fallback(),
                    failure: Some(e),
                }
            }
        }
    }

    pub fn fallback(&self) -> Vec<f32> {
        waveform::fallback(self.bar_count, &mut *self.rng.lock())
    }

    pub fn close(&self) {
        self.decoder.close();
    }

    async fn analyze_source(&self, url: &str) -> Result<Vec<f32>, LoadError> {
        let fetcher = Arc::clone(&self.fetcher);
        let decoder = Arc::clone(&self.decoder);
        let bar_count = self.bar_count;
        let url = url.to_string();

        let pipeline = tokio::spawn(async move {
            let bytes = fetcher.fetch(&url).await?;
            let samples = decoder.decode(bytes).await?;
            Ok::<_, LoadError>(waveform::analyze(&samples, bar_count))
        });

        // Dropping the JoinHandle on timeout detaches the task.
        match tokio::time::timeout(self.timeout, pipeline).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(LoadError::Aborted(join_err.to_string())),
            Err(_) => Err(LoadError::Timeout(self.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Bytes(Vec<u8>);

    #[async_trait]
    impl AudioFetcher for Bytes {
        async fn fetch(&self, _url: &str) -> Result<Vec<u8>, LoadError> {
            Ok(self.0.clone())
        }
    }

    struct NotFound;

    #[async_trait]
    impl AudioFetcher for NotFound {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
            Err(LoadError::FetchStatus {
                url: url.to_string(),
                status: 404,
            })
        }
    }

    /// Treats each byte as a sample of `byte / 255`.
    struct ByteSamples;

    #[async_trait]
    impl AudioDecoder for ByteSamples {
        async fn decode(&self, bytes: Vec<u8>) -> Result<Vec<f32>, LoadError> {
            Ok(bytes.iter().map(|b| *b as f32 / 255.0).collect())
        }
    }

    struct Corrupt;

    #[async_trait]
    impl AudioDecoder for Corrupt {
        async fn decode(&self, _bytes: Vec<u8>) -> Result<Vec<f32>, LoadError> {
            Err(LoadError::Decode("bad header".to_string()))
        }
    }

    #[derive(Default)]
    struct Never {
        closed: AtomicBool,
    }

    #[async_trait]
    impl AudioDecoder for Never {
        async fn decode(&self, _bytes: Vec<u8>) -> Result<Vec<f32>, LoadError> {
            std::future::pending().await
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn loader(fetcher: impl AudioFetcher + 'static, decoder: impl AudioDecoder + 'static) -> SourceLoader {
        SourceLoader::new(
            Arc::new(fetcher),
            Arc::new(decoder),
            4,
            DEFAULT_ANALYSIS_TIMEOUT,
            Some(7),
        )
    }

    fn seeded_fallback(bar_count: usize, seed: u64) -> Vec<f32> {
        waveform::fallback(bar_count, &mut StdRng::seed_from_u64(seed))
    }

    #[tokio::test]
    async fn test_success_analyzes_samples() {
        let loader = loader(Bytes(vec![255, 255, 51, 51, 0, 0, 255, 0]), ByteSamples);
        let report = loader.run("clip.wav").await;

        assert!(report.failure.is_none());
        assert_eq!(report.waveform.len(), 4);
        assert_eq!(report.waveform[0], 1.0);
        assert!((report.waveform[1] - 0.2).abs() < 1e-6);
        assert_eq!(report.waveform[2], 0.1);
        assert!((report.waveform[3] - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_not_found_uses_seeded_fallback() {
        let loader = loader(NotFound, ByteSamples);
        let report = loader.run("https://example.invalid/a.mp3").await;

        assert!(matches!(
            report.failure,
            Some(LoadError::FetchStatus { status: 404, .. })
        ));
        assert_eq!(report.waveform, seeded_fallback(4, 7));
    }

    #[tokio::test]
    async fn test_decode_failure_uses_fallback() {
        let loader = loader(Bytes(vec![1, 2, 3]), Corrupt);
        let report = loader.run("clip.wav").await;

        assert!(matches!(report.failure, Some(LoadError::Decode(_))));
        assert_eq!(report.waveform, seeded_fallback(4, 7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_uses_fallback() {
        let loader = loader(Bytes(vec![1, 2, 3]), Never::default());
        let started = tokio::time::Instant::now();
        let report = loader.run("slow.wav").await;

        assert_eq!(
            report.failure,
            Some(LoadError::Timeout(DEFAULT_ANALYSIS_TIMEOUT))
        );
        assert_eq!(report.waveform.len(), 4);
        assert!(started.elapsed() >= DEFAULT_ANALYSIS_TIMEOUT);
    }

    #[test]
    fn test_close_reaches_decoder() {
        let decoder = Arc::new(Never::default());
        let loader = SourceLoader::new(
            Arc::new(NotFound),
            decoder.clone(),
            4,
            DEFAULT_ANALYSIS_TIMEOUT,
            None,
        );
        loader.close();
        assert!(decoder.closed.load(Ordering::SeqCst));
    }
}
