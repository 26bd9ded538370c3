//! In-memory audio decoding with symphonia.
//!
//! Only the first channel is kept: the waveform is a single-channel summary.

use async_trait::async_trait;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::error::LoadError;
use crate::loader::AudioDecoder;

#[derive(Debug, Clone, Default)]
pub struct SymphoniaDecoder {
    closed: Arc<AtomicBool>,
}

impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AudioDecoder for SymphoniaDecoder {
    async fn decode(&self, bytes: Vec<u8>) -> Result<Vec<f32>, LoadError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LoadError::Decode("decoder is closed".to_string()));
        }
        tokio::task::spawn_blocking(move || decode_first_channel(bytes))
            .await
            .map_err(|e| LoadError::Aborted(e.to_string()))?
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Decode every packet of the first audio track, keeping channel 0.
pub fn decode_first_channel(bytes: Vec<u8>) -> Result<Vec<f32>, LoadError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| LoadError::Decode(format!("unrecognised format: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| LoadError::Decode("no audio track".to_string()))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| LoadError::Decode(format!("unsupported codec: {}", e)))?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(LoadError::Decode(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                debug!("decode: skipping corrupt packet: {}", e);
                continue;
            }
            Err(e) => return Err(LoadError::Decode(e.to_string())),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        samples.extend(buf.samples().iter().step_by(channels).copied());
    }

    if samples.is_empty() {
        return Err(LoadError::Decode("stream contained no samples".to_string()));
    }
    debug!("decode: {} samples", samples.len());
    Ok(samples)
}
