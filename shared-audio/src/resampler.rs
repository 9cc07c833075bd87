//! Converts device-rate frames to 16 kHz and slices them into overlapped
//! chunks on a fixed hop (§4.2, C2). This is the only stage allowed to drop
//! samples, and only on its own input side when the live capture outruns
//! resampling — downstream backpressure is still honored via a blocking
//! send of finished chunks (§4.15).

use crate::source::RawFrame;
use md5::{Digest, Md5};
use rubato::{Resampler as _, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use std::collections::VecDeque;
use tracing::warn;

/// Cap on buffered un-resampled input, expressed as a multiple of the
/// target chunk length; beyond this the oldest input is dropped.
const MAX_BACKLOG_CHUNKS: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct ResamplerConfig {
    pub model_rate_hz: u32,
    pub chunk_duration_s: f32,
    pub overlap_duration_s: f32,
}

impl ResamplerConfig {
    pub fn hop_ms(&self) -> f64 {
        ((self.chunk_duration_s - self.overlap_duration_s) as f64) * 1000.0
    }
}

/// A semantic window of 16 kHz audio (§3 `AudioChunk`).
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub chunk_index: u64,
    pub start_time_ms: f64,
    pub fingerprint: [u8; 16],
}

enum RateConverter {
    Identity,
    Sinc { inner: SincFixedIn<f32>, input_frames: usize, pending_input: VecDeque<f32> },
}

impl RateConverter {
    fn new(device_rate: u32, model_rate: u32) -> Self {
        if device_rate == model_rate {
            return Self::Identity;
        }
        let ratio = model_rate as f64 / device_rate as f64;
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let input_frames = 1024;
        let inner = SincFixedIn::<f32>::new(ratio, 2.0, params, input_frames, 1)
            .expect("valid rubato resampler parameters");
        Self::Sinc { inner, input_frames, pending_input: VecDeque::new() }
    }

    /// Push raw samples, returning any newly produced 16 kHz samples.
    fn push(&mut self, samples: &[f32]) -> Vec<f32> {
        match self {
            Self::Identity => samples.to_vec(),
            Self::Sinc { inner, input_frames, pending_input } => {
                pending_input.extend(samples.iter().copied());
                let mut out = Vec::new();
                while pending_input.len() >= *input_frames {
                    let frame: Vec<f32> = pending_input.drain(..*input_frames).collect();
                    match inner.process(&[frame], None) {
                        Ok(mut channels) => out.append(&mut channels[0]),
                        Err(e) => warn!(%e, "resample failed, dropping frame"),
                    }
                }
                out
            }
        }
    }
}

pub struct Resampler {
    config: ResamplerConfig,
    converter: RateConverter,
    chunk_len: usize,
    hop_len: usize,
    window: VecDeque<f32>,
    new_since_emit: usize,
    chunk_index: u64,
}

impl Resampler {
    pub fn new(config: ResamplerConfig, device_rate: u32) -> Self {
        let chunk_len = (config.chunk_duration_s * config.model_rate_hz as f32).round() as usize;
        let hop_len = ((config.chunk_duration_s - config.overlap_duration_s)
            * config.model_rate_hz as f32)
            .round() as usize;
        Self {
            converter: RateConverter::new(device_rate, config.model_rate_hz),
            config,
            chunk_len,
            hop_len,
            window: VecDeque::with_capacity(chunk_len),
            new_since_emit: 0,
            chunk_index: 0,
        }
    }

    /// Feed one raw device-rate frame; returns zero or more newly completed
    /// chunks (usually zero or one, but a large input frame can complete
    /// more than one hop).
    pub fn push_frame(&mut self, frame: &RawFrame) -> Vec<AudioChunk> {
        let resampled = self.converter.push(&frame.samples);
        self.ingest(&resampled)
    }

    fn ingest(&mut self, samples: &[f32]) -> Vec<AudioChunk> {
        for &s in samples {
            self.window.push_back(s);
            if self.window.len() > self.chunk_len {
                self.window.pop_front();
            }
            self.new_since_emit += 1;
        }

        let backlog_cap = self.chunk_len * MAX_BACKLOG_CHUNKS;
        if self.new_since_emit > backlog_cap {
            warn!(dropped = self.new_since_emit - backlog_cap, "resampler backlog exceeded, dropping");
            self.new_since_emit = backlog_cap;
        }

        let mut chunks = Vec::new();
        while self.window.len() == self.chunk_len && self.new_since_emit >= self.hop_len {
            let samples: Vec<f32> = self.window.iter().copied().collect();
            let fingerprint = fingerprint_of(&samples);
            let start_time_ms = self.chunk_index as f64 * self.config.hop_ms();
            chunks.push(AudioChunk { samples, chunk_index: self.chunk_index, start_time_ms, fingerprint });
            self.chunk_index += 1;
            self.new_since_emit -= self.hop_len;
        }
        chunks
    }
}

fn fingerprint_of(samples: &[f32]) -> [u8; 16] {
    let mut hasher = Md5::new();
    for s in samples {
        hasher.update(s.to_le_bytes());
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: usize, rate: u32) -> RawFrame {
        RawFrame { samples: vec![0.1; n], sample_rate: rate }
    }

    #[test]
    fn chunk_n_starts_at_n_times_hop_ms() {
        let config = ResamplerConfig { model_rate_hz: 16_000, chunk_duration_s: 3.0, overlap_duration_s: 1.5 };
        let mut resampler = Resampler::new(config, 16_000);
        let mut emitted = Vec::new();
        for _ in 0..30 {
            emitted.extend(resampler.push_frame(&frame(1600, 16_000)));
        }
        assert!(emitted.len() >= 2);
        for chunk in &emitted {
            assert_eq!(chunk.start_time_ms, chunk.chunk_index as f64 * config.hop_ms());
        }
    }

    #[test]
    fn identical_chunks_share_a_fingerprint() {
        let config = ResamplerConfig { model_rate_hz: 16_000, chunk_duration_s: 3.0, overlap_duration_s: 1.5 };
        let mut resampler = Resampler::new(config, 16_000);
        let mut emitted = Vec::new();
        for _ in 0..20 {
            emitted.extend(resampler.push_frame(&frame(1600, 16_000)));
        }
        assert!(emitted.windows(2).any(|w| w[0].fingerprint == w[1].fingerprint));
    }
}
