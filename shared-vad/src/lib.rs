//! Adaptive noise-floor tracking and voice-activity detection over 16 kHz
//! chunks (spec §4.3 / §4.4). Operates on whole chunks, not frames: the
//! caller hands us one hop's worth of resampled audio at a time.

use rustfft::{FftPlanner, num_complex::Complex};
use std::collections::VecDeque;
use tracing::debug;

const HISTORY_CAP: usize = 100;
const ADAPT_EVERY: u32 = 50;
const BOOTSTRAP_SUBWINDOW_MS: usize = 50;

/// Adaptive RMS noise floor (§3 `NoiseFloor`).
#[derive(Debug, Clone, Copy)]
pub struct NoiseFloor {
    pub value: f32,
    pub calibrated: bool,
}

/// Two-phase calibrator: bootstrap from a fixed warm-up window, then adapt
/// from non-speech chunks only (§4.3). Exclusively owned by the caller;
/// `snapshot()` hands VAD a cheap copy-on-read of the scalar.
pub struct NoiseFloorCalibrator {
    sample_rate: u32,
    calib_samples_needed: usize,
    bootstrap_buffer: Vec<f32>,
    floor: NoiseFloor,
    history: VecDeque<f32>,
    updates_since_recompute: u32,
}

impl NoiseFloorCalibrator {
    pub fn new(sample_rate: u32, calib_secs: f32) -> Self {
        Self {
            sample_rate,
            calib_samples_needed: (calib_secs * sample_rate as f32).round() as usize,
            bootstrap_buffer: Vec::new(),
            floor: NoiseFloor { value: 0.0, calibrated: false },
            history: VecDeque::with_capacity(HISTORY_CAP),
            updates_since_recompute: 0,
        }
    }

    pub fn snapshot(&self) -> NoiseFloor {
        self.floor
    }

    /// Feed samples while uncalibrated. Returns `true` once bootstrap
    /// completes on this call (caller can then enable VAD speech paths).
    pub fn feed_bootstrap(&mut self, samples: &[f32]) -> bool {
        if self.floor.calibrated {
            return false;
        }
        self.bootstrap_buffer.extend_from_slice(samples);
        if self.bootstrap_buffer.len() < self.calib_samples_needed {
            return false;
        }

        let subwindow_len =
            (self.sample_rate as usize * BOOTSTRAP_SUBWINDOW_MS / 1000).max(1);
        let mut rms_values: Vec<f32> = self
            .bootstrap_buffer
            .chunks(subwindow_len)
            .filter(|w| !w.is_empty())
            .map(rms)
            .collect();
        self.floor.value = median(&mut rms_values);
        self.floor.calibrated = true;
        debug!(floor = self.floor.value, "noise floor bootstrap complete");
        true
    }

    /// Called once per chunk after a VAD decision; only non-speech chunks
    /// move the floor (§4.3, invariant 4 of §8).
    pub fn observe(&mut self, chunk_rms: f32, is_speech: bool) {
        if is_speech || !self.floor.calibrated {
            return;
        }
        if self.history.len() == HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(chunk_rms);
        self.updates_since_recompute += 1;
        if self.updates_since_recompute >= ADAPT_EVERY {
            let mut values: Vec<f32> = self.history.iter().copied().collect();
            self.floor.value = median(&mut values);
            self.updates_since_recompute = 0;
            debug!(floor = self.floor.value, "noise floor adapted");
        }
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

fn median(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadMode {
    Fast,
    Accurate,
}

#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    pub enabled: bool,
    pub mode: VadMode,
    pub zcr_min: f32,
    pub zcr_max: f32,
    pub entropy_max: f32,
    pub rms_margin: f32,
}

/// Telemetry-only features recorded alongside the decision (§3 `VadDecision`).
#[derive(Debug, Clone, Copy, Default)]
pub struct VadFeatures {
    pub rms: f32,
    pub zcr: f32,
    pub spectral_entropy: Option<f32>,
}

#[derive(Debug, Clone, Copy)]
pub struct VadDecision {
    pub is_speech: bool,
    pub features: VadFeatures,
}

pub struct VoiceActivityDetector {
    config: VadConfig,
}

impl VoiceActivityDetector {
    pub fn new(config: VadConfig) -> Self {
        Self { config }
    }

    /// Classify a full 16 kHz chunk (§4.4). `noise_floor` is a copy-on-read
    /// snapshot of the calibrator's current estimate.
    pub fn decide(&self, samples: &[f32], noise_floor: f32) -> VadDecision {
        if !self.config.enabled {
            return VadDecision {
                is_speech: true,
                features: VadFeatures { rms: rms(samples), zcr: 0.0, spectral_entropy: None },
            };
        }

        let chunk_rms = rms(samples);
        if chunk_rms <= noise_floor + self.config.rms_margin {
            return VadDecision {
                is_speech: false,
                features: VadFeatures { rms: chunk_rms, zcr: 0.0, spectral_entropy: None },
            };
        }

        let zcr = zero_crossing_rate(samples);
        let zcr_in_band = zcr >= self.config.zcr_min && zcr <= self.config.zcr_max;

        let (is_speech, entropy) = match self.config.mode {
            VadMode::Fast => (zcr_in_band, None),
            VadMode::Accurate => {
                let entropy = spectral_entropy(samples);
                (zcr_in_band || entropy <= self.config.entropy_max, Some(entropy))
            }
        };

        VadDecision {
            is_speech,
            features: VadFeatures { rms: chunk_rms, zcr, spectral_entropy: entropy },
        }
    }
}

fn zero_crossing_rate(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples.windows(2).filter(|w| w[0] * w[1] < 0.0).count();
    crossings as f32 / samples.len() as f32
}

/// Normalized Shannon entropy of the power spectrum (§4.4, GLOSSARY).
fn spectral_entropy(samples: &[f32]) -> f32 {
    let n = samples.len();
    if n == 0 {
        return 0.0;
    }
    let mut buffer: Vec<Complex<f32>> =
        samples.iter().map(|&s| Complex { re: s, im: 0.0 }).collect();
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    fft.process(&mut buffer);

    // rFFT: only the first n/2 + 1 bins are independent for real input.
    let half = n / 2 + 1;
    let power: Vec<f32> = buffer[..half].iter().map(|c| c.norm_sqr()).collect();
    let total: f32 = power.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }

    let nonzero_bins: Vec<f32> = power.iter().filter(|&&p| p > 0.0).copied().collect();
    if nonzero_bins.len() <= 1 {
        return 0.0;
    }

    let entropy: f32 = nonzero_bins
        .iter()
        .map(|&p| {
            let prob = p / total;
            -prob * prob.log2()
        })
        .sum();
    let max_entropy = (nonzero_bins.len() as f32).log2();
    if max_entropy <= 0.0 {
        0.0
    } else {
        entropy / max_entropy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silence(n: usize) -> Vec<f32> {
        vec![0.0; n]
    }

    fn tone(n: usize, freq_hz: f32, sample_rate: f32) -> Vec<f32> {
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq_hz * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn silence_below_floor_is_not_speech() {
        let vad = VoiceActivityDetector::new(VadConfig {
            enabled: true,
            mode: VadMode::Accurate,
            zcr_min: 0.02,
            zcr_max: 0.35,
            entropy_max: 0.85,
            rms_margin: 0.004,
        });
        let decision = vad.decide(&silence(1600), 0.0);
        assert!(!decision.is_speech);
    }

    #[test]
    fn disabled_vad_always_speech() {
        let vad = VoiceActivityDetector::new(VadConfig {
            enabled: false,
            mode: VadMode::Accurate,
            zcr_min: 0.02,
            zcr_max: 0.35,
            entropy_max: 0.85,
            rms_margin: 0.004,
        });
        assert!(vad.decide(&silence(1600), 0.0).is_speech);
    }

    #[test]
    fn bootstrap_completes_after_enough_samples() {
        let mut calibrator = NoiseFloorCalibrator::new(16_000, 1.5);
        assert!(!calibrator.feed_bootstrap(&silence(16_000)));
        assert!(calibrator.feed_bootstrap(&silence(16_000)));
        assert!(calibrator.snapshot().calibrated);
    }

    #[test]
    fn speech_chunks_never_move_the_floor() {
        let mut calibrator = NoiseFloorCalibrator::new(16_000, 1.5);
        calibrator.feed_bootstrap(&silence(24_000));
        let before = calibrator.snapshot().value;
        for _ in 0..ADAPT_EVERY {
            calibrator.observe(0.9, true);
        }
        assert_eq!(calibrator.snapshot().value, before);
    }

    #[test]
    fn tone_has_lower_spectral_entropy_than_noise() {
        let samples = tone(1600, 440.0, 16_000.0);
        let e = spectral_entropy(&samples);
        assert!(e < 0.5, "tone entropy unexpectedly high: {e}");
    }
}
