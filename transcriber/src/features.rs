//! Builds the encoder input tensor from a chunk's audio plus task-query
//! embeddings (§4.6, C6). Shape is `[1, T_task + T_audio, D]`: the task rows
//! condition the model on the active language / emotion-event / ITN intent,
//! the audio rows are a log-mel stack scaled by `speech_scale`.

use ndarray::Array3;
use rustfft::{num_complex::Complex, FftPlanner};
use shared_protocol::Language;
use std::collections::HashMap;

pub const MEL_BINS: usize = 80;
const FRAME_LEN: usize = 400; // 25ms @ 16kHz
const HOP_LEN: usize = 160; // 10ms @ 16kHz
const SPEECH_SCALE: f32 = 0.25;

/// Fixed-length query rows read out of the model bundle at load time. Row
/// counts come from the embedding tables actually shipped with the model,
/// not a hard-coded constant — different model exports prepend a different
/// number of task rows.
#[derive(Debug, Clone)]
pub struct TaskEmbeddings {
    pub feature_dim: usize,
    pub language_rows: HashMap<Language, Vec<Vec<f32>>>,
    pub emotion_event_query: Vec<Vec<f32>>,
    pub itn_query: Vec<Vec<f32>>,
}

impl TaskEmbeddings {
    /// A minimal, deterministic table for environments without a bundled
    /// embedding file (used by `selftest` and unit tests). Production model
    /// bundles carry their own table loaded by the encoder backend.
    pub fn placeholder(feature_dim: usize) -> Self {
        let mut language_rows = HashMap::new();
        for (i, lang) in [
            Language::English,
            Language::Chinese,
            Language::Japanese,
            Language::Korean,
            Language::Cantonese,
        ]
        .into_iter()
        .enumerate()
        {
            language_rows.insert(lang, vec![vec![(i as f32 + 1.0) * 0.01; feature_dim]]);
        }
        Self {
            feature_dim,
            language_rows,
            emotion_event_query: vec![vec![0.0; feature_dim]],
            itn_query: vec![vec![0.0; feature_dim]],
        }
    }

    pub fn task_rows(&self, use_itn: bool) -> usize {
        let lang_rows = self.language_rows.values().next().map(Vec::len).unwrap_or(0);
        let itn_rows = if use_itn { self.itn_query.len() } else { 0 };
        lang_rows + self.emotion_event_query.len() + itn_rows
    }
}

pub struct FeatureBuilder {
    embeddings: TaskEmbeddings,
    mel_filters: Vec<Vec<f32>>,
    fft: std::sync::Arc<dyn rustfft::Fft<f32>>,
}

impl FeatureBuilder {
    pub fn new(embeddings: TaskEmbeddings, sample_rate_hz: u32) -> Self {
        let mel_filters = mel_filterbank(MEL_BINS, FRAME_LEN, sample_rate_hz);
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FRAME_LEN);
        Self { embeddings, mel_filters, fft }
    }

    /// Frame count the log-mel stage will emit for a chunk of `num_samples`.
    pub fn audio_frame_count(&self, num_samples: usize) -> usize {
        if num_samples < FRAME_LEN {
            0
        } else {
            (num_samples - FRAME_LEN) / HOP_LEN + 1
        }
    }

    pub fn build(&self, samples: &[f32], language: Language, use_itn: bool) -> Array3<f32> {
        let log_mel = self.log_mel_stack(samples);
        let t_audio = log_mel.len();
        let lang_rows = self
            .embeddings
            .language_rows
            .get(&language)
            .cloned()
            .unwrap_or_else(|| vec![vec![0.0; self.embeddings.feature_dim]]);

        let mut rows: Vec<Vec<f32>> = Vec::with_capacity(lang_rows.len() + 2 + t_audio);
        rows.extend(lang_rows);
        rows.extend(self.embeddings.emotion_event_query.clone());
        if use_itn {
            rows.extend(self.embeddings.itn_query.clone());
        }
        rows.extend(log_mel.into_iter().map(|frame| {
            frame.into_iter().map(|v| v * SPEECH_SCALE).collect()
        }));

        let t_total = rows.len();
        let d = self.embeddings.feature_dim;
        let mut out = Array3::<f32>::zeros((1, t_total, d));
        for (t, row) in rows.iter().enumerate() {
            for (k, &v) in row.iter().enumerate().take(d) {
                out[[0, t, k]] = v;
            }
        }
        out
    }

    fn log_mel_stack(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let num_frames = self.audio_frame_count(samples.len());
        let mut frames = Vec::with_capacity(num_frames);
        for i in 0..num_frames {
            let start = i * HOP_LEN;
            let window = &samples[start..start + FRAME_LEN];
            frames.push(self.log_mel_frame(window));
        }
        frames
    }

    fn log_mel_frame(&self, window: &[f32]) -> Vec<f32> {
        let mut buf: Vec<Complex<f32>> = window
            .iter()
            .enumerate()
            .map(|(i, &s)| {
                let hann = 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / (FRAME_LEN as f32 - 1.0)).cos();
                Complex::new(s * hann, 0.0)
            })
            .collect();
        self.fft.process(&mut buf);

        let power: Vec<f32> = buf[..FRAME_LEN / 2 + 1].iter().map(|c| c.norm_sqr()).collect();
        self.mel_filters
            .iter()
            .map(|filt| {
                let energy: f32 = filt.iter().zip(power.iter()).map(|(w, p)| w * p).sum();
                (energy.max(1e-10)).ln()
            })
            .collect()
    }
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Standard triangular mel filterbank over the non-negative FFT bins.
fn mel_filterbank(num_mels: usize, fft_len: usize, sample_rate_hz: u32) -> Vec<Vec<f32>> {
    let num_bins = fft_len / 2 + 1;
    let mel_min = hz_to_mel(0.0);
    let mel_max = hz_to_mel(sample_rate_hz as f32 / 2.0);
    let mel_points: Vec<f32> = (0..num_mels + 2)
        .map(|i| mel_min + (mel_max - mel_min) * i as f32 / (num_mels as f32 + 1.0))
        .collect();
    let bin_points: Vec<usize> = mel_points
        .iter()
        .map(|&m| ((mel_to_hz(m) * fft_len as f32) / sample_rate_hz as f32).floor() as usize)
        .map(|b| b.min(num_bins - 1))
        .collect();

    (0..num_mels)
        .map(|m| {
            let mut filt = vec![0.0f32; num_bins];
            let (left, center, right) = (bin_points[m], bin_points[m + 1], bin_points[m + 2]);
            for k in left..center.max(left + 1) {
                if k < num_bins && center > left {
                    filt[k] = (k - left) as f32 / (center - left) as f32;
                }
            }
            for k in center..right.max(center + 1) {
                if k < num_bins && right > center {
                    filt[k] = (right - k) as f32 / (right - center) as f32;
                }
            }
            filt
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_rows_reflect_table_shape_not_a_constant() {
        let embeddings = TaskEmbeddings::placeholder(8);
        assert_eq!(embeddings.task_rows(true), 1 + 1 + 1);
        assert_eq!(embeddings.task_rows(false), 1 + 1);
    }

    #[test]
    fn build_shape_matches_task_plus_audio_rows() {
        let builder = FeatureBuilder::new(TaskEmbeddings::placeholder(8), 16_000);
        let samples = vec![0.0f32; 16_000 * 3];
        let expected_audio = builder.audio_frame_count(samples.len());
        let tensor = builder.build(&samples, Language::English, true);
        assert_eq!(tensor.shape(), &[1, 3 + expected_audio, 8]);
    }

    #[test]
    fn acoustic_rows_are_scaled_down_from_raw_log_mel() {
        let builder = FeatureBuilder::new(TaskEmbeddings::placeholder(8), 16_000);
        let mut samples = vec![0.0f32; 16_000];
        for (i, s) in samples.iter_mut().enumerate() {
            *s = (i as f32 * 0.1).sin();
        }
        let raw = builder.log_mel_stack(&samples);
        let tensor = builder.build(&samples, Language::English, false);
        let t_task = builder.embeddings.task_rows(false);
        assert!((tensor[[0, t_task, 0]] - raw[0][0] * SPEECH_SCALE).abs() < 1e-4);
    }
}
