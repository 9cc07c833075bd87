//! CTC-style decode with per-token confidence and timing (§4.8, C8).
//! Operates on the acoustic slice of the encoder's logits; the task-query
//! prefix (`[0, T_task)`) is the caller's to discard via `t_task`.

use crate::metadata::MetadataParser;
use ndarray::ArrayView2;
use shared_protocol::{AudioEvent, Emotion, Language};
use std::collections::BTreeSet;

pub const BOUNDARY_MARKER: char = '\u{2581}';

/// Minimal detokenizer contract (§1 "specified only via... a detokenizer
/// interface"): map a token id to its subword piece text.
pub trait Detokenizer {
    fn piece(&self, token_id: usize) -> &str;
    fn blank_id(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenTiming {
    pub token_id: usize,
    pub start_ms: f64,
    pub end_ms: f64,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WordTiming {
    pub text: String,
    pub start_ms: f64,
    pub end_ms: f64,
    pub confidence: f32,
    pub global_start_ms: f64,
    pub global_end_ms: f64,
}

impl WordTiming {
    pub fn apply_chunk_offset(&mut self, chunk_start_time_ms: f64) {
        self.global_start_ms = self.start_ms + chunk_start_time_ms;
        self.global_end_ms = self.end_ms + chunk_start_time_ms;
    }
}

#[derive(Debug, Clone, Default)]
pub struct DecodeResult {
    pub words: Vec<WordTiming>,
    pub text: String,
    pub avg_confidence: f32,
    pub language: Option<Language>,
    pub emotion: Option<Emotion>,
    pub audio_events: BTreeSet<AudioEvent>,
    pub has_itn: bool,
    pub raw_text: String,
}

struct Run {
    token_id: usize,
    start_frame: usize,
    end_frame: usize,
    confidence: f32,
}

pub struct CTCDecoder;

impl CTCDecoder {
    pub fn new() -> Self {
        Self
    }

    /// `logits`: `[V, T]` after slicing off the task-query columns.
    pub fn decode(
        &self,
        logits: ArrayView2<f32>,
        chunk_duration_ms: f64,
        detokenizer: &dyn Detokenizer,
    ) -> DecodeResult {
        let (vocab, frames) = (logits.shape()[0], logits.shape()[1]);
        if frames == 0 {
            return DecodeResult::default();
        }
        let ms_per_frame = chunk_duration_ms / frames as f64;

        let mut ids = Vec::with_capacity(frames);
        let mut confs = Vec::with_capacity(frames);
        for t in 0..frames {
            let column: Vec<f32> = logits.column(t).iter().copied().collect();
            let probs = softmax(&column);
            let (best_id, best_p) = argmax(&probs);
            ids.push(best_id.min(vocab.saturating_sub(1)));
            confs.push(best_p);
        }

        let mut runs: Vec<Run> = Vec::new();
        for t in 0..frames {
            match runs.last_mut() {
                Some(run) if run.token_id == ids[t] => {
                    run.end_frame = t;
                    run.confidence = run.confidence.max(confs[t]);
                }
                _ => runs.push(Run { token_id: ids[t], start_frame: t, end_frame: t, confidence: confs[t] }),
            }
        }
        runs.retain(|run| run.token_id != detokenizer.blank_id());

        // §4.8 steps 4-5: blanks are already gone, frames are mapped to ms.
        let tokens: Vec<TokenTiming> = runs
            .into_iter()
            .map(|run| TokenTiming {
                token_id: run.token_id,
                start_ms: run.start_frame as f64 * ms_per_frame,
                end_ms: (run.end_frame + 1) as f64 * ms_per_frame,
                confidence: run.confidence,
            })
            .collect();

        let mut metadata = MetadataParser::new();
        let mut raw_text = String::new();
        let mut words: Vec<WordTiming> = Vec::new();
        let mut current: Option<WordTiming> = None;
        let mut current_confs: Vec<f32> = Vec::new();

        let flush = |current: &mut Option<WordTiming>, current_confs: &mut Vec<f32>, words: &mut Vec<WordTiming>| {
            if let Some(mut word) = current.take() {
                if !current_confs.is_empty() {
                    word.confidence = current_confs.iter().sum::<f32>() / current_confs.len() as f32;
                }
                current_confs.clear();
                words.push(word);
            }
        };

        for token in &tokens {
            let piece = detokenizer.piece(token.token_id);
            raw_text.push_str(piece);
            raw_text.push(' ');

            if metadata.observe(piece) {
                continue;
            }

            let (start_ms, end_ms) = (token.start_ms, token.end_ms);
            let is_boundary = piece.starts_with(BOUNDARY_MARKER);
            let cleaned: String = piece.trim_start_matches(BOUNDARY_MARKER).to_string();
            let has_alnum = cleaned.chars().any(|c| c.is_alphanumeric());

            if !has_alnum {
                // Punctuation-only piece: attach to the preceding word rather
                // than starting a new one (§4.8 edge case).
                if let Some(word) = current.as_mut() {
                    word.text.push_str(&cleaned);
                    word.end_ms = end_ms;
                    current_confs.push(token.confidence);
                } else {
                    flush(&mut current, &mut current_confs, &mut words);
                }
                continue;
            }

            if is_boundary || current.is_none() {
                flush(&mut current, &mut current_confs, &mut words);
                current = Some(WordTiming {
                    text: cleaned,
                    start_ms,
                    end_ms,
                    confidence: 0.0,
                    global_start_ms: start_ms,
                    global_end_ms: end_ms,
                });
                current_confs.push(token.confidence);
            } else if let Some(word) = current.as_mut() {
                word.text.push_str(&cleaned);
                word.end_ms = end_ms;
                current_confs.push(token.confidence);
            }
        }
        flush(&mut current, &mut current_confs, &mut words);

        let text = words.iter().map(|w| w.text.as_str()).collect::<Vec<_>>().join(" ");
        let avg_confidence = if words.is_empty() {
            0.0
        } else {
            words.iter().map(|w| w.confidence).sum::<f32>() / words.len() as f32
        };

        DecodeResult {
            words,
            text,
            avg_confidence,
            language: metadata.language,
            emotion: metadata.emotion,
            audio_events: metadata.audio_events,
            has_itn: metadata.has_itn,
            raw_text: raw_text.trim_end().to_string(),
        }
    }
}

impl Default for CTCDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    if logits.is_empty() {
        return Vec::new();
    }
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum <= 0.0 {
        return vec![0.0; logits.len()];
    }
    exps.into_iter().map(|v| v / sum).collect()
}

fn argmax(probs: &[f32]) -> (usize, f32) {
    probs
        .iter()
        .enumerate()
        .fold((0usize, f32::MIN), |best, (i, &p)| if p > best.1 { (i, p) } else { best })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    struct FixedVocab;

    impl Detokenizer for FixedVocab {
        fn piece(&self, token_id: usize) -> &str {
            match token_id {
                0 => "",
                1 => "\u{2581}hello",
                2 => "\u{2581}world",
                3 => "<|en|>",
                4 => "<|NEUTRAL|>",
                _ => "?",
            }
        }
        fn blank_id(&self) -> usize {
            0
        }
    }

    fn one_hot_column(vocab: usize, id: usize) -> Vec<f32> {
        let mut col = vec![-10.0; vocab];
        col[id] = 10.0;
        col
    }

    #[test]
    fn collapses_repeats_and_drops_blanks() {
        let vocab = 5;
        let ids = [3, 4, 0, 1, 1, 0, 2, 2];
        let mut data = Vec::new();
        for _ in 0..vocab {
            data.push(0.0);
        }
        let mut logits = Array2::<f32>::zeros((vocab, ids.len()));
        for (t, &id) in ids.iter().enumerate() {
            let col = one_hot_column(vocab, id);
            for v in 0..vocab {
                logits[[v, t]] = col[v];
            }
        }
        let decoder = CTCDecoder::new();
        let result = decoder.decode(logits.view(), 3000.0, &FixedVocab);
        assert_eq!(result.text, "hello world");
        assert_eq!(result.language, Some(Language::English));
        assert_eq!(result.emotion, Some(Emotion::Neutral));
        assert!(result.avg_confidence > 0.9);
    }

    #[test]
    fn empty_frames_yield_empty_result() {
        let decoder = CTCDecoder::new();
        let logits = Array2::<f32>::zeros((5, 0));
        let result = decoder.decode(logits.view(), 3000.0, &FixedVocab);
        assert!(result.words.is_empty());
        assert_eq!(result.avg_confidence, 0.0);
    }
}
