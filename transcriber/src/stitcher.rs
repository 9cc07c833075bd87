//! Confidence-gated chunk-boundary merge (§4.11, C11... numbered C10 in the
//! dependency table). Removes garbled duplicates at chunk boundaries before
//! the timeline merger ever sees them.

use crate::decoder::{DecodeResult, WordTiming};
use strsim::levenshtein;

#[derive(Debug, Clone, Default)]
pub struct ChunkTail {
    pub words: Vec<String>,
    pub text: String,
    pub confidence: f32,
}

impl ChunkTail {
    fn from_words(words: &[WordTiming], overlap_word_count: usize) -> Self {
        let tail: Vec<&WordTiming> = words.iter().rev().take(overlap_word_count).collect();
        let tail: Vec<&WordTiming> = tail.into_iter().rev().collect();
        let words_text: Vec<String> = tail.iter().map(|w| w.text.clone()).collect();
        let text = words_text.join(" ");
        let confidence = if tail.is_empty() {
            0.0
        } else {
            tail.iter().map(|w| w.confidence).sum::<f32>() / tail.len() as f32
        };
        Self { words: words_text, text, confidence }
    }
}

fn similarity(a: &str, b: &str) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let dist = levenshtein(a, b) as f32;
    let max_len = a.chars().count().max(b.chars().count()) as f32;
    1.0 - dist / max_len
}

const WORD_MATCH_THRESHOLD: f32 = 0.8;

/// Length of the longest run of `head`'s leading words that also occurs,
/// word-for-word (fuzzily), somewhere inside `prev_tail` — not necessarily
/// at its very end, since a low-confidence trailing word in the old chunk
/// (e.g. "do" in "...are you do") can sit past the true overlap without
/// itself re-appearing in the new chunk's head.
fn overlap_len(prev_tail: &[String], head: &[String]) -> usize {
    let max_k = prev_tail.len().min(head.len());
    for k in (1..=max_k).rev() {
        let target = &head[..k];
        let found = prev_tail
            .windows(k)
            .any(|window| window.iter().zip(target).all(|(a, b)| similarity(a, b) >= WORD_MATCH_THRESHOLD));
        if found {
            return k;
        }
    }
    0
}

pub struct ConfidenceStitcher {
    overlap_word_count: usize,
    confidence_threshold: f32,
    prev_tail: ChunkTail,
}

impl ConfidenceStitcher {
    pub fn new(overlap_word_count: usize, confidence_threshold: f32) -> Self {
        Self { overlap_word_count, confidence_threshold, prev_tail: ChunkTail::default() }
    }

    /// Trims overlap words in place from `result.words` per the boundary
    /// gating policy, then refreshes the stored tail from the (possibly
    /// trimmed) result.
    pub fn stitch(&mut self, result: &mut DecodeResult) {
        let head: Vec<String> =
            result.words.iter().take(self.overlap_word_count).map(|w| w.text.clone()).collect();
        let overlap = overlap_len(&self.prev_tail.words, &head);

        if overlap > 0 {
            let n = overlap.min(result.words.len());
            if self.prev_tail.confidence < self.confidence_threshold {
                result.words.drain(0..n);
            } else if result.avg_confidence < self.confidence_threshold {
                result.words.drain(0..n);
            }
            result.text = result.words.iter().map(|w| w.text.as_str()).collect::<Vec<_>>().join(" ");
        }

        self.prev_tail = ChunkTail::from_words(&result.words, self.overlap_word_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, confidence: f32) -> WordTiming {
        WordTiming {
            text: text.to_string(),
            start_ms: 0.0,
            end_ms: 100.0,
            confidence,
            global_start_ms: 0.0,
            global_end_ms: 100.0,
        }
    }

    #[test]
    fn low_confidence_tail_trims_new_chunk_head() {
        let mut stitcher = ConfidenceStitcher::new(4, 0.6);
        let mut first = DecodeResult {
            words: vec![word("hello", 0.9), word("how", 0.9), word("are", 0.4), word("you", 0.4), word("do", 0.4)],
            ..Default::default()
        };
        first.text = "hello how are you do".into();
        stitcher.stitch(&mut first);

        let mut second = DecodeResult {
            words: vec![word("are", 0.9), word("you", 0.9), word("doing", 0.9), word("today", 0.9)],
            avg_confidence: 0.9,
            ..Default::default()
        };
        second.text = "are you doing today".into();
        stitcher.stitch(&mut second);

        assert_eq!(second.text, "doing today");
    }

    #[test]
    fn confident_both_sides_takes_no_action() {
        let mut stitcher = ConfidenceStitcher::new(4, 0.6);
        let mut first = DecodeResult {
            words: vec![word("hello", 0.9), word("how", 0.9), word("are", 0.9), word("you", 0.9)],
            avg_confidence: 0.9,
            ..Default::default()
        };
        first.text = "hello how are you".into();
        stitcher.stitch(&mut first);

        let mut second = DecodeResult {
            words: vec![word("how", 0.9), word("are", 0.9), word("you", 0.9), word("today", 0.9)],
            avg_confidence: 0.9,
            ..Default::default()
        };
        second.text = "how are you today".into();
        stitcher.stitch(&mut second);

        assert_eq!(second.words.len(), 4);
    }

    #[test]
    fn only_the_overlapping_words_are_trimmed_not_the_whole_head_window() {
        let mut stitcher = ConfidenceStitcher::new(4, 0.6);
        let mut first = DecodeResult {
            words: vec![word("hello", 0.9), word("how", 0.9), word("are", 0.4), word("you", 0.4), word("do", 0.4)],
            ..Default::default()
        };
        first.text = "hello how are you do".into();
        stitcher.stitch(&mut first);

        let mut second = DecodeResult {
            words: vec![word("are", 0.9), word("you", 0.9), word("doing", 0.9), word("today", 0.9)],
            avg_confidence: 0.9,
            ..Default::default()
        };
        second.text = "are you doing today".into();
        stitcher.stitch(&mut second);

        // Only "are you" (the real overlap) is trimmed, not all 4 head words.
        assert_eq!(second.words.len(), 2);
        assert_eq!(second.words[0].text, "doing");
    }
}
