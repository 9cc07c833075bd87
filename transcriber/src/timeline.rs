//! Global word timeline with confidence-gated boundary replacement
//! (§4.12, C11). Append-mostly; the sole in-place mutation replaces the
//! tail word when a boundary-straddling word wins a confidence contest.

use crate::decoder::WordTiming;

#[derive(Debug, Default)]
pub struct TimelineState {
    pub words: Vec<WordTiming>,
    pub last_emitted_end_ms: f64,
}

pub struct TimelineMerger {
    min_word_confidence: f32,
    overlap_confidence: f32,
    confidence_replacement: bool,
    state: TimelineState,
}

impl TimelineMerger {
    pub fn new(min_word_confidence: f32, overlap_confidence: f32, confidence_replacement: bool) -> Self {
        Self { min_word_confidence, overlap_confidence, confidence_replacement, state: TimelineState::default() }
    }

    pub fn state(&self) -> &TimelineState {
        &self.state
    }

    /// Applies the chunk offset to each word and merges into the global
    /// timeline. Returns only the newly-appended (or replacing) words —
    /// the formatter emits exactly these.
    pub fn merge(&mut self, chunk_start_time_ms: f64, words: &[WordTiming]) -> Vec<WordTiming> {
        let mut emitted = Vec::new();
        for word in words {
            let mut word = word.clone();
            word.apply_chunk_offset(chunk_start_time_ms);

            if word.confidence < self.min_word_confidence {
                continue;
            }
            if word.global_end_ms <= self.state.last_emitted_end_ms {
                continue;
            }

            let straddles = word.global_start_ms < self.state.last_emitted_end_ms
                && self.state.last_emitted_end_ms < word.global_end_ms;

            if straddles {
                let Some(last) = self.state.words.last() else {
                    self.append(word.clone());
                    emitted.push(word);
                    continue;
                };
                let wins = self.confidence_replacement
                    && word.confidence > last.confidence + (self.overlap_confidence - 0.5);
                if wins {
                    *self.state.words.last_mut().unwrap() = word.clone();
                    self.state.last_emitted_end_ms = word.global_end_ms;
                    emitted.push(word);
                }
                continue;
            }

            self.append(word.clone());
            emitted.push(word);
        }
        emitted
    }

    fn append(&mut self, word: WordTiming) {
        self.state.last_emitted_end_ms = word.global_end_ms;
        self.state.words.push(word);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, start: f64, end: f64, confidence: f32) -> WordTiming {
        WordTiming {
            text: text.to_string(),
            start_ms: start,
            end_ms: end,
            confidence,
            global_start_ms: 0.0,
            global_end_ms: 0.0,
        }
    }

    #[test]
    fn new_words_append_and_advance_the_watermark() {
        let mut merger = TimelineMerger::new(0.4, 0.6, true);
        let emitted = merger.merge(0.0, &[word("hello", 0.0, 500.0, 0.9), word("world", 500.0, 1000.0, 0.9)]);
        assert_eq!(emitted.len(), 2);
        assert_eq!(merger.state().last_emitted_end_ms, 1000.0);
    }

    #[test]
    fn already_past_words_are_dropped() {
        let mut merger = TimelineMerger::new(0.4, 0.6, true);
        merger.merge(0.0, &[word("hello", 0.0, 500.0, 0.9)]);
        let emitted = merger.merge(0.0, &[word("hello", 0.0, 500.0, 0.9)]);
        assert!(emitted.is_empty());
    }

    #[test]
    fn low_confidence_word_never_enters_the_timeline() {
        let mut merger = TimelineMerger::new(0.4, 0.6, true);
        let emitted = merger.merge(0.0, &[word("uh", 0.0, 200.0, 0.1)]);
        assert!(emitted.is_empty());
        assert_eq!(merger.state().last_emitted_end_ms, 0.0);
    }

    #[test]
    fn high_confidence_replacement_wins_at_boundary() {
        let mut merger = TimelineMerger::new(0.4, 0.6, true);
        merger.merge(0.0, &[word("bat", 0.0, 500.0, 0.5)]);
        let emitted = merger.merge(0.0, &[word("cat", 100.0, 600.0, 0.95)]);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].text, "cat");
        assert_eq!(merger.state().words.last().unwrap().text, "cat");
    }
}
