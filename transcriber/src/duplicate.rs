//! Coarse second line of defense against repeated emissions (§4.13),
//! principally for very short chunks the stitcher's word-boundary logic
//! doesn't catch. Owned exclusively by the formatter stage (§9).

use strsim::levenshtein;
use std::collections::VecDeque;
use std::time::Instant;

const HISTORY_SIZE: usize = 6;

fn similarity(a: &str, b: &str) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let dist = levenshtein(a, b) as f32;
    let max_len = a.chars().count().max(b.chars().count()) as f32;
    1.0 - dist / max_len
}

struct Entry {
    text: String,
    at: Instant,
}

pub struct DuplicateSuppressor {
    similarity_threshold: f32,
    cooldown: std::time::Duration,
    history: VecDeque<Entry>,
}

impl DuplicateSuppressor {
    pub fn new(similarity_threshold: f32, cooldown_s: f32) -> Self {
        Self {
            similarity_threshold,
            cooldown: std::time::Duration::from_secs_f32(cooldown_s.max(0.0)),
            history: VecDeque::with_capacity(HISTORY_SIZE),
        }
    }

    /// Returns `true` if the candidate should be suppressed as a near-
    /// duplicate of a recent emission within the cooldown window.
    pub fn check(&mut self, candidate: &str) -> bool {
        let now = Instant::now();
        let suppressed = self.history.iter().any(|entry| {
            now.saturating_duration_since(entry.at) < self.cooldown
                && similarity(candidate, &entry.text) >= self.similarity_threshold
        });

        if !suppressed {
            if self.history.len() == HISTORY_SIZE {
                self.history.pop_front();
            }
            self.history.push_back(Entry { text: candidate.to_string(), at: now });
        }
        suppressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn near_identical_text_within_cooldown_is_suppressed() {
        let mut suppressor = DuplicateSuppressor::new(0.85, 4.0);
        assert!(!suppressor.check("hello world"));
        assert!(suppressor.check("hello world"));
    }

    #[test]
    fn distinct_text_is_never_suppressed() {
        let mut suppressor = DuplicateSuppressor::new(0.85, 4.0);
        assert!(!suppressor.check("hello world"));
        assert!(!suppressor.check("completely different sentence"));
    }

    #[test]
    fn expired_cooldown_allows_repeat() {
        let mut suppressor = DuplicateSuppressor::new(0.85, 0.01);
        assert!(!suppressor.check("hello world"));
        sleep(Duration::from_millis(30));
        assert!(!suppressor.check("hello world"));
    }
}
