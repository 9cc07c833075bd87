//! Exact-duplicate short-circuit over the last 10 chunk fingerprints (§4.5,
//! C5). Avoids wasted encoder calls when overlapping windows repeat an
//! identical resampled payload, e.g. long silence stretches that slipped
//! past VAD.

use std::collections::VecDeque;

const CACHE_SIZE: usize = 10;

pub struct ChunkFingerprinter {
    cache: VecDeque<[u8; 16]>,
}

impl Default for ChunkFingerprinter {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkFingerprinter {
    pub fn new() -> Self {
        Self { cache: VecDeque::with_capacity(CACHE_SIZE) }
    }

    /// Returns `true` if this fingerprint is new (forward the chunk),
    /// `false` on a cache hit (drop it).
    pub fn check(&mut self, fingerprint: [u8; 16]) -> bool {
        if self.cache.contains(&fingerprint) {
            return false;
        }
        if self.cache.len() == CACHE_SIZE {
            self.cache.pop_front();
        }
        self.cache.push_back(fingerprint);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_identical_chunk_is_suppressed() {
        let mut fp = ChunkFingerprinter::new();
        let digest = [7u8; 16];
        assert!(fp.check(digest));
        assert!(!fp.check(digest));
    }

    #[test]
    fn cache_evicts_oldest_after_ten() {
        let mut fp = ChunkFingerprinter::new();
        for i in 0..10u8 {
            assert!(fp.check([i; 16]));
        }
        // digest 0 has now scrolled out of the 10-entry window.
        assert!(fp.check([0u8; 16]));
    }
}
