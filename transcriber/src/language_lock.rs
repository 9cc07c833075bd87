//! Warmup → Locked/Free state machine (§4.10, C12). Strictly forward-only
//! within a session, as is the Calibrator in the orchestrator (§4.15).

use shared_protocol::Language;
use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub enum LanguageLockState {
    Warmup { samples: HashMap<Language, u32>, total: u32 },
    Locked { language: Language },
    Free { language: Language },
}

pub struct LanguageLock {
    state: LanguageLockState,
    started_at: Instant,
    warmup_s: f64,
    min_samples: u32,
    confidence: f64,
    enabled: bool,
}

impl LanguageLock {
    /// `fixed_language` is `Some` when the user pinned `LANGUAGE=<lang>`;
    /// auto-lock is disabled and the state starts (and stays) `Free`.
    pub fn new(enabled: bool, warmup_s: f32, min_samples: u32, confidence: f32, fixed_language: Option<Language>) -> Self {
        let state = match fixed_language {
            Some(language) => LanguageLockState::Free { language },
            None => LanguageLockState::Warmup { samples: HashMap::new(), total: 0 },
        };
        Self {
            state,
            started_at: Instant::now(),
            warmup_s: warmup_s as f64,
            min_samples,
            confidence: confidence as f64,
            enabled,
        }
    }

    pub fn state(&self) -> &LanguageLockState {
        &self.state
    }

    /// The language feature-building should use right now, independent of
    /// the momentary per-chunk decode result (§4.10: "Locked is terminal...
    /// subsequent chunks use the locked language embedding").
    pub fn active_language(&self, momentary: Option<Language>) -> Option<Language> {
        match &self.state {
            LanguageLockState::Locked { language } | LanguageLockState::Free { language } => Some(*language),
            LanguageLockState::Warmup { .. } => momentary,
        }
    }

    /// Feeds one chunk's decoded language, if any. No-op once `Locked`/`Free`
    /// or when language-lock is disabled.
    pub fn observe(&mut self, language: Option<Language>) {
        if !self.enabled {
            return;
        }
        let LanguageLockState::Warmup { samples, total } = &mut self.state else {
            return;
        };
        if let Some(language) = language {
            *samples.entry(language).or_insert(0) += 1;
            *total += 1;
        }

        let elapsed_s = self.started_at.elapsed().as_secs_f64();
        if elapsed_s < self.warmup_s || *total < self.min_samples {
            return;
        }
        if let Some((&argmax, &count)) = samples.iter().max_by_key(|(_, &c)| c) {
            if count as f64 / *total as f64 >= self.confidence {
                self.state = LanguageLockState::Locked { language: argmax };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn fixed_language_starts_and_stays_free() {
        let mut lock = LanguageLock::new(true, 0.0, 1, 0.6, Some(Language::Japanese));
        lock.observe(Some(Language::English));
        assert_eq!(lock.state(), &LanguageLockState::Free { language: Language::Japanese });
        assert_eq!(lock.active_language(Some(Language::English)), Some(Language::Japanese));
    }

    #[test]
    fn locks_once_warmup_elapsed_and_confidence_met() {
        let mut lock = LanguageLock::new(true, 0.01, 3, 0.6, None);
        for lang in [Language::English, Language::English, Language::Chinese, Language::English] {
            lock.observe(Some(lang));
        }
        sleep(Duration::from_millis(20));
        lock.observe(Some(Language::English));
        assert_eq!(lock.state(), &LanguageLockState::Locked { language: Language::English });
    }

    #[test]
    fn insufficient_confidence_stays_in_warmup() {
        let mut lock = LanguageLock::new(true, 0.0, 2, 0.9, None);
        lock.observe(Some(Language::English));
        lock.observe(Some(Language::Chinese));
        assert!(matches!(lock.state(), LanguageLockState::Warmup { .. }));
    }

    #[test]
    fn locked_is_terminal_even_after_contrary_observations() {
        let mut lock = LanguageLock::new(true, 0.0, 1, 0.5, None);
        lock.observe(Some(Language::English));
        assert!(matches!(lock.state(), LanguageLockState::Locked { .. }));
        lock.observe(Some(Language::Chinese));
        assert_eq!(lock.state(), &LanguageLockState::Locked { language: Language::English });
        assert_eq!(lock.active_language(Some(Language::Chinese)), Some(Language::English));
    }
}
