//! Parses `<|TAG|>` tokens interleaved with content tokens (§4.9, C9).
//! Runs ahead of word accumulation in the decoder: a piece recognized here
//! is consumed and never reaches the detokenizer's word-merge step.

use shared_protocol::{AudioEvent, Emotion, ItnMarker, Language};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Language(Language),
    Emotion(Emotion),
    Event(AudioEvent),
    Itn(ItnMarker),
}

/// Strips the `<|...|>` wrapper a piece carries, if any.
fn tag_body(piece: &str) -> Option<&str> {
    piece.strip_prefix("<|").and_then(|s| s.strip_suffix("|>"))
}

pub fn parse_tag(piece: &str) -> Option<Tag> {
    let body = tag_body(piece)?;
    if let Some(lang) = Language::from_tag(body) {
        return Some(Tag::Language(lang));
    }
    if let Some(emotion) = Emotion::from_tag(body) {
        return Some(Tag::Emotion(emotion));
    }
    if let Some(event) = AudioEvent::from_tag(body) {
        return Some(Tag::Event(event));
    }
    if let Some(itn) = ItnMarker::from_tag(body) {
        return Some(Tag::Itn(itn));
    }
    None
}

/// Accumulates tag observations over one chunk's token stream. Language and
/// emotion are last-seen-wins; events accumulate into a set.
#[derive(Debug, Default, Clone)]
pub struct MetadataParser {
    pub language: Option<Language>,
    pub emotion: Option<Emotion>,
    pub audio_events: BTreeSet<AudioEvent>,
    pub has_itn: bool,
}

impl MetadataParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one decoded piece. Returns `true` if it was a recognized tag
    /// (the caller must not treat it as word content); unrecognized
    /// `<|...|>` wrappers are reported back as unknown so callers can keep
    /// them in `raw_text` (§4.9 "unknown tags are preserved... but otherwise
    /// ignored").
    pub fn observe(&mut self, piece: &str) -> bool {
        let Some(tag) = parse_tag(piece) else {
            return tag_body(piece).is_some();
        };
        match tag {
            Tag::Language(lang) => self.language = Some(lang),
            Tag::Emotion(emotion) => self.emotion = Some(emotion),
            Tag::Event(event) => {
                self.audio_events.insert(event);
            }
            Tag::Itn(marker) => self.has_itn = matches!(marker, ItnMarker::WithItn),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_language_tag_wins() {
        let mut parser = MetadataParser::new();
        assert!(parser.observe("<|en|>"));
        assert!(parser.observe("<|zh|>"));
        assert_eq!(parser.language, Some(Language::Chinese));
    }

    #[test]
    fn events_accumulate_into_a_set() {
        let mut parser = MetadataParser::new();
        parser.observe("<|BGM|>");
        parser.observe("<|Applause|>");
        parser.observe("<|BGM|>");
        assert_eq!(parser.audio_events.len(), 2);
    }

    #[test]
    fn unknown_tag_is_reported_but_not_stored() {
        let mut parser = MetadataParser::new();
        assert!(parser.observe("<|FUTURE_TAG|>"));
        assert!(parser.language.is_none());
    }

    #[test]
    fn plain_word_piece_is_not_a_tag() {
        let mut parser = MetadataParser::new();
        assert!(!parser.observe("hello"));
    }
}
