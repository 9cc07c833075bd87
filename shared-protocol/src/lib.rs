use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Model sample rate, fixed by the encoder's training data (§3 Config.model_rate_hz).
pub const MODEL_RATE_HZ: u32 = 16_000;

/// Closed language enumeration parsed from `<|xx|>` tags (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    English,
    Chinese,
    Japanese,
    Korean,
    Cantonese,
}

impl Language {
    /// Parse a bare tag body such as `en`, `zh`, `yue` — not the full `<|..|>` wrapper.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "en" => Some(Self::English),
            "zh" => Some(Self::Chinese),
            "ja" => Some(Self::Japanese),
            "ko" => Some(Self::Korean),
            "yue" => Some(Self::Cantonese),
            _ => None,
        }
    }

    /// Env-var spelling used by `LANGUAGE=en|zh|ja|ko|yue|auto` (§6).
    pub fn from_env_value(value: &str) -> Option<Self> {
        Self::from_tag(value)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::English => "English",
            Self::Chinese => "Chinese",
            Self::Japanese => "Japanese",
            Self::Korean => "Korean",
            Self::Cantonese => "Cantonese",
        }
    }
}

/// Closed emotion enumeration parsed from `<|XXX|>` tags (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Emotion {
    Happy,
    Sad,
    Angry,
    Neutral,
    Fearful,
    Disgusted,
    Surprised,
}

impl Emotion {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "HAPPY" => Some(Self::Happy),
            "SAD" => Some(Self::Sad),
            "ANGRY" => Some(Self::Angry),
            "NEUTRAL" => Some(Self::Neutral),
            "FEARFUL" => Some(Self::Fearful),
            "DISGUSTED" => Some(Self::Disgusted),
            "SURPRISED" => Some(Self::Surprised),
            _ => None,
        }
    }

    /// Emoji used by the formatter when `SHOW_EMOTIONS=true` (§4.14).
    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Happy => "😀",
            Self::Sad => "😢",
            Self::Angry => "😠",
            Self::Neutral => "",
            Self::Fearful => "😨",
            Self::Disgusted => "🤢",
            Self::Surprised => "😲",
        }
    }
}

/// Closed audio-event enumeration parsed from `<|XXX|>` tags (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AudioEvent {
    Bgm,
    Applause,
    Laughter,
    Crying,
    Sneeze,
    Cough,
    Breath,
    Speech,
}

impl AudioEvent {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "BGM" => Some(Self::Bgm),
            "Applause" => Some(Self::Applause),
            "Laughter" => Some(Self::Laughter),
            "Crying" => Some(Self::Crying),
            "Sneeze" => Some(Self::Sneeze),
            "Cough" => Some(Self::Cough),
            "Breath" => Some(Self::Breath),
            "Speech" => Some(Self::Speech),
            _ => None,
        }
    }

    /// Canonical wire/config name, used for `FILTER_EVENTS` matching (§6).
    pub fn tag_name(&self) -> &'static str {
        match self {
            Self::Bgm => "BGM",
            Self::Applause => "Applause",
            Self::Laughter => "Laughter",
            Self::Crying => "Crying",
            Self::Sneeze => "Sneeze",
            Self::Cough => "Cough",
            Self::Breath => "Breath",
            Self::Speech => "Speech",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Bgm => "🎵",
            Self::Applause => "👏",
            Self::Laughter => "😄",
            Self::Crying => "😭",
            Self::Sneeze => "🤧",
            Self::Cough => "😷",
            Self::Breath => "",
            Self::Speech => "",
        }
    }
}

/// ITN marker tags (§4.9). Not a word of its own; just flips `has_itn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItnMarker {
    WithItn,
    WithoutItn,
}

impl ItnMarker {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "withitn" => Some(Self::WithItn),
            "woitn" => Some(Self::WithoutItn),
            _ => None,
        }
    }
}

/// Bucketed confidence shown in the broadcast record (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceBucket {
    High,
    Medium,
    Low,
}

impl ConfidenceBucket {
    pub fn from_score(avg_confidence: f32) -> Self {
        if avg_confidence >= 0.75 {
            Self::High
        } else if avg_confidence >= 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// The broadcast record format of §4.14 / §6, one JSON object per message frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionRecord {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<Emotion>,
    pub audio_events: BTreeSet<AudioEvent>,
    pub has_itn: bool,
    pub raw_text: String,
    pub confidence: ConfidenceBucket,
    pub timestamp: String,
    pub source: &'static str,
}

impl TranscriptionRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        text: String,
        raw_text: String,
        language: Option<Language>,
        emotion: Option<Emotion>,
        audio_events: BTreeSet<AudioEvent>,
        has_itn: bool,
        avg_confidence: f32,
        source: &'static str,
    ) -> Self {
        Self {
            kind: "transcription",
            text,
            language,
            emotion,
            audio_events,
            has_itn,
            raw_text,
            confidence: ConfidenceBucket::from_score(avg_confidence),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_tag_roundtrip() {
        assert_eq!(Language::from_tag("en"), Some(Language::English));
        assert_eq!(Language::from_tag("yue"), Some(Language::Cantonese));
        assert_eq!(Language::from_tag("xx"), None);
    }

    #[test]
    fn confidence_bucket_boundaries() {
        assert_eq!(ConfidenceBucket::from_score(0.75), ConfidenceBucket::High);
        assert_eq!(ConfidenceBucket::from_score(0.74), ConfidenceBucket::Medium);
        assert_eq!(ConfidenceBucket::from_score(0.5), ConfidenceBucket::Medium);
        assert_eq!(ConfidenceBucket::from_score(0.49), ConfidenceBucket::Low);
    }

    #[test]
    fn event_tag_name_matches_filter_config_spelling() {
        assert_eq!(AudioEvent::Bgm.tag_name(), "BGM");
        assert_eq!(AudioEvent::from_tag("BGM"), Some(AudioEvent::Bgm));
    }
}
