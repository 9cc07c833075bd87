//! Filters, composes display text, and hands off to the broadcast sink
//! (§4.14, C13). The sink contract is best-effort, non-blocking (§5: a
//! 250ms per-record send timeout; timed-out records are dropped).

use crate::config::Config;
use crate::decoder::DecodeResult;
use crate::errors::DropReason;
use shared_protocol::TranscriptionRecord;
use std::time::Duration;
use tracing::debug;

pub const SINK_SEND_TIMEOUT: Duration = Duration::from_millis(250);

/// Best-effort, non-blocking per §5: `broadcast` never awaits the caller's
/// stage; it hands the record to the transport on its own task and a
/// 250ms timeout drops it rather than stalling the pipeline.
pub trait Sink: Send + Sync {
    fn broadcast(&self, record: TranscriptionRecord);
}

/// A sink that forwards records as JSON text over a channel to whatever
/// transport owns it (e.g. a websocket fan-out task, out of scope per §1).
pub struct ChannelSink {
    tx: tokio::sync::mpsc::Sender<String>,
}

impl ChannelSink {
    pub fn new(tx: tokio::sync::mpsc::Sender<String>) -> Self {
        Self { tx }
    }
}

impl Sink for ChannelSink {
    fn broadcast(&self, record: TranscriptionRecord) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let payload = match serde_json::to_string(&record) {
                Ok(json) => json,
                Err(e) => {
                    debug!(error = %e, "failed to serialize transcription record");
                    return;
                }
            };
            match tokio::time::timeout(SINK_SEND_TIMEOUT, tx.send(payload)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "broadcast sink channel closed"),
                Err(_) => debug!("broadcast sink send timed out, dropping record"),
            }
        });
    }
}

pub struct Formatter {
    config_show_emotions: bool,
    config_show_events: bool,
    config_show_language: bool,
    filter_bgm: bool,
    filter_events: std::collections::HashSet<shared_protocol::AudioEvent>,
    min_chars: usize,
}

impl Formatter {
    pub fn new(config: &Config) -> Self {
        Self {
            config_show_emotions: config.show_emotions,
            config_show_events: config.show_events,
            config_show_language: config.show_language,
            filter_bgm: config.filter_bgm,
            filter_events: config.filter_events.clone(),
            min_chars: config.min_chars,
        }
    }

    /// Returns the filter reason when the chunk should be dropped, else the
    /// composed display string and the broadcast record.
    pub fn format(&self, result: &DecodeResult) -> Result<(String, TranscriptionRecord), DropReason> {
        if self.filter_bgm && result.audio_events.contains(&shared_protocol::AudioEvent::Bgm) {
            return Err(DropReason::FilteredBgm);
        }
        if result.audio_events.iter().any(|e| self.filter_events.contains(e)) {
            return Err(DropReason::FilteredEvent);
        }
        let alnum_count = result.text.chars().filter(|c| c.is_alphanumeric()).count();
        if alnum_count < self.min_chars {
            return Err(DropReason::BelowMinChars);
        }

        let mut prefix = String::new();
        if self.config_show_emotions {
            if let Some(emotion) = result.emotion {
                let emoji = emotion.emoji();
                if !emoji.is_empty() {
                    prefix.push_str(emoji);
                    prefix.push(' ');
                }
            }
        }
        if self.config_show_events {
            for event in &result.audio_events {
                let emoji = event.emoji();
                if !emoji.is_empty() {
                    prefix.push_str(emoji);
                    prefix.push(' ');
                }
            }
        }

        let mut display = format!("{prefix}{}", result.text);
        if self.config_show_language {
            if let Some(language) = result.language {
                display.push_str(&format!(" [{}]", language.display_name()));
            }
        }

        let record = TranscriptionRecord::new(
            result.text.clone(),
            result.raw_text.clone(),
            result.language,
            result.emotion,
            result.audio_events.clone(),
            result.has_itn,
            result.avg_confidence,
            "transcriber",
        );
        Ok((display, record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_protocol::{AudioEvent, Language};
    use std::collections::BTreeSet;

    fn base_config() -> Config {
        unsafe { std::env::set_var("MODEL_PATH", "/tmp/m.onnx") };
        Config::from_env().unwrap()
    }

    fn result_with_text(text: &str) -> DecodeResult {
        DecodeResult { text: text.to_string(), raw_text: text.to_string(), avg_confidence: 0.9, ..Default::default() }
    }

    #[test]
    fn below_min_chars_is_filtered() {
        let formatter = Formatter::new(&base_config());
        assert_eq!(formatter.format(&result_with_text("hi")).unwrap_err(), DropReason::BelowMinChars);
    }

    #[test]
    fn bgm_event_is_filtered_when_enabled() {
        let mut config = base_config();
        config.filter_bgm = true;
        let formatter = Formatter::new(&config);
        let mut result = result_with_text("music plays here");
        result.audio_events = BTreeSet::from([AudioEvent::Bgm]);
        assert_eq!(formatter.format(&result).unwrap_err(), DropReason::FilteredBgm);
    }

    #[test]
    fn language_suffix_appended_when_shown() {
        let formatter = Formatter::new(&base_config());
        let mut result = result_with_text("hello world");
        result.language = Some(Language::English);
        let (display, record) = formatter.format(&result).unwrap();
        assert!(display.ends_with("[English]"));
        assert_eq!(record.text, "hello world");
    }
}
