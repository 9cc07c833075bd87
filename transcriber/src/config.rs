//! Flat immutable configuration, built once at startup from the
//! environment (§6, §9 "dynamic dict-based config → typed config record").
//! Invalid values fail fast into `PipelineError::Configuration` (exit 2).

use crate::errors::PipelineError;
use shared_protocol::{AudioEvent, Language};
use shared_vad::VadMode;
use std::collections::HashSet;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageSetting {
    Auto,
    Fixed(Language),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub model_path: PathBuf,
    pub language: LanguageSetting,
    pub use_itn: bool,
    pub chunk_duration_s: f32,
    pub overlap_duration_s: f32,
    pub model_rate_hz: u32,
    pub audio_device: Option<String>,
    pub log_level: LogLevel,

    pub enable_vad: bool,
    pub vad_mode: VadMode,
    pub vad_zcr_min: f32,
    pub vad_zcr_max: f32,
    pub vad_entropy_max: f32,
    pub rms_margin: f32,
    pub noise_calib_secs: f32,
    pub adaptive_noise_floor: bool,

    pub similarity_threshold: f32,
    pub duplicate_cooldown_s: f32,
    pub min_chars: usize,

    pub enable_confidence_stitching: bool,
    pub confidence_threshold: f32,
    pub overlap_word_count: usize,

    pub enable_timeline_merging: bool,
    pub timeline_min_word_confidence: f32,
    pub timeline_overlap_confidence: f32,
    pub timeline_confidence_replacement: bool,

    pub enable_language_lock: bool,
    pub language_lock_warmup_s: f32,
    pub language_lock_min_samples: u32,
    pub language_lock_confidence: f32,

    pub filter_bgm: bool,
    pub filter_events: HashSet<AudioEvent>,
    pub show_emotions: bool,
    pub show_events: bool,
    pub show_language: bool,
}

impl Config {
    pub fn hop_ms(&self) -> f64 {
        ((self.chunk_duration_s - self.overlap_duration_s) as f64) * 1000.0
    }

    pub fn from_env() -> Result<Self, PipelineError> {
        let model_path = require_env("MODEL_PATH")?;

        let language = match env_str("LANGUAGE", "auto").as_str() {
            "auto" => LanguageSetting::Auto,
            other => LanguageSetting::Fixed(Language::from_env_value(other).ok_or_else(|| {
                PipelineError::Configuration(format!("unknown LANGUAGE value '{other}'"))
            })?),
        };

        let log_level = match env_str("LOG_LEVEL", "INFO").to_uppercase().as_str() {
            "ERROR" => LogLevel::Error,
            "WARN" => LogLevel::Warn,
            "INFO" => LogLevel::Info,
            "DEBUG" => LogLevel::Debug,
            "TRACE" => LogLevel::Trace,
            other => {
                return Err(PipelineError::Configuration(format!("unknown LOG_LEVEL '{other}'")));
            }
        };

        let vad_mode = match env_str("VAD_MODE", "accurate").as_str() {
            "fast" => VadMode::Fast,
            "accurate" => VadMode::Accurate,
            other => {
                return Err(PipelineError::Configuration(format!("unknown VAD_MODE '{other}'")));
            }
        };

        let chunk_duration_s = env_f32("CHUNK_DURATION", 3.0)?;
        let overlap_duration_s = env_f32("OVERLAP_DURATION", 1.5)?;
        if overlap_duration_s < 0.0 || chunk_duration_s <= overlap_duration_s {
            return Err(PipelineError::Configuration(format!(
                "CHUNK_DURATION ({chunk_duration_s}) must exceed OVERLAP_DURATION ({overlap_duration_s})"
            )));
        }

        let min_chars = env_usize("MIN_CHARS", 3)?;
        let overlap_word_count = env_usize("OVERLAP_WORD_COUNT", 4)?;
        let language_lock_min_samples = env_u32("LANGUAGE_LOCK_MIN_SAMPLES", 3)?;

        let filter_events = env_str("FILTER_EVENTS", "")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                AudioEvent::from_tag(s)
                    .ok_or_else(|| PipelineError::Configuration(format!("unknown FILTER_EVENTS tag '{s}'")))
            })
            .collect::<Result<HashSet<_>, _>>()?;

        let config = Self {
            model_path: PathBuf::from(model_path),
            language,
            use_itn: env_bool("USE_ITN", true)?,
            chunk_duration_s,
            overlap_duration_s,
            model_rate_hz: shared_protocol::MODEL_RATE_HZ,
            audio_device: std::env::var("AUDIO_DEVICE").ok(),
            log_level,

            enable_vad: env_bool("ENABLE_VAD", true)?,
            vad_mode,
            vad_zcr_min: env_f32("VAD_ZCR_MIN", 0.02)?,
            vad_zcr_max: env_f32("VAD_ZCR_MAX", 0.35)?,
            vad_entropy_max: env_f32("VAD_ENTROPY_MAX", 0.85)?,
            rms_margin: env_f32("RMS_MARGIN", 0.004)?,
            noise_calib_secs: env_f32("NOISE_CALIB_SECS", 1.5)?,
            adaptive_noise_floor: env_bool("ADAPTIVE_NOISE_FLOOR", true)?,

            similarity_threshold: env_f32("SIMILARITY_THRESHOLD", 0.85)?,
            duplicate_cooldown_s: env_f32("DUPLICATE_COOLDOWN_S", 4.0)?,
            min_chars,

            enable_confidence_stitching: env_bool("ENABLE_CONFIDENCE_STITCHING", true)?,
            confidence_threshold: env_f32("CONFIDENCE_THRESHOLD", 0.6)?,
            overlap_word_count,

            enable_timeline_merging: env_bool("ENABLE_TIMELINE_MERGING", true)?,
            timeline_min_word_confidence: env_f32("TIMELINE_MIN_WORD_CONFIDENCE", 0.4)?,
            timeline_overlap_confidence: env_f32("TIMELINE_OVERLAP_CONFIDENCE", 0.6)?,
            timeline_confidence_replacement: env_bool("TIMELINE_CONFIDENCE_REPLACEMENT", true)?,

            enable_language_lock: env_bool("ENABLE_LANGUAGE_LOCK", true)?,
            language_lock_warmup_s: env_f32("LANGUAGE_LOCK_WARMUP_S", 10.0)?,
            language_lock_min_samples,
            language_lock_confidence: env_f32("LANGUAGE_LOCK_CONFIDENCE", 0.6)?,

            filter_bgm: env_bool("FILTER_BGM", false)?,
            filter_events,
            show_emotions: env_bool("SHOW_EMOTIONS", false)?,
            show_events: env_bool("SHOW_EVENTS", true)?,
            show_language: env_bool("SHOW_LANGUAGE", true)?,
        };

        config.validate_ranges()?;
        Ok(config)
    }

    fn validate_ranges(&self) -> Result<(), PipelineError> {
        for (name, value) in [
            ("SIMILARITY_THRESHOLD", self.similarity_threshold),
            ("CONFIDENCE_THRESHOLD", self.confidence_threshold),
            ("VAD_ENTROPY_MAX", self.vad_entropy_max),
            ("TIMELINE_MIN_WORD_CONFIDENCE", self.timeline_min_word_confidence),
            ("TIMELINE_OVERLAP_CONFIDENCE", self.timeline_overlap_confidence),
            ("LANGUAGE_LOCK_CONFIDENCE", self.language_lock_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PipelineError::Configuration(format!("{name} must be in [0,1], got {value}")));
            }
        }
        if self.vad_zcr_min > self.vad_zcr_max {
            return Err(PipelineError::Configuration("VAD_ZCR_MIN must be <= VAD_ZCR_MAX".into()));
        }
        Ok(())
    }
}

fn require_env(name: &str) -> Result<String, PipelineError> {
    std::env::var(name).map_err(|_| PipelineError::Configuration(format!("{name} is required")))
}

fn env_str(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_bool(name: &str, default: bool) -> Result<bool, PipelineError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(v) => match v.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            other => Err(PipelineError::Configuration(format!("{name}: invalid bool '{other}'"))),
        },
    }
}

fn env_f32(name: &str, default: f32) -> Result<f32, PipelineError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(v) => v.parse().map_err(|_| PipelineError::Configuration(format!("{name}: invalid float '{v}'"))),
    }
}

fn env_usize(name: &str, default: usize) -> Result<usize, PipelineError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(v) => v.parse().map_err(|_| PipelineError::Configuration(format!("{name}: invalid integer '{v}'"))),
    }
}

fn env_u32(name: &str, default: u32) -> Result<u32, PipelineError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(v) => v.parse().map_err(|_| PipelineError::Configuration(format!("{name}: invalid integer '{v}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for key in [
            "MODEL_PATH", "LANGUAGE", "CHUNK_DURATION", "OVERLAP_DURATION", "VAD_MODE",
            "SIMILARITY_THRESHOLD", "FILTER_EVENTS",
        ] {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn missing_model_path_is_a_configuration_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        let err = Config::from_env().unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn chunk_not_greater_than_overlap_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        unsafe {
            std::env::set_var("MODEL_PATH", "/tmp/model.onnx");
            std::env::set_var("CHUNK_DURATION", "1.0");
            std::env::set_var("OVERLAP_DURATION", "1.5");
        }
        let err = Config::from_env().unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn valid_defaults_parse() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        unsafe { std::env::set_var("MODEL_PATH", "/tmp/model.onnx") };
        let config = Config::from_env().expect("defaults should be valid");
        assert_eq!(config.language, LanguageSetting::Auto);
        assert_eq!(config.min_chars, 3);
    }
}
