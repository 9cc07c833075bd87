//! Error taxonomy (§7). Each fatal category carries the exit code from the
//! CLI surface table (§6); `main` maps the top-level result to
//! `std::process::exit`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("environment error: {0}")]
    Environment(String),

    #[error("model load error: {0}")]
    Load(String),

    #[error("capture error: {0}")]
    Capture(String),
}

impl PipelineError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 2,
            Self::Environment(_) => 3,
            Self::Load(_) => 4,
            Self::Capture(_) => 5,
        }
    }
}

/// Transient per-chunk failure (§7 item 4). Never fatal on its own; the
/// Orchestrator escalates based on consecutive/rate thresholds (§4.15).
#[derive(Debug, Error, Clone)]
pub enum ChunkError {
    #[error("inference error: {0}")]
    Infer(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("metadata parse error: {0}")]
    Parser(String),
}

/// Per-chunk processing outcome (§9 "exceptions for control flow" note).
/// Only `Error` increments the transient-failure counters.
#[derive(Debug, Clone)]
pub enum ChunkOutcome {
    Dropped { reason: DropReason },
    Emitted { words: usize },
    Error { kind: ChunkError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NonSpeech,
    DuplicateFingerprint,
    Calibrating,
    NoWordsDecoded,
    BelowMinChars,
    FilteredEvent,
    FilteredBgm,
    SuppressedDuplicate,
}
