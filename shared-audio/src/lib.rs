//! Microphone capture, resampling to model rate, and exact-duplicate
//! chunk fingerprinting (spec §4.1, §4.2, §4.5 — components C1/C2/C5).

pub mod fingerprint;
pub mod resampler;
pub mod source;

pub use fingerprint::ChunkFingerprinter;
pub use resampler::{AudioChunk, Resampler, ResamplerConfig};
pub use source::{AudioSource, AudioSourceError, CpalAudioSource, DeviceRate, RawFrame};
