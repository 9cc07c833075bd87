//! Wires C1–C13, owns the session lifecycle, and enforces back-pressure and
//! fatal-error escalation (§4.15, C14). Channel boundaries follow the
//! stage-to-task mapping of §5 (T1 capture, T2 chunker/resampler, T3
//! inference, T4 broadcast sink).

use crate::config::Config;
use crate::decoder::{CTCDecoder, Detokenizer};
use crate::duplicate::DuplicateSuppressor;
use crate::encoder::EncoderClient;
use crate::errors::{ChunkError, ChunkOutcome, DropReason, PipelineError};
use crate::features::{FeatureBuilder, TaskEmbeddings};
use crate::formatter::{Formatter, Sink};
use crate::language_lock::LanguageLock;
use crate::stitcher::ConfidenceStitcher;
use crate::timeline::TimelineMerger;
use shared_audio::{AudioChunk, AudioSource, ChunkFingerprinter, Resampler, ResamplerConfig};
use shared_vad::{NoiseFloorCalibrator, VadConfig, VoiceActivityDetector};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const CONSECUTIVE_ERROR_LIMIT: u32 = 10;
const ERROR_RATE_WINDOW_S: f64 = 60.0;
const ERROR_RATE_LIMIT: f64 = 0.25;
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(2);

#[derive(Default)]
pub struct Telemetry {
    pub chunks_processed: AtomicU32,
    pub chunks_dropped: AtomicU32,
    pub chunks_emitted: AtomicU32,
    pub filtered_by_event: AtomicU32,
    pub filtered_by_bgm: AtomicU32,
}

struct ErrorWindow {
    consecutive: u32,
    recent: Vec<Instant>,
    window_total: u32,
}

impl ErrorWindow {
    fn new() -> Self {
        Self { consecutive: 0, recent: Vec::new(), window_total: 0 }
    }

    fn record_success(&mut self) {
        self.consecutive = 0;
        self.window_total += 1;
    }

    /// Returns `true` if the session should abort per §4.15: 10 consecutive
    /// failures, or an error rate above 25% over the trailing 60s.
    fn record_error(&mut self) -> bool {
        self.consecutive += 1;
        self.window_total += 1;
        let now = Instant::now();
        self.recent.push(now);
        self.recent.retain(|&t| now.duration_since(t).as_secs_f64() <= ERROR_RATE_WINDOW_S);
        let rate = self.recent.len() as f64 / self.window_total.max(1) as f64;
        self.consecutive >= CONSECUTIVE_ERROR_LIMIT || (self.window_total >= 4 && rate > ERROR_RATE_LIMIT)
    }
}

struct FixedDetokenizer {
    pieces: Vec<String>,
    blank_id: usize,
}

impl Detokenizer for FixedDetokenizer {
    fn piece(&self, token_id: usize) -> &str {
        self.pieces.get(token_id).map(String::as_str).unwrap_or("")
    }
    fn blank_id(&self) -> usize {
        self.blank_id
    }
}

pub struct Orchestrator {
    config: Config,
    telemetry: Arc<Telemetry>,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        Self { config, telemetry: Arc::new(Telemetry::default()) }
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        Arc::clone(&self.telemetry)
    }

    /// Runs the full session to completion (or until a fatal error / shutdown
    /// signal). `encoder`/`detokenizer_pieces`/`sink` are injected so tests
    /// and `selftest` can swap in mocks without touching the wiring below.
    pub async fn run(
        &self,
        mut source: impl AudioSource + 'static,
        mut encoder: impl EncoderClient + 'static,
        detokenizer_pieces: Vec<String>,
        blank_id: usize,
        sink: Arc<dyn Sink>,
    ) -> Result<(), PipelineError> {
        encoder
            .load(&self.config.model_path)
            .map_err(|e| PipelineError::Load(e.to_string()))?;

        let raw_rx = source.start().map_err(|e| PipelineError::Environment(e.to_string()))?;
        let device_rate = source.chosen_rate().ok_or_else(|| PipelineError::Environment("no device rate".into()))?;

        let (chunk_tx, mut chunk_rx) = mpsc::channel::<AudioChunk>(4);
        let resampler_cfg = ResamplerConfig {
            model_rate_hz: self.config.model_rate_hz,
            chunk_duration_s: self.config.chunk_duration_s,
            overlap_duration_s: self.config.overlap_duration_s,
        };
        let resampler_task = tokio::spawn(run_resampler(raw_rx, resampler_cfg, device_rate.sample_rate, chunk_tx));

        let detokenizer = FixedDetokenizer { pieces: detokenizer_pieces, blank_id };
        let embeddings = TaskEmbeddings::placeholder(crate::features::MEL_BINS);
        let feature_builder = FeatureBuilder::new(embeddings.clone(), self.config.model_rate_hz);
        let t_task_no_itn = embeddings.task_rows(false);
        let t_task_with_itn = embeddings.task_rows(true);

        let mut noise_floor = NoiseFloorCalibrator::new(self.config.model_rate_hz, self.config.noise_calib_secs);
        let vad = VoiceActivityDetector::new(VadConfig {
            enabled: self.config.enable_vad,
            mode: self.config.vad_mode,
            zcr_min: self.config.vad_zcr_min,
            zcr_max: self.config.vad_zcr_max,
            entropy_max: self.config.vad_entropy_max,
            rms_margin: self.config.rms_margin,
        });
        let mut fingerprinter = ChunkFingerprinter::new();
        let decoder = CTCDecoder::new();
        let mut stitcher = ConfidenceStitcher::new(self.config.overlap_word_count, self.config.confidence_threshold);
        let mut timeline = TimelineMerger::new(
            self.config.timeline_min_word_confidence,
            self.config.timeline_overlap_confidence,
            self.config.timeline_confidence_replacement,
        );
        let mut duplicate_guard = DuplicateSuppressor::new(self.config.similarity_threshold, self.config.duplicate_cooldown_s);
        let fixed_language = match self.config.language {
            crate::config::LanguageSetting::Fixed(l) => Some(l),
            crate::config::LanguageSetting::Auto => None,
        };
        let mut language_lock = LanguageLock::new(
            self.config.enable_language_lock,
            self.config.language_lock_warmup_s,
            self.config.language_lock_min_samples,
            self.config.language_lock_confidence,
            fixed_language,
        );
        let formatter = Formatter::new(&self.config);

        let mut error_window = ErrorWindow::new();

        loop {
            let Some(chunk) = chunk_rx.recv().await else {
                info!("audio pipeline closed, ending session");
                break;
            };

            let outcome = self.process_chunk(
                &chunk,
                &mut noise_floor,
                &vad,
                &mut fingerprinter,
                &feature_builder,
                &mut encoder,
                &decoder,
                &detokenizer,
                &mut stitcher,
                &mut timeline,
                &mut duplicate_guard,
                &mut language_lock,
                &formatter,
                &sink,
                t_task_no_itn,
                t_task_with_itn,
            );

            self.telemetry.chunks_processed.fetch_add(1, Ordering::Relaxed);
            match outcome {
                ChunkOutcome::Dropped { reason } => {
                    self.telemetry.chunks_dropped.fetch_add(1, Ordering::Relaxed);
                    match reason {
                        DropReason::FilteredEvent => {
                            self.telemetry.filtered_by_event.fetch_add(1, Ordering::Relaxed);
                        }
                        DropReason::FilteredBgm => {
                            self.telemetry.filtered_by_bgm.fetch_add(1, Ordering::Relaxed);
                        }
                        _ => {}
                    }
                    debug!(?reason, "chunk dropped");
                    error_window.record_success();
                }
                ChunkOutcome::Emitted { words } => {
                    self.telemetry.chunks_emitted.fetch_add(1, Ordering::Relaxed);
                    debug!(words, "chunk emitted");
                    error_window.record_success();
                }
                ChunkOutcome::Error { kind } => {
                    warn!(error = %kind, "transient chunk error");
                    if error_window.record_error() {
                        error!("too many transient failures, aborting session");
                        resampler_task.abort();
                        source.stop();
                        return Err(PipelineError::Capture("too many consecutive/frequent chunk errors".into()));
                    }
                }
            }
        }

        resampler_task.abort();
        source.stop();
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn process_chunk(
        &self,
        chunk: &AudioChunk,
        noise_floor: &mut NoiseFloorCalibrator,
        vad: &VoiceActivityDetector,
        fingerprinter: &mut ChunkFingerprinter,
        feature_builder: &FeatureBuilder,
        encoder: &mut dyn EncoderClient,
        decoder: &CTCDecoder,
        detokenizer: &dyn Detokenizer,
        stitcher: &mut ConfidenceStitcher,
        timeline: &mut TimelineMerger,
        duplicate_guard: &mut DuplicateSuppressor,
        language_lock: &mut LanguageLock,
        formatter: &Formatter,
        sink: &Arc<dyn Sink>,
        t_task_no_itn: usize,
        t_task_with_itn: usize,
    ) -> ChunkOutcome {
        if !noise_floor.snapshot().calibrated {
            noise_floor.feed_bootstrap(&chunk.samples);
            return ChunkOutcome::Dropped { reason: DropReason::Calibrating };
        }

        let floor = noise_floor.snapshot();
        let decision = vad.decide(&chunk.samples, floor.value);
        noise_floor.observe(decision.features.rms, decision.is_speech);
        if !decision.is_speech {
            return ChunkOutcome::Dropped { reason: DropReason::NonSpeech };
        }

        if !fingerprinter.check(chunk.fingerprint) {
            return ChunkOutcome::Dropped { reason: DropReason::DuplicateFingerprint };
        }

        let active_language = language_lock.active_language(None).unwrap_or(shared_protocol::Language::English);
        let t_task = if self.config.use_itn { t_task_with_itn } else { t_task_no_itn };
        let input = feature_builder.build(&chunk.samples, active_language, self.config.use_itn);

        let output = match encoder.infer(&input, t_task) {
            Ok(o) => o,
            Err(e) => return ChunkOutcome::Error { kind: ChunkError::Infer(e.to_string()) },
        };

        let total_t = output.logits.shape()[2];
        if output.t_task >= total_t {
            return ChunkOutcome::Error { kind: ChunkError::Decode("t_task exceeds total frames".into()) };
        }
        let acoustic = output.logits.slice(ndarray::s![0, .., output.t_task..]);

        let chunk_duration_ms = (self.config.chunk_duration_s * 1000.0) as f64;
        let mut result = decoder.decode(acoustic, chunk_duration_ms, detokenizer);
        language_lock.observe(result.language);

        if result.words.is_empty() {
            return ChunkOutcome::Dropped { reason: DropReason::NoWordsDecoded };
        }

        stitcher.stitch(&mut result);
        if result.words.is_empty() {
            return ChunkOutcome::Dropped { reason: DropReason::NoWordsDecoded };
        }

        let new_words = timeline.merge(chunk.start_time_ms, &result.words);
        if new_words.is_empty() {
            return ChunkOutcome::Dropped { reason: DropReason::NoWordsDecoded };
        }

        let mut emitted_result = result.clone();
        emitted_result.words = new_words.clone();
        emitted_result.text = new_words.iter().map(|w| w.text.as_str()).collect::<Vec<_>>().join(" ");

        let (display, record) = match formatter.format(&emitted_result) {
            Ok(pair) => pair,
            Err(reason) => return ChunkOutcome::Dropped { reason },
        };

        if duplicate_guard.check(&emitted_result.text) {
            return ChunkOutcome::Dropped { reason: DropReason::SuppressedDuplicate };
        }

        info!(%display, "transcription");
        sink.broadcast(record);
        ChunkOutcome::Emitted { words: new_words.len() }
    }
}

async fn run_resampler(
    mut raw_rx: mpsc::Receiver<shared_audio::RawFrame>,
    config: ResamplerConfig,
    device_rate_hz: u32,
    chunk_tx: mpsc::Sender<AudioChunk>,
) {
    let mut resampler = Resampler::new(config, device_rate_hz);
    while let Some(frame) = raw_rx.recv().await {
        for chunk in resampler.push_frame(&frame) {
            if chunk_tx.send(chunk).await.is_err() {
                return;
            }
        }
    }
}

pub async fn shutdown_drain(mut chunk_rx: mpsc::Receiver<AudioChunk>) {
    let _ = tokio::time::timeout(SHUTDOWN_DRAIN, async {
        while chunk_rx.recv().await.is_some() {}
    })
    .await;
}
