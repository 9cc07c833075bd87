//! CLI entry point (§6). Subcommands: `transcribe` (default), `selftest`,
//! `download-models`. Exit codes follow `PipelineError::exit_code()`.

mod config;
mod decoder;
mod duplicate;
mod encoder;
mod errors;
mod features;
mod formatter;
mod language_lock;
mod metadata;
mod orchestrator;
mod stitcher;
mod timeline;

use clap::{Parser, Subcommand};
use config::Config;
use decoder::{CTCDecoder, Detokenizer};
use encoder::{EncoderClient, MockEncoderClient, OrtEncoderClient};
use errors::PipelineError;
use features::TaskEmbeddings;
use formatter::{ChannelSink, Sink};
use orchestrator::Orchestrator;
use shared_audio::CpalAudioSource;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "transcriber", about = "Streaming speech-to-text transcription pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the live transcription pipeline (default).
    Transcribe,
    /// Validate configuration and exercise the pipeline with a mock encoder.
    Selftest,
    /// Placeholder for model acquisition; out of scope for this pipeline (§1).
    DownloadModels,
}

fn init_logging(level: config::LogLevel) {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Reads a newline-delimited vocabulary file next to the model, one piece
/// per line; the line number is the token id. Convention: id 0 is blank.
/// The tokenizer/vocabulary format itself is out of scope (§1) — this is
/// the minimal loader needed to drive the detokenizer interface.
fn load_vocab(model_path: &Path) -> Vec<String> {
    let vocab_path = model_path.with_extension("vocab");
    match std::fs::read_to_string(&vocab_path) {
        Ok(contents) => contents.lines().map(str::to_string).collect(),
        Err(_) => {
            tracing::warn!(path = %vocab_path.display(), "no vocab file found, using empty vocabulary");
            vec![String::new()]
        }
    }
}

async fn run_transcribe(config: Config) -> Result<(), PipelineError> {
    let pieces = load_vocab(&config.model_path);
    let source = CpalAudioSource::new(config.audio_device.clone());
    let encoder = OrtEncoderClient::default();

    let (tx, mut rx) = tokio::sync::mpsc::channel::<String>(100);
    tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            tracing::debug!(%payload, "broadcast payload (sink transport out of scope)");
        }
    });
    let sink: Arc<dyn Sink> = Arc::new(ChannelSink::new(tx));

    let orchestrator = Orchestrator::new(config);
    orchestrator.run(source, encoder, pieces, 0, sink).await
}

fn run_selftest(config: Config) -> Result<(), PipelineError> {
    tracing::info!("configuration valid");

    let embeddings = TaskEmbeddings::placeholder(features::MEL_BINS);
    let feature_builder = features::FeatureBuilder::new(embeddings.clone(), config.model_rate_hz);
    let samples = vec![0.1f32; (config.chunk_duration_s * config.model_rate_hz as f32) as usize];
    let input = feature_builder.build(&samples, shared_protocol::Language::English, config.use_itn);
    tracing::info!(shape = ?input.shape(), "feature builder OK");

    struct FixedVocab;
    impl Detokenizer for FixedVocab {
        fn piece(&self, token_id: usize) -> &str {
            match token_id {
                0 => "",
                1 => "\u{2581}hello",
                2 => "\u{2581}world",
                _ => "?",
            }
        }
        fn blank_id(&self) -> usize {
            0
        }
    }

    let mut mock = MockEncoderClient { vocab_size: 8, fixed_ids: vec![1, 1, 2, 2] };
    mock.load(&config.model_path).ok();
    let t_task = embeddings.task_rows(config.use_itn);
    let output = mock.infer(&input, t_task).map_err(|e| PipelineError::Load(e.to_string()))?;
    let acoustic = output.logits.slice(ndarray::s![0, .., output.t_task..]);
    let decoder = CTCDecoder::new();
    let chunk_ms = (config.chunk_duration_s * 1000.0) as f64;
    let result = decoder.decode(acoustic, chunk_ms, &FixedVocab);
    tracing::info!(text = %result.text, "decoder OK");

    println!("selftest OK: text='{}'", result.text);
    Ok(())
}

fn run_download_models() -> Result<(), PipelineError> {
    println!("download-models is not implemented: model acquisition is out of scope for this binary.");
    println!("Place a compatible ONNX encoder at MODEL_PATH and a matching <model>.vocab file beside it.");
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Transcribe);

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(e.exit_code());
        }
    };
    init_logging(config.log_level);

    let result = match command {
        Command::DownloadModels => run_download_models(),
        Command::Selftest => run_selftest(config),
        Command::Transcribe => {
            let runtime = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    eprintln!("failed to start async runtime: {e}");
                    std::process::exit(3);
                }
            };
            runtime.block_on(run_transcribe(config))
        }
    };

    if let Err(e) = result {
        eprintln!("fatal: {e}");
        std::process::exit(e.exit_code());
    }
}
