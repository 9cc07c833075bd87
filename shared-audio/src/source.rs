//! Device selection and capture (§4.1, C1). Bridges cpal's realtime
//! callback to a bounded tokio channel once, at the capture boundary, per
//! the "coroutine-style capture callback" design note (§9): nothing
//! downstream ever touches cpal directly.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Sample rates probed on the device, in preference order (§4.1).
const PREFERRED_RATES: [u32; 6] = [16_000, 48_000, 44_100, 32_000, 22_050, 8_000];

#[derive(Debug, Error)]
pub enum AudioSourceError {
    #[error("no input device matched preference list or default device is unavailable")]
    DeviceNotFound,
    #[error("device does not support any rate in the probe set {0:?}")]
    UnsupportedRate(Vec<u32>),
    #[error("capture failed: {0}")]
    CaptureFailure(String),
}

#[derive(Debug, Clone, Copy)]
pub struct DeviceRate {
    pub sample_rate: u32,
    pub channels: u16,
}

/// One raw frame of mono f32 PCM at device rate, handed to the Resampler.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

pub trait AudioSource: Send {
    fn start(&mut self) -> Result<mpsc::Receiver<RawFrame>, AudioSourceError>;
    fn stop(&mut self);
    fn chosen_rate(&self) -> Option<DeviceRate>;
}

/// cpal-backed microphone source. Selects a device by substring match over
/// a preference list, then probes `PREFERRED_RATES` against the device's
/// supported configs.
pub struct CpalAudioSource {
    device_preference: Option<String>,
    stream: Option<cpal::Stream>,
    running: Arc<AtomicBool>,
    chosen: Option<DeviceRate>,
}

impl CpalAudioSource {
    pub fn new(device_preference: Option<String>) -> Self {
        Self {
            device_preference,
            stream: None,
            running: Arc::new(AtomicBool::new(false)),
            chosen: None,
        }
    }

    fn select_device(&self) -> Result<cpal::Device, AudioSourceError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| AudioSourceError::CaptureFailure(e.to_string()))?;

        if let Some(ref pref) = self.device_preference {
            for device in devices {
                if let Ok(name) = device.name() {
                    if name.to_lowercase().contains(&pref.to_lowercase()) {
                        info!(device = %name, "matched preferred input device");
                        return Ok(device);
                    }
                }
            }
            warn!(preference = %pref, "no device matched preference, falling back to default");
        }

        host.default_input_device().ok_or(AudioSourceError::DeviceNotFound)
    }

    fn probe_rate(device: &cpal::Device) -> Result<(cpal::SupportedStreamConfig, u32), AudioSourceError> {
        let supported: Vec<cpal::SupportedStreamConfigRange> = device
            .supported_input_configs()
            .map_err(|e| AudioSourceError::CaptureFailure(e.to_string()))?
            .collect();

        for &rate in &PREFERRED_RATES {
            if let Some(range) = supported.iter().find(|r| {
                r.min_sample_rate().0 <= rate && rate <= r.max_sample_rate().0
            }) {
                let config = range.clone().with_sample_rate(cpal::SampleRate(rate));
                return Ok((config, rate));
            }
        }
        Err(AudioSourceError::UnsupportedRate(PREFERRED_RATES.to_vec()))
    }
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<mpsc::Receiver<RawFrame>, AudioSourceError> {
        let device = self.select_device()?;
        let (config, rate) = Self::probe_rate(&device)?;
        let channels = config.channels();
        self.chosen = Some(DeviceRate { sample_rate: rate, channels });

        // Bounded at ~50 frames (§5 T1 capture channel capacity).
        let (tx, rx) = mpsc::channel::<RawFrame>(50);
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        // Realtime callback can't block; it parks samples in a small ring
        // buffer that a lightweight forwarder thread drains into the
        // channel (§9: bridge the push callback once, at the boundary).
        let pending: Arc<Mutex<VecDeque<f32>>> = Arc::new(Mutex::new(VecDeque::new()));
        let pending_cb = pending.clone();
        let sample_format = config.sample_format();
        let stream_config: cpal::StreamConfig = config.into();

        let err_running = running.clone();
        let err_fn = move |err: cpal::StreamError| {
            error!(%err, "cpal stream error, marking source closed");
            err_running.store(false, Ordering::SeqCst);
        };

        let stream = match sample_format {
            cpal::SampleFormat::F32 => device.build_input_stream(
                &stream_config,
                move |data: &[f32], _| {
                    let mut guard = pending_cb.lock().unwrap();
                    guard.extend(data.iter().copied());
                },
                err_fn,
                None,
            ),
            cpal::SampleFormat::I16 => device.build_input_stream(
                &stream_config,
                move |data: &[i16], _| {
                    let mut guard = pending_cb.lock().unwrap();
                    guard.extend(data.iter().map(|&s| s as f32 / i16::MAX as f32));
                },
                err_fn,
                None,
            ),
            other => {
                return Err(AudioSourceError::CaptureFailure(format!(
                    "unsupported sample format {other:?}"
                )));
            }
        }
        .map_err(|e| AudioSourceError::CaptureFailure(e.to_string()))?;

        stream.play().map_err(|e| AudioSourceError::CaptureFailure(e.to_string()))?;
        self.stream = Some(stream);

        let forward_running = running.clone();
        std::thread::spawn(move || {
            while forward_running.load(Ordering::SeqCst) {
                let chunk: Vec<f32> = {
                    let mut guard = pending.lock().unwrap();
                    guard.drain(..).collect()
                };
                if !chunk.is_empty() {
                    let frame = RawFrame { samples: chunk, sample_rate: rate };
                    if tx.blocking_send(frame).is_err() {
                        break;
                    }
                } else {
                    std::thread::sleep(std::time::Duration::from_millis(5));
                }
            }
        });

        Ok(rx)
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.stream = None;
    }

    fn chosen_rate(&self) -> Option<DeviceRate> {
        self.chosen
    }
}
