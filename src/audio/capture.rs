//! Audio capture from an input device into a ring buffer
//!
//! The cpal stream runs on its own thread and writes interleaved frames
//! straight into the producer side of a ring buffer; the engine reads the
//! other side once per quantum. Like every producer in this crate the
//! callback never blocks: a full ring truncates and counts the overrun.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::resolve_input;
use crate::audio::writer::AudioWriter;
use crate::config::AudioConfig;
use crate::error::AudioError;

/// Counters shared with the capture callback
#[derive(Debug, Default)]
struct CaptureCounters {
    samples: AtomicU64,
    dropped: AtomicU64,
}

/// Input stream feeding an [`AudioWriter`]
pub struct AudioCapture {
    device_id: Option<String>,
    config: StreamConfig,
    running: Arc<AtomicBool>,
    counters: Arc<CaptureCounters>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Option<Receiver<AudioError>>,
}

impl AudioCapture {
    pub fn new(audio: &AudioConfig) -> Self {
        Self {
            device_id: audio.input_device.clone(),
            config: StreamConfig {
                channels: audio.channels,
                sample_rate: cpal::SampleRate(audio.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            },
            running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(CaptureCounters::default()),
            thread_handle: None,
            error_rx: None,
        }
    }

    /// Open the device and start writing into `writer`
    pub fn start(&mut self, mut writer: AudioWriter) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = resolve_input(self.device_id.as_deref())?;
        tracing::info!("Opening input device {}", device.name);

        let (error_tx, error_rx) = bounded::<AudioError>(16);
        self.error_rx = Some(error_rx);

        let running = Arc::clone(&self.running);
        let running_for_loop = Arc::clone(&self.running);
        let counters = Arc::clone(&self.counters);
        let config = self.config.clone();
        let channels = (config.channels as usize).max(1);
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("capture-input".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();

                let stream = cpal_device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }
                        let room = writer.available_write() / channels * channels;
                        let written = writer.enqueue(&data[..data.len().min(room)]);
                        counters.samples.fetch_add(written as u64, Ordering::Relaxed);
                        if written < data.len() {
                            counters
                                .dropped
                                .fetch_add((data.len() - written) as u64, Ordering::Relaxed);
                        }
                    },
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            tracing::error!("Failed to start input stream: {}", e);
                            return;
                        }
                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to build input stream: {}", e);
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    /// Samples accepted by the ring buffer
    pub fn samples_captured(&self) -> u64 {
        self.counters.samples.load(Ordering::Relaxed)
    }

    /// Samples lost because the engine was not reading fast enough
    pub fn samples_dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
