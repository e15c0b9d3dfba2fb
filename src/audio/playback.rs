//! Output stream driving the engine
//!
//! The engine is moved into the cpal output callback. Each callback is
//! served through a [`BlockAdapter`], so units always see whole render
//! quanta regardless of the device buffer size.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::resolve_output;
use crate::audio::engine::{BlockAdapter, Engine};
use crate::config::AudioConfig;
use crate::error::AudioError;

pub struct AudioPlayback {
    device_id: Option<String>,
    config: StreamConfig,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Option<Receiver<AudioError>>,
}

impl AudioPlayback {
    pub fn new(audio: &AudioConfig) -> Self {
        Self {
            device_id: audio.output_device.clone(),
            config: StreamConfig {
                channels: audio.channels,
                sample_rate: cpal::SampleRate(audio.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            },
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            error_rx: None,
        }
    }

    /// Open the output device and hand `engine` to its callback
    pub fn start(&mut self, mut engine: Engine) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = resolve_output(self.device_id.as_deref())?;
        tracing::info!("Opening output device {}", device.name);

        let (error_tx, error_rx) = bounded::<AudioError>(16);
        self.error_rx = Some(error_rx);

        let running = Arc::clone(&self.running);
        let running_for_loop = Arc::clone(&self.running);
        let config = self.config.clone();
        let mut adapter = BlockAdapter::new(engine.block_samples());
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("playback-output".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();

                let stream = cpal_device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        if !running.load(Ordering::Relaxed) {
                            data.fill(0.0);
                            return;
                        }
                        adapter.fill(data, |block| engine.render(block));
                    },
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            tracing::error!("Failed to start output stream: {}", e);
                            return;
                        }
                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to build output stream: {}", e);
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

    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playback_follows_config() {
        let mut audio = AudioConfig::default();
        audio.output_device = Some("output:Monitors".to_string());
        audio.sample_rate = 96000;

        let playback = AudioPlayback::new(&audio);
        assert_eq!(playback.device_id.as_deref(), Some("output:Monitors"));
        assert_eq!(playback.config.sample_rate.0, 96000);
        assert!(!playback.is_running());
        assert!(playback.check_errors().is_none());
    }
}
