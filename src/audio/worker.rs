//! Recording drain worker
//!
//! Runs on the tokio runtime, never on the render thread. It holds the
//! consumer side of a track's ring buffer and periodically moves everything
//! queued into a growing [`Take`]. Stopping drains whatever is left before
//! handing the take back.

use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::audio::writer::AudioReader;
use crate::config::RecordingConfig;
use crate::constants::RECORD_CHANNELS;
use crate::player::recorder::ResidentBuffer;

/// Interleaved audio collected during one recording
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Take {
    samples: Vec<f32>,
    channels: usize,
}

impl Take {
    pub fn new(channels: usize) -> Self {
        Self {
            samples: Vec::new(),
            channels: channels.max(1),
        }
    }

    pub fn push(&mut self, samples: &[f32]) {
        self.samples.extend_from_slice(samples);
    }

    /// Complete frames collected so far
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Planar copy suitable for loading back into a recorder
    pub fn into_resident(self) -> ResidentBuffer {
        ResidentBuffer::from_interleaved(&self.samples, self.channels)
    }
}

/// Move everything currently readable into `take`, `scratch` at a time
///
/// Returns the number of samples moved.
pub fn drain(reader: &mut AudioReader, scratch: &mut [f32], take: &mut Take) -> usize {
    let mut moved = 0;
    loop {
        let read = reader.dequeue(scratch);
        if read == 0 {
            break;
        }
        take.push(&scratch[..read]);
        moved += read;
    }
    moved
}

/// Handle to a running drain task
pub struct RecordingWorker {
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Take>,
}

impl RecordingWorker {
    /// Spawn the drain loop on the current tokio runtime
    pub fn spawn(mut reader: AudioReader, config: &RecordingConfig) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let period = Duration::from_millis(config.drain_interval_ms.max(1));
        let chunk = config.drain_chunk.max(RECORD_CHANNELS);

        let handle = tokio::spawn(async move {
            let mut take = Take::new(RECORD_CHANNELS);
            let mut scratch = vec![0.0f32; chunk];
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        drain(&mut reader, &mut scratch, &mut take);
                    }
                    _ = &mut stop_rx => break,
                }
            }

            let tail = drain(&mut reader, &mut scratch, &mut take);
            tracing::debug!(tail, frames = take.frames(), "Recording worker stopped");
            take
        });

        Self {
            stop: Some(stop_tx),
            handle,
        }
    }

    /// Stop the loop, drain the remainder and return the take
    pub async fn finish(mut self) -> Result<Take, tokio::task::JoinError> {
        if let Some(stop) = self.stop.take() {
            // The task only ends on this signal, so a send error means it
            // already panicked; the join below reports that.
            let _ = stop.send(());
        }
        self.handle.await
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
