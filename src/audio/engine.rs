//! Render-quantum host
//!
//! The engine is what the output device callback drives. Every quantum it
//! picks up newly added units, pulls captured input from its ring buffer,
//! runs every live unit into stereo scratch buffers and mixes the result
//! into the device's interleaved buffer. Units whose liveness hint turns
//! false are dropped from the schedule.
//!
//! Device callbacks rarely ask for exactly one quantum, so [`BlockAdapter`]
//! slices fixed quanta into whatever size the device requests.
//!
//! Units travel to the render thread as `basedrop::Owned`, so a unit the
//! engine drops is freed on the collector thread.

use basedrop::Owned;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::audio::interleave::deinterleave;
use crate::audio::writer::AudioReader;
use crate::config::AppConfig;
use crate::constants::{MAX_TRACKS, RECORD_CHANNELS};
use crate::error::ControlError;
use crate::gc::gc_handle;
use crate::player::{AudioUnit, AutomationParams};

type UnitSlot = Owned<Box<dyn AudioUnit>>;

/// Scheduled units plus units waiting in the intake channel
const UNIT_SLOTS: usize = 2 * MAX_TRACKS;

/// Global transport switches read by the render thread each quantum
#[derive(Debug, Default)]
pub struct TransportControl {
    playing: AtomicBool,
    looping: AtomicBool,
}

impl TransportControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn play(&self) {
        self.playing.store(true, Ordering::Release);
    }

    pub fn stop(&self) {
        self.playing.store(false, Ordering::Release);
    }

    pub fn set_looping(&self, looping: bool) {
        self.looping.store(looping, Ordering::Release);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::Acquire)
    }
}

/// Control-side handle for adding units to a running engine
#[derive(Clone)]
pub struct EngineHandle {
    units: Sender<UnitSlot>,
    transport: Arc<TransportControl>,
    live_units: Arc<AtomicUsize>,
}

impl EngineHandle {
    pub fn add_unit(&self, unit: Box<dyn AudioUnit>) -> Result<(), ControlError> {
        let unit = Owned::new(&gc_handle(), unit);
        self.units.try_send(unit).map_err(|e| match e {
            TrySendError::Full(_) => ControlError::QueueFull,
            TrySendError::Disconnected(_) => ControlError::Disconnected,
        })
    }

    pub fn transport(&self) -> &Arc<TransportControl> {
        &self.transport
    }

    /// Units the engine invoked during its last quantum
    pub fn live_units(&self) -> usize {
        self.live_units.load(Ordering::Relaxed)
    }
}

/// Captured input attached to the engine
struct Capture {
    reader: AudioReader,
    channels: usize,
    interleaved: Vec<f32>,
    planar: Vec<Vec<f32>>,
}

pub struct Engine {
    units: Vec<UnitSlot>,
    incoming: Receiver<UnitSlot>,
    transport: Arc<TransportControl>,
    live_units: Arc<AtomicUsize>,
    capture: Option<Capture>,
    quantum: usize,
    output_channels: usize,
    scratch: [Vec<f32>; RECORD_CHANNELS],
    mix: [Vec<f32>; RECORD_CHANNELS],
}

impl Engine {
    pub fn new(config: &AppConfig) -> (Self, EngineHandle) {
        let (units_tx, units_rx) = bounded(MAX_TRACKS);
        let transport = Arc::new(TransportControl::new());
        let live_units = Arc::new(AtomicUsize::new(0));
        let quantum = config.audio.render_quantum;

        let engine = Self {
            units: Vec::with_capacity(UNIT_SLOTS),
            incoming: units_rx,
            transport: Arc::clone(&transport),
            live_units: Arc::clone(&live_units),
            capture: None,
            quantum,
            output_channels: config.audio.channels as usize,
            scratch: [vec![0.0; quantum], vec![0.0; quantum]],
            mix: [vec![0.0; quantum], vec![0.0; quantum]],
        };
        let handle = EngineHandle {
            units: units_tx,
            transport,
            live_units,
        };
        (engine, handle)
    }

    /// Feed units from an interleaved capture ring with `channels` channels
    pub fn with_capture(mut self, reader: AudioReader, channels: usize) -> Self {
        let channels = channels.max(1);
        self.capture = Some(Capture {
            reader,
            channels,
            interleaved: vec![0.0; self.quantum * channels],
            planar: vec![vec![0.0; self.quantum]; channels],
        });
        self
    }

    /// Interleaved samples per rendered quantum
    pub fn block_samples(&self) -> usize {
        self.quantum * self.output_channels
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Render one quantum into `output` (interleaved, `block_samples` long)
    pub fn render(&mut self, output: &mut [f32]) {
        // Never grow past the preallocated slots; the rest waits a quantum
        while self.units.len() < self.units.capacity() {
            match self.incoming.try_recv() {
                Ok(unit) => self.units.push(unit),
                Err(_) => break,
            }
        }

        let params = AutomationParams::control_rate(
            self.transport.is_playing(),
            self.transport.is_looping(),
        );

        let input_views: [&[f32]; 2];
        let inputs: &[&[f32]] = match &mut self.capture {
            Some(capture) => {
                let read = capture.reader.dequeue(&mut capture.interleaved);
                // Underrun: whatever did not arrive is silence
                capture.interleaved[read..].fill(0.0);
                split_input(capture);
                input_views = [
                    &capture.planar[0],
                    capture.planar.get(1).map_or(&capture.planar[0][..], |c| &c[..]),
                ];
                &input_views[..capture.channels.min(2)]
            }
            None => &[],
        };

        for channel in &mut self.mix {
            channel.fill(0.0);
        }

        let scratch = &mut self.scratch;
        let mix = &mut self.mix;
        self.units.retain_mut(|unit| {
            for channel in scratch.iter_mut() {
                channel.fill(0.0);
            }
            let [left, right] = &mut *scratch;
            let live = unit.process(inputs, &mut [&mut left[..], &mut right[..]], &params);
            for (bus, channel) in mix.iter_mut().zip(scratch.iter()) {
                for (out, &sample) in bus.iter_mut().zip(channel) {
                    *out += sample;
                }
            }
            live
        });
        self.live_units.store(self.units.len(), Ordering::Relaxed);

        write_output(&self.mix, self.output_channels, output);
    }
}

fn split_input(capture: &mut Capture) {
    let mut planar: [&mut [f32]; 2] = match capture.planar.as_mut_slice() {
        [left, right, ..] => [&mut left[..], &mut right[..]],
        [mono] => [&mut mono[..], &mut []],
        [] => return,
    };
    let channels = capture.channels.min(2);
    if capture.channels > 2 {
        // Only the first two device channels are routed
        for (frame, i) in capture.interleaved.chunks_exact(capture.channels).zip(0..) {
            planar[0][i] = frame[0];
            planar[1][i] = frame[1];
        }
        return;
    }
    if let Err(e) = deinterleave(&capture.interleaved, &mut planar[..channels]) {
        tracing::error!("Dropping captured block: {}", e);
    }
}

/// Copy the stereo mix into an interleaved device buffer
fn write_output(mix: &[Vec<f32>; RECORD_CHANNELS], channels: usize, output: &mut [f32]) {
    let [left, right] = mix;
    match channels {
        0 => {}
        1 => {
            for ((out, &l), &r) in output.iter_mut().zip(left).zip(right) {
                *out = 0.5 * (l + r);
            }
        }
        _ => {
            for ((frame, &l), &r) in output.chunks_exact_mut(channels).zip(left).zip(right) {
                frame[0] = l;
                frame[1] = r;
                frame[2..].fill(0.0);
            }
        }
    }
}

/// Serves device buffers of any size from fixed-size rendered quanta
pub struct BlockAdapter {
    block: Vec<f32>,
    position: usize,
}

impl BlockAdapter {
    pub fn new(block_samples: usize) -> Self {
        Self {
            block: vec![0.0; block_samples],
            position: block_samples,
        }
    }

    /// Fill `out`, calling `render` each time a fresh quantum is needed
    pub fn fill<F>(&mut self, out: &mut [f32], mut render: F)
    where
        F: FnMut(&mut [f32]),
    {
        if self.block.is_empty() {
            out.fill(0.0);
            return;
        }

        let mut written = 0;
        while written < out.len() {
            if self.position == self.block.len() {
                render(&mut self.block);
                self.position = 0;
            }
            let n = (self.block.len() - self.position).min(out.len() - written);
            let source = &self.block[self.position..self.position + n];
            out[written..written + n].copy_from_slice(source);
            self.position += n;
            written += n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::SharedRing;
    use crate::audio::writer::AudioWriter;
    use crate::control::TransportUpdate;
    use crate::player::recorder::RecorderUpdate;
    use crate::player::{Player, SampleRecorder, ToneFill, UnitContext};

    fn config(quantum: usize, channels: u16) -> AppConfig {
        let mut config = AppConfig::default();
        config.audio.sample_rate = 1000;
        config.audio.render_quantum = quantum;
        config.audio.channels = channels;
        config
    }

    #[test]
    fn test_block_adapter_chunks_quanta() {
        let mut adapter = BlockAdapter::new(4);
        let mut counter = 0.0f32;
        let mut render = |block: &mut [f32]| {
            for sample in block.iter_mut() {
                *sample = counter;
                counter += 1.0;
            }
        };

        let mut first = [0.0f32; 3];
        adapter.fill(&mut first, &mut render);
        let mut second = [0.0f32; 6];
        adapter.fill(&mut second, &mut render);

        assert_eq!(first, [0.0, 1.0, 2.0]);
        assert_eq!(second, [3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_engine_mixes_and_gates() {
        let config = config(8, 2);
        let ctx = UnitContext::from_config(&config);
        let (mut engine, handle) = Engine::new(&config);

        let (player, _player_handle) = Player::new(ToneFill::new(100.0, 0.5), &ctx);
        handle.add_unit(Box::new(player)).unwrap();

        let mut out = vec![0.0f32; engine.block_samples()];
        engine.render(&mut out);
        assert_eq!(engine.unit_count(), 1);
        assert!(out.iter().all(|&s| s == 0.0));

        handle.transport().play();
        engine.render(&mut out);
        assert!(out.iter().any(|&s| s != 0.0));
        // Stereo mix lands on both device channels
        assert!(out.chunks_exact(2).all(|frame| frame[0] == frame[1]));
    }

    #[test]
    fn test_engine_drops_dead_units() {
        let config = config(8, 2);
        let ctx = UnitContext::from_config(&config);
        let (mut engine, handle) = Engine::new(&config);

        let (player, player_handle) = Player::new(ToneFill::new(100.0, 0.5), &ctx);
        handle.add_unit(Box::new(player)).unwrap();
        let mut out = vec![0.0f32; engine.block_samples()];
        engine.render(&mut out);
        assert_eq!(handle.live_units(), 1);

        player_handle.transport(TransportUpdate::ShouldLive(false)).unwrap();
        engine.render(&mut out);
        assert_eq!(engine.unit_count(), 0);
        assert_eq!(handle.live_units(), 0);
    }

    #[test]
    fn test_unit_turnover_stays_within_slots() {
        let config = config(8, 2);
        let ctx = UnitContext::from_config(&config);
        let (mut engine, handle) = Engine::new(&config);
        let mut out = vec![0.0f32; engine.block_samples()];
        let capacity = engine.units.capacity();

        let mut handles = Vec::new();
        for _ in 0..MAX_TRACKS {
            let (player, player_handle) = Player::new(ToneFill::new(100.0, 0.5), &ctx);
            handle.add_unit(Box::new(player)).unwrap();
            handles.push(player_handle);
        }
        engine.render(&mut out);
        assert_eq!(engine.unit_count(), MAX_TRACKS);

        // Remove every track and create replacements before the next quantum
        for player_handle in handles.drain(..) {
            player_handle.retire();
        }
        for _ in 0..MAX_TRACKS {
            let (player, player_handle) = Player::new(ToneFill::new(100.0, 0.5), &ctx);
            handle.add_unit(Box::new(player)).unwrap();
            handles.push(player_handle);
        }
        engine.render(&mut out);

        assert_eq!(engine.unit_count(), MAX_TRACKS);
        assert_eq!(engine.units.capacity(), capacity);
    }

    #[test]
    fn test_engine_routes_capture_to_recorder() {
        let config = config(4, 1);
        let ctx = UnitContext::from_config(&config);

        let input = SharedRing::with_capacity::<f32>(64).unwrap();
        let mut device = AudioWriter::from_shared(&input).unwrap();
        let (engine, handle) = Engine::new(&config);
        let mut engine = engine.with_capture(AudioReader::from_shared(&input).unwrap(), 1);

        let record = SharedRing::with_capacity::<f32>(64).unwrap();
        let mut drain = AudioReader::from_shared(&record).unwrap();
        let (player, player_handle) = Player::new(SampleRecorder::new(&ctx), &ctx);
        player_handle.fill(RecorderUpdate::shared_buffer(record.clone())).unwrap();
        player_handle.fill(RecorderUpdate::Arm).unwrap();
        player_handle.fill(RecorderUpdate::StartRecording).unwrap();
        handle.add_unit(Box::new(player)).unwrap();

        device.enqueue(&[1.0, 2.0, 3.0, 4.0]);
        let mut out = vec![0.0f32; engine.block_samples()];
        engine.render(&mut out);

        let mut recorded = [0.0f32; 8];
        assert_eq!(drain.dequeue(&mut recorded), 8);
        assert_eq!(recorded, [1.0, 1.0, 2.0, 2.0, 3.0, 3.0, 4.0, 4.0]);
    }

    #[test]
    fn test_mono_device_gets_downmix() {
        let mix = [vec![1.0, 0.0], vec![0.0, 1.0]];
        let mut out = [9.0f32; 2];
        write_output(&mix, 1, &mut out);
        assert_eq!(out, [0.5, 0.5]);

        let mut out = [9.0f32; 6];
        write_output(&mix, 3, &mut out);
        assert_eq!(out, [1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    }
}
