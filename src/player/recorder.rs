//! Sample recorder: resident-buffer playback plus recording into a ring
//!
//! While recording, each quantum's input is reduced to a stereo pair,
//! interleaved into a scratch buffer allocated at construction and enqueued
//! on the track's ring buffer. The drain worker on the other side assembles
//! the take. Otherwise the recorder plays its resident buffer sample by
//! sample, following the per-sample `playing` and `looping` parameters.
//!
//! Resident audio and the attached ring arrive wrapped in `basedrop::Shared`,
//! so replacing either on the render thread never frees memory there.

use basedrop::Shared;
use std::fmt;
use std::sync::Arc;

use super::{FillStrategy, PlayWindow, PlayerState, ProcessBlock, UnitContext};
use crate::audio::buffer::SharedRing;
use crate::audio::interleave::interleave;
use crate::audio::writer::AudioWriter;
use crate::constants::RECORD_CHANNELS;
use crate::control::{ControlMessage, InputMode};
use crate::gc::gc_handle;
use crate::stats::TransportStats;

/// Planar multichannel audio held by the unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResidentBuffer {
    channels: Vec<Vec<f32>>,
}

impl ResidentBuffer {
    /// Channels shorter than the first are padded with silence
    pub fn new(mut channels: Vec<Vec<f32>>) -> Self {
        let len = channels.first().map_or(0, Vec::len);
        for channel in &mut channels {
            channel.resize(len, 0.0);
        }
        Self { channels }
    }

    pub fn from_interleaved(samples: &[f32], channel_count: usize) -> Self {
        let channel_count = channel_count.max(1);
        let frames = samples.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in samples.chunks_exact(channel_count) {
            for (channel, &sample) in channels.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }
        Self { channels }
    }

    /// Frames per channel
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }
}

pub enum RecorderUpdate {
    Audio(Shared<ResidentBuffer>),
    RemoveAudio,
    SharedBuffer(Shared<SharedRing>),
    Arm,
    Disarm,
    StartRecording,
    StopRecording,
    InputMode(InputMode),
}

impl RecorderUpdate {
    /// Load `buffer` as the resident audio
    pub fn audio(buffer: ResidentBuffer) -> Self {
        RecorderUpdate::Audio(Shared::new(&gc_handle(), buffer))
    }

    /// Attach `ring` as the recording target
    pub fn shared_buffer(ring: SharedRing) -> Self {
        RecorderUpdate::SharedBuffer(Shared::new(&gc_handle(), ring))
    }
}

impl fmt::Debug for RecorderUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecorderUpdate::Audio(audio) => write!(f, "Audio({} frames)", audio.len()),
            RecorderUpdate::RemoveAudio => f.write_str("RemoveAudio"),
            RecorderUpdate::SharedBuffer(ring) => write!(f, "SharedBuffer({:?})", &**ring),
            RecorderUpdate::Arm => f.write_str("Arm"),
            RecorderUpdate::Disarm => f.write_str("Disarm"),
            RecorderUpdate::StartRecording => f.write_str("StartRecording"),
            RecorderUpdate::StopRecording => f.write_str("StopRecording"),
            RecorderUpdate::InputMode(mode) => write!(f, "InputMode({mode:?})"),
        }
    }
}

/// Records into a ring buffer or plays back a resident buffer
pub struct SampleRecorder {
    audio: Option<Shared<ResidentBuffer>>,
    /// Sample index; during playback the player reports this position
    playhead: usize,
    recording: bool,
    input_mode: InputMode,
    ring: Option<Shared<SharedRing>>,
    writer: Option<AudioWriter>,
    scratch: Vec<f32>,
    warned_unarmed: bool,
    stats: Arc<TransportStats>,
}

impl SampleRecorder {
    pub fn new(context: &UnitContext) -> Self {
        Self {
            audio: None,
            playhead: 0,
            recording: false,
            input_mode: InputMode::default(),
            ring: None,
            writer: None,
            scratch: vec![0.0; context.render_quantum * RECORD_CHANNELS],
            warned_unarmed: false,
            stats: Arc::clone(&context.stats),
        }
    }

    pub fn with_audio(mut self, audio: ResidentBuffer) -> Self {
        self.audio = Some(Shared::new(&gc_handle(), audio));
        self
    }

    pub fn playhead(&self) -> usize {
        self.playhead
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn is_armed(&self) -> bool {
        self.writer.is_some()
    }

    pub fn input_mode(&self) -> InputMode {
        self.input_mode
    }

    pub fn audio(&self) -> Option<&ResidentBuffer> {
        self.audio.as_deref()
    }

    fn arm(&mut self) {
        let Some(ring) = &self.ring else {
            tracing::error!("Cannot arm recorder: no shared buffer attached");
            return;
        };
        match AudioWriter::from_shared(ring) {
            Ok(writer) => {
                tracing::debug!(capacity = ring.capacity(), "Recorder armed");
                self.writer = Some(writer);
            }
            Err(e) => tracing::error!("Cannot arm recorder: {}", e),
        }
    }

    fn record(&mut self, block: &ProcessBlock<'_, '_>) {
        let Some(&first) = block.inputs.first() else {
            return;
        };

        let (left, right) = match self.input_mode {
            InputMode::Stereo => (first, block.inputs.get(1).copied().unwrap_or(first)),
            InputMode::Mono(channel) => {
                let source = block.inputs.get(channel).copied().unwrap_or(first);
                (source, source)
            }
        };

        let Some(writer) = &mut self.writer else {
            if !self.warned_unarmed {
                tracing::warn!("Recording while the track is not armed, input discarded");
                self.warned_unarmed = true;
            }
            self.stats.record_unarmed();
            return;
        };

        let frames = left.len().min(right.len()).min(self.scratch.len() / RECORD_CHANNELS);
        let interleaved = &mut self.scratch[..frames * RECORD_CHANNELS];
        if let Err(e) = interleave(&[&left[..frames], &right[..frames]], interleaved) {
            tracing::error!("Dropping recorded block: {}", e);
            return;
        }

        // Only whole frames go in, so the stream stays channel-aligned.
        let room = writer.available_write() / RECORD_CHANNELS * RECORD_CHANNELS;
        let written = writer.enqueue(&interleaved[..interleaved.len().min(room)]);
        if written < interleaved.len() {
            tracing::warn!(
                written,
                offered = interleaved.len(),
                "Recording overrun: the drain worker is not keeping up"
            );
            self.stats.record_overrun(interleaved.len() - written);
        }
        self.playhead += frames;
    }

    fn play(
        &mut self,
        window: &PlayWindow,
        transport: &PlayerState,
        block: &mut ProcessBlock<'_, '_>,
    ) {
        let Some(audio) = &self.audio else {
            return;
        };

        let loop_samples = transport.loop_range().map(|(start, end)| {
            (
                (start / window.ms_per_sample).floor() as usize,
                (end / window.ms_per_sample).floor() as usize,
            )
        });
        let channel_count = audio.channel_count().min(block.outputs.len());
        let params = block.params;

        for i in 0..block.block_len() {
            if !params.playing.is_on(i) {
                continue;
            }
            let looping = params.looping.is_on(i);

            match loop_samples {
                Some((start, end)) if looping && self.playhead >= end => self.playhead = start,
                _ if !looping && self.playhead >= audio.len() => continue,
                _ => {}
            }

            // A loop can run past the end of a short buffer.
            if self.playhead < audio.len() {
                let channels = block.outputs.iter_mut().zip(&audio.channels);
                for (output, source) in channels.take(channel_count) {
                    output[i] = source[self.playhead];
                }
            }
            self.playhead += 1;
        }
    }
}

impl FillStrategy for SampleRecorder {
    type Update = RecorderUpdate;

    fn updates_from(message: &mut ControlMessage) -> Vec<RecorderUpdate> {
        let mut updates = Vec::new();
        if let Some(audio) = message.audio.take() {
            updates.push(RecorderUpdate::audio(ResidentBuffer::new(audio)));
        }
        if std::mem::take(&mut message.remove_audio) {
            updates.push(RecorderUpdate::RemoveAudio);
        }
        if let Some(ring) = message.sab.take() {
            updates.push(RecorderUpdate::shared_buffer(ring));
        }
        if let Some(mode) = message.input_mode.take() {
            updates.push(RecorderUpdate::InputMode(mode));
        }
        if std::mem::take(&mut message.arm) {
            updates.push(RecorderUpdate::Arm);
        }
        if std::mem::take(&mut message.start_recording) {
            updates.push(RecorderUpdate::StartRecording);
        }
        if std::mem::take(&mut message.stop_recording) {
            updates.push(RecorderUpdate::StopRecording);
        }
        if std::mem::take(&mut message.disarm) {
            updates.push(RecorderUpdate::Disarm);
        }
        updates
    }

    fn apply(&mut self, update: RecorderUpdate) {
        match update {
            RecorderUpdate::Audio(audio) => {
                tracing::debug!(
                    frames = audio.len(),
                    channels = audio.channel_count(),
                    "Resident audio loaded"
                );
                self.audio = Some(audio);
            }
            RecorderUpdate::RemoveAudio => self.audio = None,
            RecorderUpdate::SharedBuffer(ring) => {
                // The writer belongs to the ring being replaced
                if self.writer.take().is_some() {
                    tracing::debug!("Shared buffer replaced, recorder disarmed");
                }
                self.ring = Some(ring);
            }
            RecorderUpdate::Arm => self.arm(),
            RecorderUpdate::Disarm => {
                self.writer = None;
                self.recording = false;
            }
            RecorderUpdate::StartRecording => {
                self.recording = true;
                self.warned_unarmed = false;
            }
            RecorderUpdate::StopRecording => self.recording = false,
            RecorderUpdate::InputMode(mode) => self.input_mode = mode,
        }
    }

    fn fill(
        &mut self,
        window: &PlayWindow,
        transport: &PlayerState,
        block: &mut ProcessBlock<'_, '_>,
    ) {
        if self.recording {
            self.record(block);
        } else {
            self.play(window, transport, block);
        }
    }

    fn seek(&mut self, playhead_ms: f64, ms_per_sample: f64) {
        self.playhead = (playhead_ms / ms_per_sample).round().max(0.0) as usize;
    }

    /// Resident playback keeps its own sample timeline
    fn playhead_ms(&self, ms_per_sample: f64) -> Option<f64> {
        match self.audio {
            Some(_) if !self.recording => Some(self.playhead as f64 * ms_per_sample),
            _ => None,
        }
    }

    fn runs_ungated(&self) -> bool {
        self.recording
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::writer::AudioReader;
    use crate::config::AppConfig;
    use crate::control::TransportUpdate;
    use crate::player::{AutomationParams, Param};

    fn context() -> UnitContext {
        let mut config = AppConfig::default();
        config.audio.sample_rate = 1000;
        config.audio.render_quantum = 8;
        UnitContext::from_config(&config)
    }

    fn window(len: usize) -> PlayWindow {
        PlayWindow {
            from: 0.0,
            to: len as f64,
            ms_per_sample: 1.0,
        }
    }

    fn play(
        recorder: &mut SampleRecorder,
        transport: &PlayerState,
        params: &AutomationParams<'_>,
        len: usize,
    ) -> [Vec<f32>; 2] {
        let mut left = vec![0.0f32; len];
        let mut right = vec![0.0f32; len];
        {
            let mut outputs = [&mut left[..], &mut right[..]];
            let mut block = ProcessBlock {
                inputs: &[],
                outputs: &mut outputs,
                params,
            };
            recorder.fill(&window(len), transport, &mut block);
        }
        [left, right]
    }

    fn record(recorder: &mut SampleRecorder, inputs: &[&[f32]]) {
        let len = inputs.first().map_or(8, |c| c.len());
        let mut left = vec![0.0f32; len];
        let mut right = vec![0.0f32; len];
        let params = AutomationParams::control_rate(false, false);
        let mut outputs = [&mut left[..], &mut right[..]];
        let mut block = ProcessBlock {
            inputs,
            outputs: &mut outputs,
            params: &params,
        };
        recorder.fill(&window(len), &PlayerState::default(), &mut block);
        assert!(left.iter().chain(&right).all(|&s| s == 0.0));
    }

    fn ramp(len: usize, base: f32) -> Vec<f32> {
        (0..len).map(|i| base + i as f32).collect()
    }

    fn armed(ctx: &UnitContext, capacity: usize) -> (SampleRecorder, AudioReader) {
        let ring = SharedRing::with_capacity::<f32>(capacity).unwrap();
        let reader = AudioReader::from_shared(&ring).unwrap();
        let mut recorder = SampleRecorder::new(ctx);
        recorder.apply(RecorderUpdate::shared_buffer(ring));
        recorder.apply(RecorderUpdate::Arm);
        assert!(recorder.is_armed());
        (recorder, reader)
    }

    #[test]
    fn test_playback_copies_resident_audio() {
        let ctx = context();
        let audio = ResidentBuffer::new(vec![ramp(20, 0.0), ramp(20, 100.0)]);
        let mut recorder = SampleRecorder::new(&ctx).with_audio(audio);
        let params = AutomationParams::control_rate(true, false);

        let [left, right] = play(&mut recorder, &PlayerState::default(), &params, 8);
        assert_eq!(left, ramp(8, 0.0));
        assert_eq!(right, ramp(8, 100.0));
        assert_eq!(recorder.playhead(), 8);
    }

    #[test]
    fn test_playback_stops_at_content_end_without_loop() {
        let ctx = context();
        let audio = ResidentBuffer::new(vec![ramp(4, 1.0)]);
        let mut recorder = SampleRecorder::new(&ctx).with_audio(audio);
        let params = AutomationParams::control_rate(true, false);

        let [left, right] = play(&mut recorder, &PlayerState::default(), &params, 8);
        assert_eq!(left, vec![1.0, 2.0, 3.0, 4.0, 0.0, 0.0, 0.0, 0.0]);
        // Mono source only feeds the first output
        assert!(right.iter().all(|&s| s == 0.0));
        assert_eq!(recorder.playhead(), 4);
    }

    #[test]
    fn test_playback_loops_in_sample_domain() {
        let ctx = context();
        let audio = ResidentBuffer::new(vec![ramp(10, 0.0)]);
        let mut recorder = SampleRecorder::new(&ctx).with_audio(audio);
        let mut transport = PlayerState::default();
        transport.apply(TransportUpdate::LoopStart(Some(2.0)));
        transport.apply(TransportUpdate::LoopEnd(5.0));
        let params = AutomationParams::control_rate(true, true);

        let [left, _] = play(&mut recorder, &transport, &params, 8);
        assert_eq!(left, vec![0.0, 1.0, 2.0, 3.0, 4.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_loop_past_short_buffer_plays_silence() {
        let ctx = context();
        let audio = ResidentBuffer::new(vec![ramp(3, 1.0)]);
        let mut recorder = SampleRecorder::new(&ctx).with_audio(audio);
        let mut transport = PlayerState::default();
        transport.apply(TransportUpdate::LoopStart(Some(0.0)));
        transport.apply(TransportUpdate::LoopEnd(5.0));
        let params = AutomationParams::control_rate(true, true);

        let [left, _] = play(&mut recorder, &transport, &params, 8);
        assert_eq!(left, vec![1.0, 2.0, 3.0, 0.0, 0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_per_sample_gate() {
        let ctx = context();
        let audio = ResidentBuffer::new(vec![ramp(8, 1.0)]);
        let mut recorder = SampleRecorder::new(&ctx).with_audio(audio);
        let gate = [1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        let params = AutomationParams {
            is_playing: Param::Constant(1.0),
            playing: Param::PerSample(&gate),
            looping: Param::Constant(0.0),
        };

        let [left, _] = play(&mut recorder, &PlayerState::default(), &params, 8);
        assert_eq!(left, vec![1.0, 2.0, 0.0, 0.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_missing_audio_is_silent() {
        let ctx = context();
        let mut recorder = SampleRecorder::new(&ctx);
        let params = AutomationParams::control_rate(true, false);
        let [left, right] = play(&mut recorder, &PlayerState::default(), &params, 8);
        assert!(left.iter().chain(&right).all(|&s| s == 0.0));

        recorder.apply(RecorderUpdate::audio(ResidentBuffer::new(vec![ramp(8, 1.0)])));
        assert_eq!(recorder.playhead_ms(1.0), Some(0.0));
        recorder.apply(RecorderUpdate::RemoveAudio);
        assert!(recorder.audio().is_none());
        assert_eq!(recorder.playhead_ms(1.0), None);
    }

    #[test]
    fn test_recording_interleaves_stereo_input() {
        let ctx = context();
        let (mut recorder, mut reader) = armed(&ctx, 64);
        recorder.apply(RecorderUpdate::StartRecording);
        assert!(recorder.runs_ungated());

        let left = ramp(8, 0.0);
        let right = ramp(8, 100.0);
        record(&mut recorder, &[&left[..], &right[..]]);

        let mut out = vec![0.0f32; 16];
        assert_eq!(reader.dequeue(&mut out), 16);
        assert_eq!(&out[..4], &[0.0, 100.0, 1.0, 101.0]);
        assert_eq!(recorder.playhead(), 8);
    }

    #[test]
    fn test_mono_input_feeds_both_sides() {
        let ctx = context();
        let (mut recorder, mut reader) = armed(&ctx, 64);
        recorder.apply(RecorderUpdate::InputMode(InputMode::Mono(1)));
        recorder.apply(RecorderUpdate::StartRecording);

        let first = ramp(8, 0.0);
        let second = ramp(8, 50.0);
        record(&mut recorder, &[&first[..], &second[..]]);

        let mut out = vec![0.0f32; 16];
        reader.dequeue(&mut out);
        assert_eq!(&out[..4], &[50.0, 50.0, 51.0, 51.0]);
    }

    #[test]
    fn test_overrun_is_counted() {
        let ctx = context();
        let (mut recorder, _reader) = armed(&ctx, 20);
        recorder.apply(RecorderUpdate::StartRecording);

        let input = ramp(8, 0.0);
        record(&mut recorder, &[&input[..]]);
        record(&mut recorder, &[&input[..]]);

        let stats = ctx.stats.snapshot();
        assert_eq!(stats.overruns, 1);
        assert_eq!(stats.samples_dropped, 12);
    }

    #[test]
    fn test_recording_unarmed_discards_input() {
        let ctx = context();
        let mut recorder = SampleRecorder::new(&ctx);
        recorder.apply(RecorderUpdate::StartRecording);

        let input = ramp(8, 0.0);
        record(&mut recorder, &[&input[..]]);
        record(&mut recorder, &[&input[..]]);

        assert_eq!(recorder.playhead(), 0);
        assert_eq!(ctx.stats.snapshot().unarmed_blocks, 2);
    }

    #[test]
    fn test_arm_without_buffer_stays_unarmed() {
        let ctx = context();
        let mut recorder = SampleRecorder::new(&ctx);
        recorder.apply(RecorderUpdate::Arm);
        assert!(!recorder.is_armed());

        let ring = SharedRing::with_capacity::<i16>(16).unwrap();
        recorder.apply(RecorderUpdate::shared_buffer(ring));
        recorder.apply(RecorderUpdate::Arm);
        assert!(!recorder.is_armed());
    }

    #[test]
    fn test_disarm_releases_producer_role() {
        let ctx = context();
        let ring = SharedRing::with_capacity::<f32>(16).unwrap();
        let mut recorder = SampleRecorder::new(&ctx);
        recorder.apply(RecorderUpdate::shared_buffer(ring.clone()));
        recorder.apply(RecorderUpdate::Arm);
        assert!(ring.is_claimed(crate::error::Role::Producer));

        recorder.apply(RecorderUpdate::Disarm);
        assert!(!ring.is_claimed(crate::error::Role::Producer));
    }

    #[test]
    fn test_replacing_ring_releases_old_writer() {
        let ctx = context();
        let first = SharedRing::with_capacity::<f32>(16).unwrap();
        let second = SharedRing::with_capacity::<f32>(16).unwrap();
        let mut recorder = SampleRecorder::new(&ctx);
        recorder.apply(RecorderUpdate::shared_buffer(first.clone()));
        recorder.apply(RecorderUpdate::Arm);

        recorder.apply(RecorderUpdate::shared_buffer(second.clone()));
        assert!(!recorder.is_armed());
        assert!(!first.is_claimed(crate::error::Role::Producer));

        recorder.apply(RecorderUpdate::Arm);
        assert!(second.is_claimed(crate::error::Role::Producer));
    }

    #[test]
    fn test_seek_rounds_to_sample() {
        let ctx = context();
        let mut recorder = SampleRecorder::new(&ctx);
        recorder.seek(10.4, 1000.0 / 48000.0);
        assert_eq!(recorder.playhead(), 499);
    }

    #[test]
    fn test_updates_from_message() {
        let json = r#"{"audio": [[0.5, 0.25]], "arm": true, "stereo": true}"#;
        let mut message = ControlMessage::from_json(json).unwrap();
        let updates = SampleRecorder::updates_from(&mut message);
        assert!(matches!(updates[0], RecorderUpdate::Audio(ref a) if a.len() == 2));
        assert!(matches!(updates[1], RecorderUpdate::InputMode(InputMode::Stereo)));
        assert!(matches!(updates[2], RecorderUpdate::Arm));
        assert_eq!(updates.len(), 3);
    }

    #[test]
    fn test_resident_from_interleaved() {
        let buffer = ResidentBuffer::from_interleaved(&[1.0, -1.0, 2.0, -2.0, 3.0], 2);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.channel(0), Some(&[1.0, 2.0][..]));
        assert_eq!(buffer.channel(1), Some(&[-1.0, -2.0][..]));
    }
}
