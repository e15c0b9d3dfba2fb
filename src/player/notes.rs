//! Scheduled-note fill strategy
//!
//! Notes are grouped into fixed-duration buckets ("instants") so a quantum
//! only has to look at the bucket(s) its window touches. Every note that
//! starts inside the window emits an activation/deactivation pair on the
//! event queue and a short sine voice into the outputs.
//!
//! Bucket storage is a `basedrop::Shared`, allocated on the control side.
//! A schedule replaced or cleared on the render thread is freed by the
//! collector thread.

use basedrop::Shared;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::fmt;
use std::sync::Arc;

use super::{FillStrategy, PlayWindow, PlayerState, ProcessBlock};
use crate::constants::{MAX_VOICES, NOTE_OFF_GUARD_MS};
use crate::control::ControlMessage;
use crate::error::ScheduleError;
use crate::events::{EventQueue, NoteEvent};
use crate::gc::gc_handle;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// MIDI note number
    pub note: u8,
    pub velocity: u8,
    pub channel: u8,
    /// Milliseconds
    pub duration: f64,
}

impl Note {
    pub fn frequency(&self) -> f64 {
        440.0 * 2f64.powf((self.note as f64 - 69.0) / 12.0)
    }
}

/// A note positioned relative to the start of its bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduledNote {
    /// Milliseconds from the bucket start
    pub offset: f64,
    pub note: Note,
}

/// Bucket storage shared with the render thread
pub type NoteBuckets = Shared<Vec<Vec<ScheduledNote>>>;

/// Wrap buckets for handing to the render thread
pub fn share_buckets(buckets: Vec<Vec<ScheduledNote>>) -> NoteBuckets {
    Shared::new(&gc_handle(), buckets)
}

/// Reject durations that would make bucket indexing meaningless
pub fn validate_instant_duration(instant_duration: f64) -> Result<f64, ScheduleError> {
    if instant_duration.is_finite() && instant_duration > 0.0 {
        Ok(instant_duration)
    } else {
        Err(ScheduleError::InvalidInstantDuration(instant_duration))
    }
}

/// Notes bucketed by `instant_duration` milliseconds
#[derive(Clone)]
pub struct NoteSchedule {
    buckets: NoteBuckets,
    instant_duration: f64,
}

impl fmt::Debug for NoteSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoteSchedule")
            .field("buckets", &self.buckets.len())
            .field("instant_duration", &self.instant_duration)
            .finish()
    }
}

impl NoteSchedule {
    pub fn from_buckets(
        buckets: Vec<Vec<ScheduledNote>>,
        instant_duration: f64,
    ) -> Result<Self, ScheduleError> {
        let instant_duration = validate_instant_duration(instant_duration)?;
        Ok(Self::from_shared(share_buckets(buckets), instant_duration))
    }

    /// `instant_duration` must already be validated
    fn from_shared(buckets: NoteBuckets, instant_duration: f64) -> Self {
        Self {
            buckets,
            instant_duration,
        }
    }

    /// Bucket notes given by absolute start time in milliseconds
    ///
    /// Notes with a negative or non-finite start are discarded.
    pub fn from_notes(notes: &[(f64, Note)], instant_duration: f64) -> Result<Self, ScheduleError> {
        let instant_duration = validate_instant_duration(instant_duration)?;
        let mut buckets: Vec<Vec<ScheduledNote>> = Vec::new();
        for &(start, note) in notes {
            if !start.is_finite() || start < 0.0 {
                tracing::warn!(start, "Dropping note scheduled outside the timeline");
                continue;
            }
            let index = (start / instant_duration).floor();
            if index > u32::MAX as f64 {
                tracing::warn!(start, instant_duration, "Dropping note beyond the last bucket");
                continue;
            }
            let index = index as usize;
            if buckets.len() <= index {
                buckets.resize_with(index + 1, Vec::new);
            }
            buckets[index].push(ScheduledNote {
                offset: start - index as f64 * instant_duration,
                note,
            });
        }
        for bucket in &mut buckets {
            bucket.sort_by(|a, b| a.offset.total_cmp(&b.offset));
        }
        Ok(Self::from_shared(share_buckets(buckets), instant_duration))
    }

    pub fn bucket(&self, index: usize) -> Option<&[ScheduledNote]> {
        self.buckets.get(index).map(Vec::as_slice)
    }

    /// Number of buckets
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn instant_duration(&self) -> f64 {
        self.instant_duration
    }

    fn set_instant_duration(&mut self, instant_duration: f64) {
        self.instant_duration = instant_duration;
    }
}

#[derive(Clone)]
pub enum NoteUpdate {
    Instants(NoteBuckets),
    InstantDuration(f64),
    Clear,
}

impl fmt::Debug for NoteUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoteUpdate::Instants(buckets) => write!(f, "Instants({} buckets)", buckets.len()),
            NoteUpdate::InstantDuration(duration) => write!(f, "InstantDuration({duration})"),
            NoteUpdate::Clear => f.write_str("Clear"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Voice {
    phase: f64,
    step: f64,
    amplitude: f32,
    /// Samples to wait before sounding, within the current block
    delay: usize,
    remaining: usize,
    total: usize,
}

impl Voice {
    fn render(&mut self, outputs: &mut [&mut [f32]]) {
        let len = outputs.first().map_or(0, |channel| channel.len());
        let start = self.delay.min(len);
        self.delay -= start;

        for i in start..len {
            if self.remaining == 0 {
                break;
            }
            // Linear release so the voice ends without a click
            let envelope = self.remaining as f32 / self.total as f32;
            let sample = (self.phase.sin() as f32) * self.amplitude * envelope;
            for channel in outputs.iter_mut() {
                channel[i] += sample;
            }
            self.phase = (self.phase + self.step) % TAU;
            self.remaining -= 1;
        }
    }
}

/// Plays a [`NoteSchedule`]
pub struct NoteFill {
    schedule: Option<NoteSchedule>,
    instant_duration: f64,
    events: Arc<EventQueue>,
    voices: Vec<Voice>,
}

impl NoteFill {
    pub fn new(events: Arc<EventQueue>, instant_duration: f64) -> Result<Self, ScheduleError> {
        Ok(Self {
            schedule: None,
            instant_duration: validate_instant_duration(instant_duration)?,
            events,
            voices: Vec::with_capacity(MAX_VOICES),
        })
    }

    pub fn with_schedule(mut self, schedule: NoteSchedule) -> Self {
        self.instant_duration = schedule.instant_duration();
        self.schedule = Some(schedule);
        self
    }

    pub fn schedule(&self) -> Option<&NoteSchedule> {
        self.schedule.as_ref()
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    fn trigger(&mut self, note: &Note, time_ms: f64, ms_per_sample: f64) {
        let Note {
            note: pitch,
            velocity,
            channel,
            duration,
        } = *note;

        self.events.push(NoteEvent::activate(channel, pitch, velocity, time_ms));
        let release = time_ms + (duration - NOTE_OFF_GUARD_MS).max(0.0);
        self.events.push(NoteEvent::deactivate(channel, pitch, velocity, release));

        let total = (duration / ms_per_sample).round() as usize;
        if total == 0 {
            return;
        }
        if self.voices.len() == MAX_VOICES {
            self.voices.remove(0);
        }
        self.voices.push(Voice {
            phase: 0.0,
            step: TAU * note.frequency() * ms_per_sample / 1000.0,
            amplitude: 0.2 * velocity as f32 / 127.0,
            delay: (time_ms / ms_per_sample).floor() as usize,
            remaining: total,
            total,
        });
    }
}

impl FillStrategy for NoteFill {
    type Update = NoteUpdate;

    fn updates_from(message: &mut ControlMessage) -> Vec<NoteUpdate> {
        let mut updates = Vec::new();
        if let Some(duration) = message.instant_duration.take() {
            updates.push(NoteUpdate::InstantDuration(duration));
        }
        if let Some(instants) = message.instants.take() {
            updates.push(NoteUpdate::Instants(share_buckets(instants)));
        }
        updates
    }

    fn apply(&mut self, update: NoteUpdate) {
        match update {
            NoteUpdate::Instants(buckets) => {
                tracing::debug!(buckets = buckets.len(), "Loaded note schedule");
                self.schedule = Some(NoteSchedule::from_shared(buckets, self.instant_duration));
            }
            NoteUpdate::InstantDuration(duration) => match validate_instant_duration(duration) {
                Ok(duration) => {
                    self.instant_duration = duration;
                    if let Some(schedule) = &mut self.schedule {
                        schedule.set_instant_duration(duration);
                    }
                }
                Err(e) => tracing::warn!("Ignoring instant duration update: {}", e),
            },
            NoteUpdate::Clear => {
                self.schedule = None;
                self.voices.clear();
            }
        }
    }

    fn fill(
        &mut self,
        window: &PlayWindow,
        _transport: &PlayerState,
        block: &mut ProcessBlock<'_, '_>,
    ) {
        if let Some(schedule) = self.schedule.take() {
            let d = schedule.instant_duration();
            // A window can straddle a bucket boundary; scan every bucket it touches.
            let first = (window.from / d).floor().max(0.0) as usize;
            let last = ((window.to / d).ceil() as usize).saturating_sub(1).max(first);

            for index in first..=last {
                let Some(bucket) = schedule.bucket(index) else {
                    continue;
                };
                let bucket_start = index as f64 * d;
                let local_from = window.from - bucket_start;
                let local_to = window.to - bucket_start;

                for scheduled in bucket {
                    if local_from <= scheduled.offset && scheduled.offset < local_to {
                        let time_ms = scheduled.offset - local_from;
                        self.trigger(&scheduled.note, time_ms, window.ms_per_sample);
                    }
                }
            }
            self.schedule = Some(schedule);
        }

        for voice in &mut self.voices {
            voice.render(block.outputs);
        }
        self.voices.retain(|voice| voice.remaining > 0);
    }

    fn seek(&mut self, _playhead_ms: f64, _ms_per_sample: f64) {
        self.voices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoteEventKind;
    use crate::player::AutomationParams;

    fn note(pitch: u8, duration: f64) -> Note {
        Note {
            note: pitch,
            velocity: 100,
            channel: 2,
            duration,
        }
    }

    fn render(fill: &mut NoteFill, from: f64, to: f64) -> Vec<f32> {
        let len = (to - from) as usize;
        let mut left = vec![0.0f32; len];
        let mut right = vec![0.0f32; len];
        let params = AutomationParams::control_rate(true, false);
        let mut outputs = [&mut left[..], &mut right[..]];
        let mut block = ProcessBlock {
            inputs: &[],
            outputs: &mut outputs,
            params: &params,
        };
        let window = PlayWindow {
            from,
            to,
            ms_per_sample: 1.0,
        };
        fill.fill(&window, &PlayerState::default(), &mut block);
        assert_eq!(left, right);
        left
    }

    #[test]
    fn test_note_in_window_emits_pair_and_sound() {
        let events = Arc::new(EventQueue::new(16));
        let schedule = NoteSchedule::from_buckets(
            vec![vec![ScheduledNote {
                offset: 10.0,
                note: note(60, 250.0),
            }]],
            1000.0,
        )
        .unwrap();
        let mut fill = NoteFill::new(Arc::clone(&events), 1000.0).unwrap().with_schedule(schedule);

        let out = render(&mut fill, 0.0, 100.0);
        assert!(out[..=10].iter().all(|&s| s == 0.0));
        assert!(out[11..].iter().any(|&s| s != 0.0));

        let emitted = events.drain();
        assert_eq!(emitted.len(), 2);
        assert_eq!(emitted[0].kind, NoteEventKind::Activate);
        assert_eq!(emitted[0].bytes, [0x92, 60, 100]);
        assert_eq!(emitted[0].time_ms, 10.0);
        assert_eq!(emitted[1].kind, NoteEventKind::Deactivate);
        assert_eq!(emitted[1].bytes, [0x82, 60, 100]);
        assert!((emitted[1].time_ms - (10.0 + 250.0 - NOTE_OFF_GUARD_MS)).abs() < 1e-9);
    }

    #[test]
    fn test_note_outside_window_is_silent() {
        let events = Arc::new(EventQueue::new(16));
        let schedule = NoteSchedule::from_notes(&[(150.0, note(60, 50.0))], 1000.0).unwrap();
        let mut fill = NoteFill::new(Arc::clone(&events), 1000.0).unwrap().with_schedule(schedule);

        let out = render(&mut fill, 0.0, 100.0);
        assert!(out.iter().all(|&s| s == 0.0));
        assert!(events.is_empty());
    }

    #[test]
    fn test_window_straddling_buckets_sees_both() {
        let events = Arc::new(EventQueue::new(16));
        let notes = [(990.0, note(60, 50.0)), (1020.0, note(64, 50.0))];
        let schedule = NoteSchedule::from_notes(&notes, 1000.0).unwrap();
        let mut fill = NoteFill::new(Arc::clone(&events), 1000.0).unwrap().with_schedule(schedule);

        render(&mut fill, 950.0, 1050.0);
        let starts: Vec<_> = events
            .drain()
            .into_iter()
            .filter(|e| e.kind == NoteEventKind::Activate)
            .map(|e| (e.note(), e.time_ms))
            .collect();
        assert_eq!(starts, vec![(60, 40.0), (64, 70.0)]);
    }

    #[test]
    fn test_missing_schedule_or_bucket_is_silent() {
        let events = Arc::new(EventQueue::new(16));
        let mut fill = NoteFill::new(Arc::clone(&events), 1000.0).unwrap();
        assert!(render(&mut fill, 0.0, 100.0).iter().all(|&s| s == 0.0));

        fill.apply(NoteUpdate::Instants(share_buckets(vec![vec![]])));
        assert!(render(&mut fill, 5000.0, 5100.0).iter().all(|&s| s == 0.0));
        assert!(events.is_empty());
    }

    #[test]
    fn test_voice_carries_into_next_block() {
        let events = Arc::new(EventQueue::new(16));
        let schedule = NoteSchedule::from_notes(&[(90.0, note(69, 50.0))], 1000.0).unwrap();
        let mut fill = NoteFill::new(events, 1000.0).unwrap().with_schedule(schedule);

        render(&mut fill, 0.0, 100.0);
        assert_eq!(fill.active_voices(), 1);
        let out = render(&mut fill, 100.0, 200.0);
        assert!(out[..40].iter().any(|&s| s != 0.0));
        assert!(out[40..].iter().all(|&s| s == 0.0));
        assert_eq!(fill.active_voices(), 0);
    }

    #[test]
    fn test_from_notes_buckets_by_start() {
        let schedule = NoteSchedule::from_notes(
            &[(2500.0, note(62, 10.0)), (100.0, note(60, 10.0)), (-5.0, note(61, 10.0))],
            1000.0,
        )
        .unwrap();
        assert_eq!(schedule.len(), 3);
        assert_eq!(schedule.bucket(0).unwrap()[0].offset, 100.0);
        assert!(schedule.bucket(1).unwrap().is_empty());
        assert_eq!(schedule.bucket(2).unwrap()[0].offset, 500.0);
        assert_eq!(schedule.bucket(2).unwrap()[0].note.note, 62);
    }

    #[test]
    fn test_updates_from_message() {
        let json = r#"{"instants": [[]], "instant_duration": 250, "playhead": 3}"#;
        let mut message = ControlMessage::from_json(json).unwrap();
        let updates = NoteFill::updates_from(&mut message);
        assert_eq!(updates.len(), 2);
        assert!(message.instants.is_none());
        assert_eq!(message.playhead, Some(3.0));
    }

    #[test]
    fn test_invalid_instant_duration_is_rejected() {
        let notes = [(100.0, note(60, 10.0))];
        for duration in [0.0, -250.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                NoteSchedule::from_notes(&notes, duration),
                Err(ScheduleError::InvalidInstantDuration(_))
            ));
            assert!(NoteSchedule::from_buckets(vec![vec![]], duration).is_err());
            assert!(NoteFill::new(Arc::new(EventQueue::new(4)), duration).is_err());
        }
    }

    #[test]
    fn test_unreachable_bucket_is_dropped() {
        let notes = [(1.0e12, note(60, 10.0)), (5.0, note(62, 10.0))];
        let schedule = NoteSchedule::from_notes(&notes, 0.5).unwrap();
        assert_eq!(schedule.len(), 11);
        assert_eq!(schedule.bucket(10).unwrap()[0].note.note, 62);
    }

    #[test]
    fn test_invalid_duration_update_keeps_schedule_playable() {
        let events = Arc::new(EventQueue::new(16));
        let schedule = NoteSchedule::from_notes(&[(10.0, note(60, 20.0))], 1000.0).unwrap();
        let mut fill = NoteFill::new(Arc::clone(&events), 1000.0).unwrap().with_schedule(schedule);

        fill.apply(NoteUpdate::InstantDuration(0.0));
        fill.apply(NoteUpdate::InstantDuration(f64::NAN));
        assert_eq!(fill.schedule().unwrap().instant_duration(), 1000.0);

        render(&mut fill, 0.0, 100.0);
        assert_eq!(events.len(), 2);
    }
}
