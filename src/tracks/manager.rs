//! Control-side track registry
//!
//! Creates units for the engine, keeps their control handles and owns the
//! recording lifecycle: arm (allocate and attach a ring buffer), start
//! (spawn the drain worker), stop (collect the take and load it back into
//! the recorder), disarm and remove.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;

use super::track::{RecorderControl, Track, TrackControl, TrackState, TrackStatus};
use crate::audio::buffer::SharedRing;
use crate::audio::worker::{RecordingWorker, Take};
use crate::audio::writer::AudioReader;
use crate::config::AppConfig;
use crate::constants::{MAX_TRACKS, STOP_CONFIRM_QUANTA, STOP_CONFIRM_TIMEOUT_MS};
use crate::control::{ControlMessage, TransportUpdate};
use crate::error::TrackError;
use crate::player::notes::{NoteFill, NoteSchedule};
use crate::player::recorder::{RecorderUpdate, SampleRecorder};
use crate::player::{AudioUnit, Player, UnitContext};

pub struct TrackManager {
    tracks: RwLock<HashMap<u8, Track>>,
    config: AppConfig,
    context: UnitContext,
}

impl TrackManager {
    pub fn new(config: AppConfig) -> Self {
        let context = UnitContext::from_config(&config);
        Self::with_context(config, context)
    }

    /// Share counters and the note event queue with other components
    pub fn with_context(config: AppConfig, context: UnitContext) -> Self {
        Self {
            tracks: RwLock::new(HashMap::new()),
            config,
            context,
        }
    }

    pub fn context(&self) -> &UnitContext {
        &self.context
    }

    pub fn track_count(&self) -> usize {
        self.tracks.read().len()
    }

    /// Create a scheduled-note track; the unit goes to the engine
    pub fn create_note_track(
        &self,
        name: &str,
        schedule: Option<NoteSchedule>,
    ) -> Result<(u8, Box<dyn AudioUnit>), TrackError> {
        let events = self.context.events.clone();
        let mut fill = NoteFill::new(events, self.context.instant_duration_ms)?;
        if let Some(schedule) = schedule {
            fill = fill.with_schedule(schedule);
        }
        let (player, handle) = Player::new(fill, &self.context);
        let id = self.insert(name, TrackControl::Notes(handle))?;
        Ok((id, Box::new(player)))
    }

    /// Create a recorder track; the unit goes to the engine
    pub fn create_recorder_track(
        &self,
        name: &str,
    ) -> Result<(u8, Box<dyn AudioUnit>), TrackError> {
        let (player, handle) = Player::new(SampleRecorder::new(&self.context), &self.context);
        let id = self.insert(
            name,
            TrackControl::Recorder(RecorderControl {
                handle,
                ring: None,
                worker: None,
            }),
        )?;
        Ok((id, Box::new(player)))
    }

    fn insert(&self, name: &str, control: TrackControl) -> Result<u8, TrackError> {
        let mut tracks = self.tracks.write();
        let id = (0..MAX_TRACKS as u8)
            .find(|id| !tracks.contains_key(id))
            .ok_or(TrackError::MaxTracksReached(MAX_TRACKS))?;
        tracks.insert(id, Track::new(id, name.to_string(), control));
        tracing::info!("Created track {} ({})", id, name);
        Ok(id)
    }

    /// Remove a track and release its unit
    pub fn remove_track(&self, id: u8) -> Result<(), TrackError> {
        let track = self.tracks.write().remove(&id).ok_or(TrackError::NotFound(id))?;
        if track.state == TrackState::Recording {
            tracing::warn!("Removing track {} while recording, the take is discarded", id);
        }
        track.retire();
        tracing::info!("Removed track {}", id);
        Ok(())
    }

    /// Forward a control message to one track
    pub fn post(&self, id: u8, message: ControlMessage) -> Result<usize, TrackError> {
        let tracks = self.tracks.read();
        let track = tracks.get(&id).ok_or(TrackError::NotFound(id))?;
        track.post(message)
    }

    /// Send the same transport update to every track
    ///
    /// Tracks whose unit is gone are skipped and logged.
    pub fn broadcast(&self, update: TransportUpdate) {
        for track in self.tracks.read().values() {
            if let Err(e) = track.transport(update) {
                tracing::warn!("Track {} did not take {:?}: {}", track.id, update, e);
            }
        }
    }

    /// Allocate a ring buffer for the track and arm its recorder
    pub fn arm(&self, id: u8) -> Result<(), TrackError> {
        let mut tracks = self.tracks.write();
        let track = tracks.get_mut(&id).ok_or(TrackError::NotFound(id))?;
        if track.state != TrackState::Idle {
            return Ok(());
        }

        let recorder = track.recorder_mut()?;
        let ring = SharedRing::with_capacity::<f32>(self.config.ring_capacity())?;
        let sent = recorder
            .handle
            .fill(RecorderUpdate::shared_buffer(ring.clone()))
            .and_then(|()| recorder.handle.fill(RecorderUpdate::Arm));
        recorder.ring = Some(ring);
        sent.map_err(|e| track.control_error(e))?;

        track.state = TrackState::Armed;
        tracing::info!(capacity = self.config.ring_capacity(), "Armed track {}", id);
        Ok(())
    }

    /// Start recording; must be called from within a tokio runtime
    pub fn start_recording(&self, id: u8) -> Result<(), TrackError> {
        let mut tracks = self.tracks.write();
        let track = tracks.get_mut(&id).ok_or(TrackError::NotFound(id))?;
        match track.state {
            TrackState::Idle => return Err(TrackError::NotArmed(id)),
            TrackState::Recording => return Err(TrackError::AlreadyRecording(id)),
            TrackState::Armed => {}
        }

        let recorder = track.recorder_mut()?;
        let ring = recorder.ring.as_ref().ok_or(TrackError::NotArmed(id))?;
        let reader = AudioReader::from_shared(ring)?;
        let sent = recorder.handle.fill(RecorderUpdate::StartRecording);
        if sent.is_ok() {
            recorder.worker = Some(RecordingWorker::spawn(reader, &self.config.recording));
        }
        sent.map_err(|e| track.control_error(e))?;

        track.state = TrackState::Recording;
        tracing::info!("Track {} recording", id);
        Ok(())
    }

    /// Stop recording, collect the take and load it back as the track's audio
    ///
    /// The unit is given a couple of quanta to see the stop before the
    /// worker's final drain, so nothing it enqueued is left behind.
    pub async fn stop_recording(&self, id: u8) -> Result<Take, TrackError> {
        let (worker, watch) = {
            let mut tracks = self.tracks.write();
            let track = tracks.get_mut(&id).ok_or(TrackError::NotFound(id))?;
            if track.state != TrackState::Recording {
                return Err(TrackError::NotRecording(id));
            }
            let watch = track.position_watch();
            let recorder = track.recorder_mut()?;
            let worker = recorder.worker.take();
            let sent = recorder.handle.fill(RecorderUpdate::StopRecording);
            track.state = TrackState::Armed;
            sent.map_err(|e| track.control_error(e))?;
            (worker, watch)
        };

        let confirmed = watch
            .wait_for_quanta(STOP_CONFIRM_QUANTA, Duration::from_millis(STOP_CONFIRM_TIMEOUT_MS))
            .await;
        if !confirmed {
            tracing::debug!("Track {} did not render after stop, draining anyway", id);
        }

        let take = match worker {
            Some(worker) => worker
                .finish()
                .await
                .map_err(|e| TrackError::Worker(id, e.to_string()))?,
            None => Take::default(),
        };
        tracing::info!(frames = take.frames(), "Track {} stopped recording", id);

        self.post_update(id, RecorderUpdate::audio(take.clone().into_resident()))?;
        Ok(take)
    }

    /// Release the track's ring buffer
    pub fn disarm(&self, id: u8) -> Result<(), TrackError> {
        let mut tracks = self.tracks.write();
        let track = tracks.get_mut(&id).ok_or(TrackError::NotFound(id))?;
        match track.state {
            TrackState::Recording => return Err(TrackError::AlreadyRecording(id)),
            TrackState::Idle => return Ok(()),
            TrackState::Armed => {}
        }

        let recorder = track.recorder_mut()?;
        recorder.ring = None;
        let sent = recorder.handle.fill(RecorderUpdate::Disarm);
        track.state = TrackState::Idle;
        sent.map_err(|e| track.control_error(e))?;
        tracing::info!("Disarmed track {}", id);
        Ok(())
    }

    fn post_update(&self, id: u8, update: RecorderUpdate) -> Result<(), TrackError> {
        let mut tracks = self.tracks.write();
        let track = tracks.get_mut(&id).ok_or(TrackError::NotFound(id))?;
        let sent = track.recorder_mut()?.handle.fill(update);
        sent.map_err(|e| track.control_error(e))
    }

    pub fn state(&self, id: u8) -> Result<TrackState, TrackError> {
        self.tracks
            .read()
            .get(&id)
            .map(|track| track.state)
            .ok_or(TrackError::NotFound(id))
    }

    /// Status of every track, refreshed from the latest position reports
    pub fn statuses(&self) -> Vec<TrackStatus> {
        let mut tracks = self.tracks.write();
        let mut statuses: Vec<TrackStatus> = tracks
            .values_mut()
            .map(|track| {
                track.refresh_playhead();
                track.status()
            })
            .collect();
        statuses.sort_by_key(|status| status.id);
        statuses
    }
}
