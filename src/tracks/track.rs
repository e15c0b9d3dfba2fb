//! A single track as seen from the control side

use serde::Serialize;

use crate::audio::buffer::SharedRing;
use crate::audio::worker::RecordingWorker;
use crate::control::{ControlMessage, TransportUpdate};
use crate::error::{ControlError, TrackError};
use crate::player::notes::NoteFill;
use crate::player::recorder::SampleRecorder;
use crate::player::{PlayerHandle, PositionWatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Notes,
    Recorder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    Idle,
    Armed,
    Recording,
}

/// Snapshot of a track for listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackStatus {
    pub id: u8,
    pub name: String,
    pub kind: TrackKind,
    pub state: TrackState,
    /// Most recent reported playhead in ms
    pub playhead: Option<f64>,
}

/// Recording resources owned by a recorder track
pub(crate) struct RecorderControl {
    pub(crate) handle: PlayerHandle<SampleRecorder>,
    pub(crate) ring: Option<SharedRing>,
    pub(crate) worker: Option<RecordingWorker>,
}

pub(crate) enum TrackControl {
    Notes(PlayerHandle<NoteFill>),
    Recorder(RecorderControl),
}

pub struct Track {
    pub id: u8,
    pub name: String,
    pub state: TrackState,
    pub(crate) control: TrackControl,
    last_playhead: Option<f64>,
}

impl Track {
    pub(crate) fn new(id: u8, name: String, control: TrackControl) -> Self {
        Self {
            id,
            name,
            state: TrackState::Idle,
            control,
            last_playhead: None,
        }
    }

    pub fn kind(&self) -> TrackKind {
        match self.control {
            TrackControl::Notes(_) => TrackKind::Notes,
            TrackControl::Recorder(_) => TrackKind::Recorder,
        }
    }

    /// Forward a control message to the track's unit
    pub fn post(&self, message: ControlMessage) -> Result<usize, TrackError> {
        let result = match &self.control {
            TrackControl::Notes(handle) => handle.post(message),
            TrackControl::Recorder(recorder) => recorder.handle.post(message),
        };
        result.map_err(|e| self.control_error(e))
    }

    pub fn transport(&self, update: TransportUpdate) -> Result<(), TrackError> {
        let result = match &self.control {
            TrackControl::Notes(handle) => handle.transport(update),
            TrackControl::Recorder(recorder) => recorder.handle.transport(update),
        };
        result.map_err(|e| self.control_error(e))
    }

    pub fn position_watch(&self) -> PositionWatch {
        match &self.control {
            TrackControl::Notes(handle) => handle.position_watch(),
            TrackControl::Recorder(recorder) => recorder.handle.position_watch(),
        }
    }

    /// Drain position reports and remember the newest one
    pub fn refresh_playhead(&mut self) -> Option<f64> {
        let latest = match &self.control {
            TrackControl::Notes(handle) => handle.latest_position(),
            TrackControl::Recorder(recorder) => recorder.handle.latest_position(),
        };
        if latest.is_some() {
            self.last_playhead = latest;
        }
        self.last_playhead
    }

    pub fn status(&self) -> TrackStatus {
        TrackStatus {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind(),
            state: self.state,
            playhead: self.last_playhead,
        }
    }

    pub(crate) fn recorder_mut(&mut self) -> Result<&mut RecorderControl, TrackError> {
        match &mut self.control {
            TrackControl::Recorder(recorder) => Ok(recorder),
            TrackControl::Notes(_) => Err(TrackError::NotARecorder(self.id)),
        }
    }

    pub(crate) fn control_error(&self, error: ControlError) -> TrackError {
        match error {
            ControlError::Disconnected => TrackError::Disconnected(self.id),
            other => TrackError::Control(other),
        }
    }

    /// Tell the unit to stop living; the host drops it on its next quantum
    pub(crate) fn retire(self) {
        match self.control {
            TrackControl::Notes(handle) => handle.retire(),
            TrackControl::Recorder(recorder) => {
                recorder.handle.retire();
                // Dropping the worker's stop signal ends its loop
                drop(recorder.worker);
            }
        }
    }
}
