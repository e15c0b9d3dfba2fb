//! Control messages from the non-real-time side
//!
//! The presentation layer posts JSON objects whose fields are all optional.
//! Each field is decoded on its own: a malformed value is logged and
//! skipped, unknown keys are ignored, and the rest of the message still
//! applies. Decoded messages are then split into tagged updates (one variant
//! per mutable field) before crossing to the render context.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::audio::buffer::SharedRing;
use crate::error::ControlError;
use crate::player::notes::ScheduledNote;

/// Updates to the transport state every unit shares
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportUpdate {
    /// Move the playhead (ms)
    Playhead(f64),
    /// Loop start in ms, `None` disables the loop
    LoopStart(Option<f64>),
    /// Loop end in ms
    LoopEnd(f64),
    /// `false` lets the host drop the unit
    ShouldLive(bool),
}

/// Which input channels feed a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    /// First two input channels (a mono input feeds both sides)
    #[default]
    Stereo,
    /// A single input channel feeds both sides
    Mono(usize),
}

/// Position report sent back once per rendered quantum
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PositionReport {
    pub playhead: f64,
}

/// A decoded control message; every field is optional
#[derive(Debug, Clone, Default)]
pub struct ControlMessage {
    pub playhead: Option<f64>,
    /// `Some(None)` disables the loop
    pub loop_start: Option<Option<f64>>,
    pub loop_end: Option<f64>,
    pub should_live: Option<bool>,
    pub instants: Option<Vec<Vec<ScheduledNote>>>,
    pub instant_duration: Option<f64>,
    /// Planar resident audio, one vector per channel
    pub audio: Option<Vec<Vec<f32>>>,
    pub remove_audio: bool,
    /// Ring region for recording; attached in-process, never part of JSON
    pub sab: Option<SharedRing>,
    pub arm: bool,
    pub disarm: bool,
    pub start_recording: bool,
    pub stop_recording: bool,
    pub input_mode: Option<InputMode>,
}

impl ControlMessage {
    /// Decode a JSON object
    pub fn from_json(text: &str) -> Result<Self, ControlError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, ControlError> {
        let Value::Object(mut fields) = value else {
            return Err(ControlError::NotAnObject);
        };

        let mut message = Self {
            playhead: take(&mut fields, "playhead"),
            loop_end: take(&mut fields, "loopEnd"),
            should_live: take(&mut fields, "shouldLive"),
            instants: take(&mut fields, "instants"),
            instant_duration: take(&mut fields, "instant_duration"),
            audio: take(&mut fields, "audio"),
            remove_audio: flag(&mut fields, "removeAudio"),
            arm: flag(&mut fields, "arm"),
            disarm: flag(&mut fields, "disarm"),
            start_recording: flag(&mut fields, "startRecording"),
            stop_recording: flag(&mut fields, "stopRecording"),
            ..Self::default()
        };

        // Null or a negative value disables the loop.
        if let Some(value) = fields.remove("loopStart") {
            message.loop_start = match value {
                Value::Null => Some(None),
                value => {
                    decode::<f64>("loopStart", value).map(|start| (start >= 0.0).then_some(start))
                }
            };
        }

        let channel_num: Option<usize> = take(&mut fields, "channelNum");
        if let Some(stereo) = take::<bool>(&mut fields, "stereo") {
            message.input_mode = Some(if stereo {
                InputMode::Stereo
            } else {
                InputMode::Mono(channel_num.unwrap_or(0))
            });
        }

        if !fields.is_empty() {
            tracing::debug!(
                ignored = ?fields.keys().collect::<Vec<_>>(),
                "Ignoring unknown control fields"
            );
        }

        Ok(message)
    }

    /// Attach a ring region for the recorder
    pub fn with_shared_ring(mut self, ring: SharedRing) -> Self {
        self.sab = Some(ring);
        self
    }

    /// The transport updates carried by this message, in application order
    pub fn transport_updates(&self) -> Vec<TransportUpdate> {
        let mut updates = Vec::new();
        if let Some(playhead) = self.playhead {
            updates.push(TransportUpdate::Playhead(playhead));
        }
        if let Some(loop_start) = self.loop_start {
            updates.push(TransportUpdate::LoopStart(loop_start));
        }
        if let Some(loop_end) = self.loop_end {
            updates.push(TransportUpdate::LoopEnd(loop_end));
        }
        if let Some(should_live) = self.should_live {
            updates.push(TransportUpdate::ShouldLive(should_live));
        }
        updates
    }
}

fn decode<T: DeserializeOwned>(name: &str, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            tracing::warn!(field = name, error = %e, "Ignoring malformed control field");
            None
        }
    }
}

fn take<T: DeserializeOwned>(fields: &mut Map<String, Value>, name: &str) -> Option<T> {
    fields.remove(name).and_then(|value| decode(name, value))
}

/// Presence flags: the key alone sets them, whatever its value
fn flag(fields: &mut Map<String, Value>, name: &str) -> bool {
    fields.remove(name).is_some()
}
