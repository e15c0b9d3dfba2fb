//! Error types for the transport core
//!
//! Only setup can fail. Once streaming has started, supply/demand
//! mismatches are reported through short counts and counters instead.

use thiserror::Error;

use crate::audio::buffer::SampleFormat;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Interleave error: {0}")]
    Interleave(#[from] InterleaveError),

    #[error("Control error: {0}")]
    Control(#[from] ControlError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("Track error: {0}")]
    Track(#[from] TrackError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ring buffer construction errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("Capacity must be at least 1 element")]
    ZeroCapacity,

    #[error("Region of {byte_len} bytes is too small for a {format} ring buffer")]
    TooSmall { byte_len: usize, format: SampleFormat },

    #[error("Region of {byte_len} bytes does not hold a whole number of {format} elements")]
    Misaligned { byte_len: usize, format: SampleFormat },

    #[error("{slots} storage slots cannot be addressed by a 32-bit cursor")]
    TooLarge { slots: usize },

    #[error("Element type mismatch: expected {expected}, region holds {found}")]
    ElementMismatch { expected: SampleFormat, found: SampleFormat },

    #[error("The {0} role of this ring buffer is already claimed")]
    RoleTaken(Role),
}

/// The two fixed roles of an SPSC ring buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Producer,
    Consumer,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Producer => f.write_str("producer"),
            Role::Consumer => f.write_str("consumer"),
        }
    }
}

/// Planar/interleaved conversion errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterleaveError {
    #[error("input and output of incompatible sizes: expected {expected} samples, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("channel {channel} has {actual} samples, expected {expected}")]
    RaggedChannel { channel: usize, expected: usize, actual: usize },
}

/// Control message decoding errors
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Malformed control message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Control message must be a JSON object")]
    NotAnObject,

    #[error("Update queue is full")]
    QueueFull,

    #[error("Audio unit has been dropped")]
    Disconnected,
}

/// Note schedule construction errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    #[error("Instant duration must be a positive number of milliseconds, got {0}")]
    InvalidInstantDuration(f64),
}

/// Audio device and stream errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Track registry errors
#[derive(Error, Debug)]
pub enum TrackError {
    #[error("Track not found: {0}")]
    NotFound(u8),

    #[error("Maximum tracks reached: {0}")]
    MaxTracksReached(usize),

    #[error("Track {0} does not record")]
    NotARecorder(u8),

    #[error("Track {0} is not armed")]
    NotArmed(u8),

    #[error("Track {0} is already recording")]
    AlreadyRecording(u8),

    #[error("Track {0} is not recording")]
    NotRecording(u8),

    #[error("Track {0} audio unit is gone")]
    Disconnected(u8),

    #[error("Recording worker for track {0} failed: {1}")]
    Worker(u8, String),

    #[error("Control update rejected: {0}")]
    Control(#[from] ControlError),

    #[error("Ring buffer setup failed: {0}")]
    Buffer(#[from] BufferError),

    #[error("Note schedule rejected: {0}")]
    Schedule(#[from] ScheduleError),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
