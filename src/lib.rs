//! # Track Transport
//!
//! Wait-free sample transport and per-block playback scheduling for a
//! multitrack audio/MIDI editor.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────── CONTROL SIDE ───────────────────────────────┐
//! │                                                                             │
//! │  JSON control message ──► ControlMessage ──► TrackManager (tracks)          │
//! │                                                 │                           │
//! │            ┌────────────────────────────────────┼──────────────────┐        │
//! │            ▼                                    ▼                  ▼        │
//! │   PlayerHandle<NoteFill>            PlayerHandle<SampleRecorder>  RecordingWorker
//! │   (tagged updates ▼ / reports ▲)    (tagged updates ▼ / reports ▲)  (tokio task)
//! │            │                                    │                  ▲        │
//! └────────────┼────────────────────────────────────┼──────────────────┼────────┘
//!              │ crossbeam-channel                  │                  │ AudioReader
//! ┌────────────┼──────────── RENDER THREAD ─────────┼──────────────────┼────────┐
//! │            ▼                                    ▼                  │        │
//! │   Player<NoteFill>                     Player<SampleRecorder> ─────┘        │
//! │   PlayerState: gate ► loop ► advance   PlayerState: gate ► loop ► advance   │
//! │   fill: note events + voices           fill: interleave ► AudioWriter       │
//! │            │                                    │       (SPSC RingBuffer)   │
//! │            └──────────────► Engine ◄────────────┘                           │
//! │                  (one render quantum at a time, BlockAdapter)               │
//! │                    ▲ capture ring                │ mix                      │
//! └────────────────────┼─────────────────────────────┼──────────────────────────┘
//!                 cpal input                    cpal output
//! ```

pub mod audio;
pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod gc;
pub mod player;
pub mod stats;
pub mod tracks;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default device channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Frames per render quantum
    pub const RENDER_QUANTUM: usize = 128;

    /// Channels carried by a recording ring (interleaved stereo)
    pub const RECORD_CHANNELS: usize = 2;

    /// Seconds of audio each recording ring holds
    pub const RING_BUFFER_SECONDS: f32 = 1.0;

    /// Period of the recording drain worker
    pub const DRAIN_INTERVAL_MS: u64 = 10;

    /// Samples moved per dequeue by the drain worker
    pub const DRAIN_CHUNK: usize = 4096;

    /// Default note schedule bucket length
    pub const DEFAULT_INSTANT_DURATION_MS: f64 = 1000.0;

    /// Pending control updates per unit
    pub const COMMAND_QUEUE_CAPACITY: usize = 256;

    /// Undelivered position reports per unit
    pub const REPORT_QUEUE_CAPACITY: usize = 64;

    /// Undelivered note events
    pub const EVENT_QUEUE_CAPACITY: usize = 1024;

    /// Automation values at or above this read as "on"
    pub const PLAYING_THRESHOLD: f32 = 0.5;

    /// A note's release lands this far before its nominal end
    pub const NOTE_OFF_GUARD_MS: f64 = 0.001;

    /// Maximum number of concurrent tracks
    pub const MAX_TRACKS: usize = 16;

    /// Simultaneous note voices per track
    pub const MAX_VOICES: usize = 32;

    /// Quanta a recorder must render after a stop before the final drain
    pub const STOP_CONFIRM_QUANTA: usize = 2;

    /// Upper bound on waiting for those quanta
    pub const STOP_CONFIRM_TIMEOUT_MS: u64 = 100;
}
