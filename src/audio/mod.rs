//! Audio subsystem: sample transport, conversion and device I/O

pub mod buffer;
pub mod capture;
pub mod device;
pub mod engine;
pub mod interleave;
pub mod playback;
pub mod worker;
pub mod writer;

pub use buffer::{RingBuffer, SampleFormat, SharedRing};
pub use capture::AudioCapture;
pub use device::{list_devices, DeviceInfo};
pub use engine::{BlockAdapter, Engine, EngineHandle, TransportControl};
pub use interleave::{deinterleave, interleave};
pub use playback::AudioPlayback;
pub use worker::{RecordingWorker, Take};
pub use writer::{AudioReader, AudioWriter};
