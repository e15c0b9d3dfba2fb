//! Track management module

pub mod manager;
pub mod track;

pub use manager::TrackManager;
pub use track::{Track, TrackKind, TrackState, TrackStatus};
