//! Parameter automation inputs
//!
//! A parameter arrives either once per block (control rate) or once per
//! sample (sample rate). A per-sample array shorter than the block falls
//! back to its first value.

use crate::constants::PLAYING_THRESHOLD;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Param<'a> {
    Constant(f32),
    PerSample(&'a [f32]),
}

impl Default for Param<'_> {
    fn default() -> Self {
        Param::Constant(0.0)
    }
}

impl Param<'_> {
    pub fn value_at(&self, index: usize) -> f32 {
        match *self {
            Param::Constant(value) => value,
            Param::PerSample(values) => values
                .get(index)
                .or_else(|| values.first())
                .copied()
                .unwrap_or(0.0),
        }
    }

    pub fn first(&self) -> f32 {
        self.value_at(0)
    }

    /// Boolean reading of the value at `index`
    pub fn is_on(&self, index: usize) -> bool {
        self.value_at(index) >= PLAYING_THRESHOLD
    }
}

/// Named automation inputs handed to a unit each quantum
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AutomationParams<'a> {
    /// Control-rate gate for the whole quantum
    pub is_playing: Param<'a>,
    /// Per-sample playback gate for resident-buffer playback
    pub playing: Param<'a>,
    /// Per-sample loop switch for resident-buffer playback
    pub looping: Param<'a>,
}

impl AutomationParams<'static> {
    /// All three parameters at control rate
    pub fn control_rate(playing: bool, looping: bool) -> Self {
        let on = |flag: bool| Param::Constant(if flag { 1.0 } else { 0.0 });
        Self {
            is_playing: on(playing),
            playing: on(playing),
            looping: on(looping),
        }
    }
}
