//! Continuous sine fill, used for monitoring and smoke tests

use std::f64::consts::TAU;

use super::{FillStrategy, PlayWindow, PlayerState, ProcessBlock};
use crate::control::ControlMessage;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ToneUpdate {
    Frequency(f64),
    Gain(f32),
}

/// Phase-continuous sine written to every output channel
#[derive(Debug, Clone)]
pub struct ToneFill {
    frequency: f64,
    gain: f32,
    phase: f64,
}

impl ToneFill {
    pub fn new(frequency: f64, gain: f32) -> Self {
        Self {
            frequency,
            gain,
            phase: 0.0,
        }
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl FillStrategy for ToneFill {
    type Update = ToneUpdate;

    fn updates_from(_message: &mut ControlMessage) -> Vec<ToneUpdate> {
        Vec::new()
    }

    fn apply(&mut self, update: ToneUpdate) {
        match update {
            ToneUpdate::Frequency(frequency) => self.frequency = frequency,
            ToneUpdate::Gain(gain) => self.gain = gain,
        }
    }

    fn fill(
        &mut self,
        window: &PlayWindow,
        _transport: &PlayerState,
        block: &mut ProcessBlock<'_, '_>,
    ) {
        let step = TAU * self.frequency * window.ms_per_sample / 1000.0;
        for i in 0..block.block_len() {
            let sample = self.phase.sin() as f32 * self.gain;
            for channel in block.outputs.iter_mut() {
                channel[i] = sample;
            }
            self.phase = (self.phase + step) % TAU;
        }
    }
}
