//! Per-track transport state advanced once per render quantum

use crate::constants::PLAYING_THRESHOLD;
use crate::control::TransportUpdate;

/// Whether a quantum is rendered at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    /// Outputs are left untouched and the playhead does not move
    Gated,
    Playing,
}

impl PlayState {
    pub fn from_param(value: f32) -> Self {
        if value >= PLAYING_THRESHOLD {
            PlayState::Playing
        } else {
            PlayState::Gated
        }
    }
}

/// The span of timeline one quantum renders, `[from, to)` in milliseconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayWindow {
    pub from: f64,
    pub to: f64,
    pub ms_per_sample: f64,
}

impl PlayWindow {
    pub fn duration(&self) -> f64 {
        self.to - self.from
    }

    /// Absolute sample index of the window start
    pub fn start_sample(&self) -> f64 {
        self.from / self.ms_per_sample
    }
}

/// Playhead, loop bounds and liveness of one audio unit
///
/// Only the render context mutates it: control updates are queued and
/// applied at the start of a quantum.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub playhead: f64,
    pub previous_playhead: f64,
    /// `None` when looping is disabled
    pub loop_start: Option<f64>,
    pub loop_end: f64,
    pub should_live: bool,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            playhead: 0.0,
            previous_playhead: 0.0,
            loop_start: None,
            loop_end: 0.0,
            should_live: true,
        }
    }
}

impl PlayerState {
    pub fn apply(&mut self, update: TransportUpdate) {
        match update {
            TransportUpdate::Playhead(playhead) => {
                self.playhead = playhead;
                self.previous_playhead = playhead;
            }
            TransportUpdate::LoopStart(start) => self.loop_start = start,
            TransportUpdate::LoopEnd(end) => self.loop_end = end,
            TransportUpdate::ShouldLive(live) => self.should_live = live,
        }
    }

    /// Active loop bounds; a window that is empty or inverted counts as off
    pub fn loop_range(&self) -> Option<(f64, f64)> {
        self.loop_start
            .filter(|&start| self.loop_end > start)
            .map(|start| (start, self.loop_end))
    }

    /// Advance by one quantum and return the window to render
    ///
    /// A playhead that has reached the loop end (equality included) jumps
    /// back to the loop start before the window is taken. "Reached" allows
    /// half a sample of slack, since the playhead is a running float sum.
    pub fn advance(&mut self, block_len: usize, ms_per_sample: f64) -> PlayWindow {
        if let Some((start, end)) = self.loop_range() {
            if self.playhead + 0.5 * ms_per_sample >= end {
                self.playhead = start;
            }
        }

        self.previous_playhead = self.playhead;
        self.playhead += block_len as f64 * ms_per_sample;

        PlayWindow {
            from: self.previous_playhead,
            to: self.playhead,
            ms_per_sample,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_covers_exact_block() {
        let mut state = PlayerState::default();
        let ms_per_sample = 1000.0 / 48000.0;

        let window = state.advance(128, ms_per_sample);
        assert_eq!(window.from, 0.0);
        assert!((window.to - 128.0 * ms_per_sample).abs() < 1e-9);
        assert_eq!(state.previous_playhead, window.from);
        assert_eq!(state.playhead, window.to);
    }

    #[test]
    fn test_loop_resets_on_reaching_end() {
        let mut state = PlayerState::default();
        state.apply(TransportUpdate::LoopStart(Some(0.0)));
        state.apply(TransportUpdate::LoopEnd(1000.0));

        // 1 ms per sample, 100 samples per quantum
        for _ in 0..10 {
            state.advance(100, 1.0);
        }
        assert_eq!(state.playhead, 1000.0);

        let window = state.advance(100, 1.0);
        assert_eq!(window.from, 0.0);
        assert_eq!(window.to, 100.0);
    }

    #[test]
    fn test_loop_wraps_despite_accumulated_error() {
        let mut state = PlayerState::default();
        state.apply(TransportUpdate::LoopStart(Some(0.0)));
        state.apply(TransportUpdate::LoopEnd(1000.0));
        let ms_per_sample = 1000.0 / 48000.0;

        // 1000 ms is exactly 375 quanta of 128 frames at 48 kHz
        let mut wraps = 0;
        for _ in 0..2000 {
            let window = state.advance(128, ms_per_sample);
            assert!(window.to <= 1000.0 + 1e-6, "window past loop end: {window:?}");
            if window.from == 0.0 {
                wraps += 1;
            }
        }
        assert_eq!(wraps, 6);
    }

    #[test]
    fn test_disabled_loop_runs_past_end() {
        let mut state = PlayerState::default();
        state.apply(TransportUpdate::LoopEnd(100.0));

        state.advance(100, 1.0);
        let window = state.advance(100, 1.0);
        assert_eq!(window.from, 100.0);
        assert!(state.loop_range().is_none());
    }

    #[test]
    fn test_inverted_loop_is_ignored() {
        let mut state = PlayerState::default();
        state.apply(TransportUpdate::LoopStart(Some(500.0)));
        state.apply(TransportUpdate::LoopEnd(500.0));
        assert!(state.loop_range().is_none());
    }

    #[test]
    fn test_gate_threshold() {
        assert_eq!(PlayState::from_param(0.0), PlayState::Gated);
        assert_eq!(PlayState::from_param(0.49), PlayState::Gated);
        assert_eq!(PlayState::from_param(0.5), PlayState::Playing);
        assert_eq!(PlayState::from_param(1.0), PlayState::Playing);
    }
}
