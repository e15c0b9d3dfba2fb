//! Per-track playback units
//!
//! A [`Player`] runs the transport state machine once per render quantum:
//! apply queued control updates, test the gate, advance the playhead by
//! exactly one block (looping if needed), hand that window to a
//! [`FillStrategy`] and report the new position.
//!
//! The control side holds the matching [`PlayerHandle`]. The handle is the
//! owner of the unit's lifetime: once it is dropped, the unit tells the host
//! it no longer needs to be invoked. The boolean returned by `process` is a
//! scheduling hint only; everything the unit owns is released when the host
//! drops it.

pub mod notes;
pub mod params;
pub mod recorder;
pub mod state;
pub mod tone;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::control::{ControlMessage, PositionReport, TransportUpdate};
use crate::error::ControlError;
use crate::events::EventQueue;
use crate::stats::TransportStats;

pub use notes::{Note, NoteFill, NoteSchedule, ScheduledNote};
pub use params::{AutomationParams, Param};
pub use recorder::{ResidentBuffer, SampleRecorder};
pub use state::{PlayState, PlayWindow, PlayerState};
pub use tone::ToneFill;

/// Buffers handed to a unit for one quantum
pub struct ProcessBlock<'a, 'b> {
    pub inputs: &'a [&'a [f32]],
    pub outputs: &'a mut [&'b mut [f32]],
    pub params: &'a AutomationParams<'a>,
}

impl ProcessBlock<'_, '_> {
    /// Frames in this quantum
    pub fn block_len(&self) -> usize {
        self.outputs.first().map_or(0, |channel| channel.len())
    }
}

/// How a unit turns a time window into samples
pub trait FillStrategy: Send + 'static {
    /// Strategy-specific control updates
    type Update: Send + 'static;

    /// Move this strategy's fields out of a control message
    fn updates_from(message: &mut ControlMessage) -> Vec<Self::Update>;

    fn apply(&mut self, update: Self::Update);

    /// Render `window` into `block.outputs`
    ///
    /// Exactly the samples of the window are written, never more. Missing
    /// content leaves the outputs silent.
    fn fill(
        &mut self,
        window: &PlayWindow,
        transport: &PlayerState,
        block: &mut ProcessBlock<'_, '_>,
    );

    /// The playhead was moved by a control update
    fn seek(&mut self, _playhead_ms: f64, _ms_per_sample: f64) {}

    /// Position this strategy actually rendered up to, when it keeps its
    /// own timeline; the reported playhead follows it
    fn playhead_ms(&self, _ms_per_sample: f64) -> Option<f64> {
        None
    }

    /// Keep rendering while the transport gate is closed
    fn runs_ungated(&self) -> bool {
        false
    }
}

/// What the host invokes once per render quantum
pub trait AudioUnit: Send {
    /// Render one quantum; the result tells the host whether to keep
    /// invoking this unit
    fn process(
        &mut self,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        params: &AutomationParams<'_>,
    ) -> bool;
}

/// Control-side update addressed to one unit
pub enum PlayerCommand<U> {
    Transport(TransportUpdate),
    Fill(U),
}

/// Shared dependencies injected into every unit at construction
#[derive(Clone)]
pub struct UnitContext {
    pub sample_rate: u32,
    pub render_quantum: usize,
    pub instant_duration_ms: f64,
    pub command_capacity: usize,
    pub report_capacity: usize,
    pub stats: Arc<TransportStats>,
    pub events: Arc<EventQueue>,
}

impl UnitContext {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            sample_rate: config.audio.sample_rate,
            render_quantum: config.audio.render_quantum,
            instant_duration_ms: config.player.instant_duration_ms,
            command_capacity: config.player.command_queue_capacity,
            report_capacity: config.player.report_queue_capacity,
            stats: Arc::new(TransportStats::new()),
            events: Arc::new(EventQueue::new(config.player.event_queue_capacity)),
        }
    }

    pub fn ms_per_sample(&self) -> f64 {
        1000.0 / self.sample_rate as f64
    }
}

/// Real-time side of a track
pub struct Player<S: FillStrategy> {
    state: PlayerState,
    strategy: S,
    play_state: PlayState,
    ms_per_sample: f64,
    render_quantum: usize,
    commands: Receiver<PlayerCommand<S::Update>>,
    reports: Sender<PositionReport>,
    stats: Arc<TransportStats>,
    detached: bool,
}

impl<S: FillStrategy> Player<S> {
    pub fn new(strategy: S, context: &UnitContext) -> (Self, PlayerHandle<S>) {
        let (command_tx, command_rx) = bounded(context.command_capacity);
        let (report_tx, report_rx) = bounded(context.report_capacity);

        let player = Self {
            state: PlayerState::default(),
            strategy,
            play_state: PlayState::Gated,
            ms_per_sample: context.ms_per_sample(),
            render_quantum: context.render_quantum,
            commands: command_rx,
            reports: report_tx,
            stats: Arc::clone(&context.stats),
            detached: false,
        };
        let handle = PlayerHandle {
            commands: command_tx,
            reports: report_rx,
        };
        (player, handle)
    }

    pub fn state(&self) -> &PlayerState {
        &self.state
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn play_state(&self) -> PlayState {
        self.play_state
    }

    /// Whether the host should keep invoking this unit
    pub fn is_live(&self) -> bool {
        self.state.should_live && !self.detached
    }

    /// Render one quantum
    pub fn process(
        &mut self,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        params: &AutomationParams<'_>,
    ) -> bool {
        self.drain_commands();

        self.play_state = PlayState::from_param(params.is_playing.first());
        if self.play_state == PlayState::Gated && !self.strategy.runs_ungated() {
            self.stats.record_gated();
            return self.is_live();
        }

        let block_len = outputs
            .first()
            .map(|channel| channel.len())
            .or_else(|| inputs.first().map(|channel| channel.len()))
            .unwrap_or(self.render_quantum);
        let window = self.state.advance(block_len, self.ms_per_sample);

        let mut block = ProcessBlock {
            inputs,
            outputs,
            params,
        };
        self.strategy.fill(&window, &self.state, &mut block);
        if let Some(playhead) = self.strategy.playhead_ms(self.ms_per_sample) {
            self.state.playhead = playhead;
        }
        self.stats.record_quantum();

        match self.reports.try_send(PositionReport {
            playhead: self.state.playhead,
        }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.stats.record_report_dropped(),
            Err(TrySendError::Disconnected(_)) => self.detached = true,
        }

        self.is_live()
    }

    fn drain_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(command) => self.apply(command),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.detached {
                        tracing::debug!("Player handle dropped, unit can be torn down");
                    }
                    self.detached = true;
                    break;
                }
            }
        }
    }

    fn apply(&mut self, command: PlayerCommand<S::Update>) {
        match command {
            PlayerCommand::Transport(update) => {
                self.state.apply(update);
                if let TransportUpdate::Playhead(playhead) = update {
                    self.strategy.seek(playhead, self.ms_per_sample);
                }
            }
            PlayerCommand::Fill(update) => self.strategy.apply(update),
        }
    }
}

impl<S: FillStrategy> AudioUnit for Player<S> {
    fn process(
        &mut self,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        params: &AutomationParams<'_>,
    ) -> bool {
        Player::process(self, inputs, outputs, params)
    }
}

/// Control side of a track
///
/// Dropping the handle detaches the unit: its next invocation returns
/// `false` and the host may drop it.
pub struct PlayerHandle<S: FillStrategy> {
    commands: Sender<PlayerCommand<S::Update>>,
    reports: Receiver<PositionReport>,
}

impl<S: FillStrategy> PlayerHandle<S> {
    pub fn send(&self, command: PlayerCommand<S::Update>) -> Result<(), ControlError> {
        self.commands.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => ControlError::QueueFull,
            TrySendError::Disconnected(_) => ControlError::Disconnected,
        })
    }

    pub fn transport(&self, update: TransportUpdate) -> Result<(), ControlError> {
        self.send(PlayerCommand::Transport(update))
    }

    pub fn fill(&self, update: S::Update) -> Result<(), ControlError> {
        self.send(PlayerCommand::Fill(update))
    }

    /// Split a control message into updates and queue them
    ///
    /// Fields are applied one by one on the render side; there is no
    /// atomicity across fields of the same message. Returns the number of
    /// updates queued.
    pub fn post(&self, mut message: ControlMessage) -> Result<usize, ControlError> {
        let mut queued = 0;
        for update in message.transport_updates() {
            self.transport(update)?;
            queued += 1;
        }
        for update in S::updates_from(&mut message) {
            self.fill(update)?;
            queued += 1;
        }
        tracing::debug!(queued, "Posted control message");
        Ok(queued)
    }

    /// Drain pending reports and return the most recent playhead
    pub fn latest_position(&self) -> Option<f64> {
        self.reports.try_iter().last().map(|report| report.playhead)
    }

    /// Wait until the unit has rendered `quanta` more quanta
    ///
    /// Reports already queued are discarded first, so every counted report
    /// was produced after the call. Returns false on timeout.
    pub async fn wait_for_quanta(&self, quanta: usize, timeout: Duration) -> bool {
        wait_for_reports(&self.reports, quanta, timeout).await
    }

    /// A detachable view of the position reports
    ///
    /// Reports are shared with the handle: each one is seen by whichever
    /// side reads it first.
    pub fn position_watch(&self) -> PositionWatch {
        PositionWatch {
            reports: self.reports.clone(),
        }
    }

    /// Ask the unit to stop living, then drop the handle
    pub fn retire(self) {
        if let Err(e) = self.transport(TransportUpdate::ShouldLive(false)) {
            tracing::debug!("Retiring a unit that is already gone: {}", e);
        }
    }
}

/// Position reports of one unit, usable without holding its handle
#[derive(Clone)]
pub struct PositionWatch {
    reports: Receiver<PositionReport>,
}

impl PositionWatch {
    pub async fn wait_for_quanta(&self, quanta: usize, timeout: Duration) -> bool {
        wait_for_reports(&self.reports, quanta, timeout).await
    }
}

async fn wait_for_reports(
    reports: &Receiver<PositionReport>,
    quanta: usize,
    timeout: Duration,
) -> bool {
    reports.try_iter().for_each(drop);

    let deadline = tokio::time::Instant::now() + timeout;
    let mut seen = 0;
    while seen < quanta {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
        seen += reports.try_iter().count();
    }
    true
}
