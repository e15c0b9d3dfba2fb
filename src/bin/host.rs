//! Transport Host
//!
//! Plays a short note track through the default output device and, when
//! given a number of seconds, records that long from the default input into
//! a recorder track, then plays the take back.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use track_transport::{
    audio::{
        buffer::SharedRing,
        device::list_devices,
        writer::{AudioReader, AudioWriter},
        AudioCapture, AudioPlayback, Engine,
    },
    config::AppConfig,
    control::{ControlMessage, TransportUpdate},
    player::{
        notes::{Note, NoteSchedule},
        UnitContext,
    },
    tracks::TrackManager,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting transport host");

    let config = AppConfig::load_or_default(None).context("loading config")?;

    println!("\n=== Audio Devices ===");
    for device in list_devices() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    ID: {}", device.id);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();

    let record_seconds: Option<f64> = match std::env::args().nth(1) {
        Some(arg) => Some(arg.parse().context("record length must be a number of seconds")?),
        None => None,
    };

    let context = UnitContext::from_config(&config);
    let tracks = TrackManager::with_context(config.clone(), context.clone());
    let (mut engine, engine_handle) = Engine::new(&config);

    // Capture feeds the engine through its own ring
    let mut capture = None;
    if record_seconds.is_some() {
        let mut input = AudioCapture::new(&config.audio);
        let ring = SharedRing::with_capacity::<f32>(config.ring_capacity())?;
        let reader = AudioReader::from_shared(&ring)?;
        input.start(AudioWriter::from_shared(&ring)?)?;
        engine = engine.with_capture(reader, input.channels() as usize);
        capture = Some(input);
    }

    // An arpeggio, one bucket per second
    let arpeggio: Vec<(f64, Note)> = [60u8, 64, 67, 72]
        .iter()
        .enumerate()
        .map(|(i, &note)| {
            let start = i as f64 * 250.0;
            (
                start,
                Note {
                    note,
                    velocity: 100,
                    channel: 0,
                    duration: 200.0,
                },
            )
        })
        .collect();
    let schedule = NoteSchedule::from_notes(&arpeggio, config.player.instant_duration_ms)?;
    let (notes_id, notes_unit) = tracks.create_note_track("Arpeggio", Some(schedule))?;
    engine_handle.add_unit(notes_unit)?;

    tracks.post(
        notes_id,
        ControlMessage {
            loop_start: Some(Some(0.0)),
            loop_end: Some(1000.0),
            ..ControlMessage::default()
        },
    )?;

    let recorder_id = if record_seconds.is_some() {
        let (id, unit) = tracks.create_recorder_track("Input")?;
        engine_handle.add_unit(unit)?;
        Some(id)
    } else {
        None
    };

    let mut playback = AudioPlayback::new(&config.audio);
    playback.start(engine)?;
    engine_handle.transport().set_looping(true);
    engine_handle.transport().play();
    tracing::info!("Playback started");

    if let (Some(id), Some(seconds)) = (recorder_id, record_seconds) {
        tracks.arm(id)?;
        tracks.start_recording(id)?;
        tokio::time::sleep(Duration::from_secs_f64(seconds.max(0.0))).await;
        let take = tracks.stop_recording(id).await?;
        tracing::info!("Recorded {} frames on track {}", take.frames(), id);

        // Play the take from the top, without the arpeggio's loop
        tracks.disarm(id)?;
        tracks.broadcast(TransportUpdate::Playhead(0.0));
        tracks.remove_track(notes_id)?;
        engine_handle.transport().set_looping(false);
    }

    if let Some(mut input) = capture.take() {
        input.stop();
        tracing::info!(
            "Capture: {} samples, {} dropped",
            input.samples_captured(),
            input.samples_dropped()
        );
    }

    let mut stats_interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = stats_interval.tick() => {
                for status in tracks.statuses() {
                    tracing::debug!(?status, "Track status");
                }
                let events = context.events.drain();
                if !events.is_empty() {
                    tracing::debug!("{} note events", events.len());
                }
                let stats = context.stats.snapshot();
                tracing::info!(
                    "Stats: {} quanta ({} gated), {} overruns, {} samples dropped, {} live units",
                    stats.quanta,
                    stats.gated_quanta,
                    stats.overruns,
                    stats.samples_dropped,
                    engine_handle.live_units()
                );
                if let Some(e) = playback.check_errors() {
                    tracing::error!("Playback error: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    engine_handle.transport().stop();
    playback.stop();
    Ok(())
}
