//! Deferred deallocation for the render thread
//!
//! Values that the render thread may drop (retired units, replaced resident
//! audio, replaced note schedules, detached ring regions) are wrapped in
//! `basedrop` pointers on the control side. Dropping one on the render
//! thread only queues it; the memory is freed by a collector thread.

use basedrop::{Collector, Handle};
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

fn start_collector() -> Handle {
    let (tx, rx) = crossbeam_channel::bounded(1);

    let spawned = thread::Builder::new()
        .name("audio-gc".to_string())
        .spawn(move || {
            // Collector is !Sync, so it lives on this thread only
            let mut collector = Collector::new();
            if tx.send(collector.handle()).is_err() {
                return;
            }
            tracing::debug!("Audio GC thread started");
            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        });

    match spawned.ok().and_then(|_| rx.recv().ok()) {
        Some(handle) => handle,
        None => {
            tracing::error!("Audio GC thread did not start, retired buffers will not be freed");
            let collector: &'static Collector = Box::leak(Box::new(Collector::new()));
            collector.handle()
        }
    }
}

/// Handle for allocating `basedrop::Shared` / `basedrop::Owned` values
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(start_collector).clone()
}
