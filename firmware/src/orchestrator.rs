//! Task layout around the core.
//!
//! The key matrix and the encoder bank each run as their own task on a
//! fixed interval and push events into a bounded queue. The main loop is the
//! only consumer: it dispatches queued events as they arrive and services
//! the macro engine and HID retries on its own tick. A `watch` flag stops
//! everything.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::clock::{Clock, Millis};
use crate::event::{InputEvent, InputSource};
use crate::hid::HidTransport;
use crate::Macropad;

/// A source with nothing attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct Idle;

impl InputSource for Idle {
    fn poll(&mut self, _now: Millis) -> Vec<InputEvent> {
        Vec::new()
    }
}

fn ticker(period_ms: Millis) -> tokio::time::Interval {
    let mut ticker = interval(Duration::from_millis(period_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

async fn poll_source<S: InputSource>(
    name: &'static str,
    mut source: S,
    clock: Arc<dyn Clock>,
    period_ms: Millis,
    tx: mpsc::Sender<InputEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = ticker(period_ms);
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {
                for event in source.poll(clock.now_ms()) {
                    // A full queue applies backpressure; events are never dropped.
                    if tx.send(event).await.is_err() {
                        debug!(task = name, "event queue closed");
                        return;
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!(task = name, "input task stopped");
}

/// Drive the core until `shutdown` turns true, then stop the input tasks,
/// abort any macro and release everything. Returns the core for inspection.
pub async fn run<T, K, E>(
    mut pad: Macropad<T>,
    keys: K,
    encoders: E,
    mut shutdown: watch::Receiver<bool>,
) -> Macropad<T>
where
    T: HidTransport,
    K: InputSource + 'static,
    E: InputSource + 'static,
{
    let settings = pad.settings().clone();
    let (tx, mut rx) = mpsc::channel(settings.event_queue.max(1));

    let key_task = tokio::spawn(poll_source(
        "keys",
        keys,
        pad.clock(),
        settings.scan_ms,
        tx.clone(),
        shutdown.clone(),
    ));
    let encoder_task = tokio::spawn(poll_source(
        "encoders",
        encoders,
        pad.clock(),
        settings.scan_ms,
        tx,
        shutdown.clone(),
    ));

    info!(scan_ms = settings.scan_ms, queue = settings.event_queue, "orchestrator running");
    let mut tick = ticker(settings.scan_ms);
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            Some(event) = rx.recv() => pad.handle_event(&event),
            _ = tick.tick() => pad.tick(),
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    info!("orchestrator stopping");
    // Closing the queue releases any task blocked on a full channel.
    drop(rx);
    for task in [key_task, encoder_task] {
        if let Err(e) = task.await {
            debug!(error = %e, "input task ended abnormally");
        }
    }
    pad.shutdown();
    pad
}
