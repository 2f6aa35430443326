//! Event loop that owns the controller
//!
//! Ticks and control commands are serialized through one task, so the
//! controller is never touched concurrently.

use crate::DaemonState;
use crate::controller::{Controller, ControllerEvent};
use crate::media::MediaBackend;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::MissedTickBehavior;

/// Commands sent from IPC (and signal handlers) to the host loop
#[derive(Debug)]
pub enum ControlCommand {
    /// Forward a named event to the controller
    Event(ControllerEvent),
    /// Leave the poster fallback; replies whether anything changed
    Resume { reply: oneshot::Sender<bool> },
    Shutdown,
}

pub async fn run<B: MediaBackend>(
    mut controller: Controller<B>,
    state: Arc<Mutex<DaemonState>>,
    mut control_rx: mpsc::UnboundedReceiver<ControlCommand>,
    tick_interval: Duration,
) {
    log::info!(
        "Playback loop running every {:.1}ms",
        tick_interval.as_secs_f64() * 1000.0
    );

    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    controller.start(Instant::now());
    let mut last_phase = controller.phase();
    let mut poster_reported = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                controller.handle(ControllerEvent::Tick, Instant::now());

                let phase = controller.phase();
                if phase != last_phase {
                    log::debug!("Controller phase: {} -> {}", last_phase, phase);
                    last_phase = phase;
                }
                if controller.is_showing_poster() && !poster_reported {
                    log::warn!("Showing poster; run `bdctl resume` to retry playback");
                }
                poster_reported = controller.is_showing_poster();

                let mut state = state.lock().await;
                state.controller = Some(controller.status());
                if state.should_exit {
                    break;
                }
            }
            command = control_rx.recv() => match command {
                Some(ControlCommand::Event(event)) => {
                    controller.handle(event, Instant::now());
                }
                Some(ControlCommand::Resume { reply }) => {
                    let resumed = controller.resume(Instant::now());
                    let _ = reply.send(resumed);
                }
                Some(ControlCommand::Shutdown) | None => break,
            },
        }
    }

    controller.shutdown();
    let mut state = state.lock().await;
    state.controller = Some(controller.status());
    state.should_exit = true;
    log::info!("Playback loop stopped");
}
