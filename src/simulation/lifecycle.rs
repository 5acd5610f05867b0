//! Start/stop control for the periodic simulation task.
//!
//! All simulation state lives in one [`SimulationContext`] behind a mutex; the
//! tick task and every external call (status, snapshot, commands, alarm
//! acknowledgement) take that lock, so a tick is never observed half-applied.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{NetworkSnapshot, SimulationContext, SimulationStatus, TelemetrySink};
use crate::config::SimulationConfig;
use crate::domain::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

/// Result of an operator action; failures carry the reason instead of erroring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl CommandOutcome {
    fn from_result<T, E: std::fmt::Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(_) => Self {
                success: true,
                error: None,
            },
            Err(e) => Self {
                success: false,
                error: Some(e.to_string()),
            },
        }
    }
}

struct RunningTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy)]
struct LoopSettings {
    tick: Duration,
    broadcast_every: u64,
}

pub struct Simulator {
    context: Arc<Mutex<SimulationContext>>,
    sink: Arc<dyn TelemetrySink>,
    snapshots: broadcast::Sender<NetworkSnapshot>,
    settings: LoopSettings,
    stop_timeout: Duration,
    task: Mutex<Option<RunningTask>>,
}

impl Simulator {
    pub fn new(
        context: SimulationContext,
        sink: Arc<dyn TelemetrySink>,
        cfg: &SimulationConfig,
    ) -> Self {
        let (snapshots, _) = broadcast::channel(cfg.broadcast_capacity.max(1));
        Self {
            context: Arc::new(Mutex::new(context)),
            sink,
            snapshots,
            settings: LoopSettings {
                tick: Duration::from_millis(cfg.tick_millis.max(1)),
                broadcast_every: cfg.broadcast_every_ticks,
            },
            stop_timeout: cfg.stop_timeout(),
            task: Mutex::new(None),
        }
    }

    /// Spawn the tick loop. Must be called from within a tokio runtime.
    pub fn start(&self) -> StartOutcome {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return StartOutcome::AlreadyRunning;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(tick_loop(
            Arc::clone(&self.context),
            Arc::clone(&self.sink),
            self.snapshots.clone(),
            self.settings,
            cancel.clone(),
        ));
        *task = Some(RunningTask { cancel, handle });

        let ctx = self.context.lock();
        info!(
            run_id = %ctx.run_id(),
            tick_millis = self.settings.tick.as_millis() as u64,
            controllers = ctx.fleet().len(),
            sensors = ctx.sensors().len(),
            "simulation started"
        );
        StartOutcome::Started
    }

    /// Cancel the tick loop and wait (bounded) for it to wind down.
    pub async fn stop(&self) -> StopOutcome {
        let Some(RunningTask { cancel, handle }) = self.task.lock().take() else {
            return StopOutcome::NotRunning;
        };
        cancel.cancel();

        let abort = handle.abort_handle();
        match tokio::time::timeout(self.stop_timeout, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "simulation task ended abnormally"),
            Err(_) => {
                // A later start must never race a second loop on the same context
                abort.abort();
                warn!(
                    timeout_ms = self.stop_timeout.as_millis() as u64,
                    "simulation task did not stop in time, aborted"
                );
            }
        }
        info!(tick = self.context.lock().clock().tick(), "simulation stopped");
        StopOutcome::Stopped
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    pub fn status(&self) -> SimulationStatus {
        let running = self.is_running();
        self.context.lock().status(running)
    }

    pub fn network_snapshot(&self) -> NetworkSnapshot {
        self.context.lock().snapshot()
    }

    /// Receive a snapshot every `broadcast_every_ticks` ticks. Slow receivers
    /// lag and skip; they never block the loop.
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn send_command(&self, controller_id: &str, command: &BTreeMap<String, Value>) -> CommandOutcome {
        let result = self.context.lock().send_command(controller_id, command);
        if let Err(e) = &result {
            warn!(controller_id, error = %e, "command rejected");
        }
        CommandOutcome::from_result(result)
    }

    pub fn acknowledge_alarm(&self, controller_id: &str, alarm_id: &str) -> CommandOutcome {
        CommandOutcome::from_result(self.context.lock().acknowledge_alarm(controller_id, alarm_id))
    }

    pub fn clear_acknowledged_alarms(&self, controller_id: &str) -> CommandOutcome {
        CommandOutcome::from_result(self.context.lock().clear_acknowledged_alarms(controller_id))
    }

    pub fn set_controller_active(&self, controller_id: &str, active: bool) -> CommandOutcome {
        CommandOutcome::from_result(self.context.lock().set_controller_active(controller_id, active))
    }

    /// Direct access for callers that need more than the operator surface.
    pub fn with_context<R>(&self, f: impl FnOnce(&mut SimulationContext) -> R) -> R {
        f(&mut self.context.lock())
    }
}

async fn tick_loop(
    context: Arc<Mutex<SimulationContext>>,
    sink: Arc<dyn TelemetrySink>,
    snapshots: broadcast::Sender<NetworkSnapshot>,
    settings: LoopSettings,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(settings.tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        // Lock is released before any await
        let (record, snapshot) = {
            let mut ctx = context.lock();
            let record = ctx.tick();
            let snapshot = (settings.broadcast_every > 0
                && record.tick % settings.broadcast_every == 0)
                .then(|| ctx.snapshot());
            (record, snapshot)
        };

        if let Some(snapshot) = snapshot {
            // No subscribers is not an error
            let _ = snapshots.send(snapshot);
        }

        if let Err(e) = sink.record(&record).await {
            warn!(tick = record.tick, error = %e, "failed to persist tick record");
        }
    }
    debug!("tick loop exited");
}
