// Alarm evaluation - steady-state gating, threshold rules and the persisted alarm log
use crate::application::telemetry_repository::TelemetryRepository;
use crate::domain::alarm::{Evaluation, NewAlarmLog, ThresholdSet};
use crate::domain::telemetry::Snapshot;
use crate::infrastructure::config::{AlarmSettings, MotorStateMode};
use crate::infrastructure::metrics::IngestMetrics;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MotorPhase {
    Off,
    /// Motor just turned on; alarms are suppressed until the startup delay elapses
    Starting,
    Steady,
}

#[derive(Debug)]
struct GateState {
    phase: MotorPhase,
    /// Bumped on every OFF->STARTING transition so a stale timer can tell
    /// it belongs to an earlier ON period.
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

/// OFF -> STARTING -> STEADY -> OFF state machine driven by motor on/off and a
/// cancelable one-shot startup timer.
#[derive(Debug)]
pub struct SteadyStateGate {
    state: Arc<Mutex<GateState>>,
    startup_delay: Duration,
}

impl SteadyStateGate {
    pub fn new(startup_delay: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(GateState {
                phase: MotorPhase::Off,
                generation: 0,
                timer: None,
            })),
            startup_delay,
        }
    }

    pub async fn phase(&self) -> MotorPhase {
        self.state.lock().await.phase
    }

    pub async fn set_motor_on(&self, on: bool) {
        let mut state = self.state.lock().await;

        if !on {
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            if state.phase != MotorPhase::Off {
                tracing::debug!(from = ?state.phase, "Motor off, alarm gate reset");
            }
            state.phase = MotorPhase::Off;
            return;
        }

        // Already starting or steady: the armed timer keeps running.
        if state.phase != MotorPhase::Off {
            return;
        }

        state.generation += 1;
        state.phase = MotorPhase::Starting;
        let generation = state.generation;
        let shared = Arc::downgrade(&self.state);
        let delay = self.startup_delay;

        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            promote_to_steady(shared, generation).await;
        }));
        tracing::debug!(delay_ms = delay.as_millis() as u64, "Motor on, alarms suppressed during startup");
    }
}

async fn promote_to_steady(shared: Weak<Mutex<GateState>>, generation: u64) {
    let Some(state) = shared.upgrade() else {
        return;
    };
    let mut state = state.lock().await;
    // The motor may have stopped (and even restarted) while we slept.
    if state.phase == MotorPhase::Starting && state.generation == generation {
        state.phase = MotorPhase::Steady;
        state.timer = None;
        tracing::info!("Motor in steady state, alarms active");
    }
}

impl Drop for SteadyStateGate {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.try_lock() {
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
        }
    }
}

/// Threshold rules behind the steady-state gate.
#[derive(Debug)]
pub struct AlarmEvaluator {
    thresholds: ThresholdSet,
    gate: SteadyStateGate,
    motor_state: MotorStateMode,
    activity_epsilon: f64,
    /// Set by an explicit stop. Activity is ignored until the motor reads
    /// quiet or an explicit start arrives, so a coasting motor cannot relatch.
    stop_hold: AtomicBool,
}

impl AlarmEvaluator {
    pub fn new(thresholds: ThresholdSet, settings: &AlarmSettings) -> Self {
        Self {
            thresholds,
            gate: SteadyStateGate::new(settings.startup_delay()),
            motor_state: settings.motor_state,
            activity_epsilon: settings.activity_epsilon,
            stop_hold: AtomicBool::new(false),
        }
    }

    pub fn thresholds(&self) -> &ThresholdSet {
        &self.thresholds
    }

    pub async fn phase(&self) -> MotorPhase {
        self.gate.phase().await
    }

    pub async fn set_motor_on(&self, on: bool) {
        self.stop_hold.store(!on, Ordering::SeqCst);
        self.gate.set_motor_on(on).await;
    }

    /// In inferred mode, latch the motor on once it shows activity. Only an
    /// explicit stop turns it off again, and after a stop the latch rearms
    /// only on a quiet reading (falling edge) or an explicit start.
    pub async fn observe_activity(&self, snapshot: &Snapshot) {
        if self.motor_state != MotorStateMode::Inferred {
            return;
        }
        let active = snapshot.current > self.activity_epsilon || snapshot.rpm > self.activity_epsilon;
        if self.stop_hold.load(Ordering::SeqCst) {
            if !active {
                self.stop_hold.store(false, Ordering::SeqCst);
                tracing::debug!("Motor quiet after stop, activity latch rearmed");
            }
            return;
        }
        if active {
            self.gate.set_motor_on(true).await;
        }
    }

    /// Normal with no violations unless the gate is STEADY.
    pub async fn evaluate(&self, snapshot: &Snapshot) -> Evaluation {
        if self.gate.phase().await != MotorPhase::Steady {
            return Evaluation::normal();
        }
        self.thresholds.evaluate(snapshot)
    }
}

/// Writes alarm log rows, skipping a message already logged within the
/// trailing debounce window.
///
/// Check and insert are two separate repository calls. Two concurrent writers
/// can both pass the check and insert the same message; at one broker feed per
/// process this is accepted.
#[derive(Clone)]
pub struct AlarmLogWriter {
    repository: Arc<dyn TelemetryRepository>,
    debounce: chrono::Duration,
    metrics: Arc<IngestMetrics>,
}

impl AlarmLogWriter {
    pub fn new(
        repository: Arc<dyn TelemetryRepository>,
        debounce: chrono::Duration,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            repository,
            debounce,
            metrics,
        }
    }

    /// Returns whether a row was inserted.
    pub async fn write(&self, entry: &NewAlarmLog) -> anyhow::Result<bool> {
        let since = entry.timestamp - self.debounce;
        if self
            .repository
            .alarm_message_logged_since(&entry.message, since)
            .await?
        {
            IngestMetrics::incr(&self.metrics.alarm_logs_deduplicated);
            tracing::debug!(message = %entry.message, "Alarm already logged within debounce window");
            return Ok(false);
        }

        self.repository.append_alarm_log(entry).await?;
        IngestMetrics::incr(&self.metrics.alarms_logged);
        tracing::info!(level = %entry.level, message = %entry.message, "Alarm logged");
        Ok(true)
    }
}
