// Headless dashboard - live/history pipeline, alarm notifications and control console
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

use motor_telemetry::application::alarm_monitor::AlarmMonitor;
use motor_telemetry::application::alarm_service::AlarmEvaluator;
use motor_telemetry::application::ingest_service::TopicRouter;
use motor_telemetry::application::pipeline::{DashboardPipeline, DashboardView};
use motor_telemetry::domain::control::{ControlAction, ControlPanelState, ControlRequest};
use motor_telemetry::domain::telemetry::Snapshot;
use motor_telemetry::domain::time_range::TimeRange;
use motor_telemetry::domain::units::estimate_power_watts;
use motor_telemetry::infrastructure::api_client::ApiClient;
use motor_telemetry::infrastructure::config::load_dashboard_config;
use motor_telemetry::infrastructure::mqtt::{spawn_sync_listener, MqttLiveFeed};

const HELP: &str = "commands: range <live|30m|1h|6h|12h|24h|7d|30d> | start <auto|manual> [speed] | stop \
| dir <fwd|rev> | speed <value> | pid <kp> <ki> <kd> | unit speed <rpm|hz|rad/s> \
| unit power <watt|kw|hp> | mode <auto|manual> | history | alarms | quit";

#[derive(Debug, PartialEq)]
enum ConsoleCommand {
    Range(TimeRange),
    Control(ControlRequest),
    History,
    Alarms,
    Quit,
}

fn control(action: ControlAction) -> ControlRequest {
    ControlRequest {
        action: Some(action),
        ..ControlRequest::default()
    }
}

fn number(word: Option<&str>) -> Result<f64, String> {
    let word = word.ok_or("missing number")?;
    word.parse::<f64>().map_err(|_| format!("not a number: {word}"))
}

fn parse_console(line: &str) -> Result<ConsoleCommand, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err(HELP.to_string());
    };

    let command = match verb {
        "range" => {
            let raw = words.next().ok_or("range needs a value")?;
            ConsoleCommand::Range(raw.parse().map_err(|e| format!("{e}"))?)
        }
        "start" => {
            let mode = words.next().unwrap_or("manual").to_uppercase();
            let mut request = control(ControlAction::Start);
            request.value = Some(json!(mode));
            if let Some(speed) = words.next() {
                request.speed_value = Some(json!(number(Some(speed))?));
            }
            ConsoleCommand::Control(request)
        }
        "stop" => ConsoleCommand::Control(control(ControlAction::Stop)),
        "dir" => {
            let mut request = control(ControlAction::SetDir);
            request.value = Some(json!(words.next().ok_or("dir needs fwd or rev")?.to_uppercase()));
            ConsoleCommand::Control(request)
        }
        "speed" => {
            let mut request = control(ControlAction::SetSpeedSp);
            request.value = Some(json!(number(words.next())?));
            ConsoleCommand::Control(request)
        }
        "pid" => {
            let mut request = control(ControlAction::SetPid);
            request.kp = Some(number(words.next())?);
            request.ki = Some(number(words.next())?);
            request.kd = Some(number(words.next())?);
            ConsoleCommand::Control(request)
        }
        "unit" => {
            let action = match words.next() {
                Some("speed") => ControlAction::SetSpeedUnit,
                Some("power") => ControlAction::SetPowerUnit,
                _ => return Err("unit needs speed or power".to_string()),
            };
            let mut request = control(action);
            request.value = Some(json!(words.next().ok_or("unit needs a value")?.to_lowercase()));
            ConsoleCommand::Control(request)
        }
        "mode" => {
            let mut request = control(ControlAction::SetMode);
            request.value = Some(json!(words.next().ok_or("mode needs auto or manual")?.to_uppercase()));
            ConsoleCommand::Control(request)
        }
        "history" => ConsoleCommand::History,
        "alarms" => ConsoleCommand::Alarms,
        "quit" | "exit" => ConsoleCommand::Quit,
        _ => return Err(HELP.to_string()),
    };
    Ok(command)
}

/// Formatted readings in the panel's display units.
#[derive(Debug, PartialEq)]
struct Readout {
    voltage: String,
    current: String,
    speed: String,
    power: String,
}

fn readout(values: &Snapshot, panel: &ControlPanelState) -> Readout {
    let speed = panel.speed_unit.convert(values.rpm);
    let power = panel.power_unit.convert(estimate_power_watts(values.voltage, values.current));
    Readout {
        voltage: format!("{:.1} V", values.voltage),
        current: format!("{:.2} A", values.current),
        speed: format!("{:.2} {}", speed, panel.speed_unit.label()),
        power: format!("{:.3} {}", power, panel.power_unit.label()),
    }
}

fn render(view: &DashboardView, panel: &ControlPanelState) {
    let readout = readout(&view.display, panel);
    let range = view.range.map(|r| r.as_str()).unwrap_or("-");
    let motor = if view.motor_on { "ON" } else { "OFF" };
    tracing::info!(
        range,
        motor,
        voltage = %readout.voltage,
        current = %readout.current,
        speed = %readout.speed,
        power = %readout.power,
        points = view.series.voltage.len(),
        "Dashboard"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_dashboard_config().context("Failed to load dashboard configuration")?;

    let api = Arc::new(ApiClient::new(&config.api)?);
    let feed = Arc::new(MqttLiveFeed::new(config.mqtt.clone(), TopicRouter::new(&config.ingest)));
    let pipeline = Arc::new(DashboardPipeline::new(
        feed,
        api.clone(),
        config.pipeline.clone(),
        config.alarms.motor_state,
        config.alarms.activity_epsilon,
    ));
    let evaluator = Arc::new(AlarmEvaluator::new(config.thresholds, &config.alarms));
    let monitor = Arc::new(Mutex::new(AlarmMonitor::new(evaluator, &config.alarms)));
    let panel = Arc::new(Mutex::new(ControlPanelState::default()));

    // Broadcast sync keeps this panel in step with every other dashboard
    let (mut sync_rx, sync_task) = spawn_sync_listener(&config.mqtt, &config.control.topics.broadcast);
    let sync_pipeline = pipeline.clone();
    let sync_panel = panel.clone();
    let sync_handle = tokio::spawn(async move {
        while let Some(payload) = sync_rx.recv().await {
            let motor_on = {
                let mut panel = sync_panel.lock().await;
                if !panel.apply(&payload) {
                    tracing::warn!(command = %payload.command, "Sync payload carried an unusable value");
                }
                panel.motor_on
            };
            if matches!(payload.command, ControlAction::Start | ControlAction::Stop) {
                sync_pipeline.set_motor_on(motor_on).await;
            }
            tracing::info!(command = %payload.command, "Control synced");
        }
    });

    pipeline.start(config.pipeline.initial_range).await?;

    // Render and alarm check once per tick
    let render_pipeline = pipeline.clone();
    let render_monitor = monitor.clone();
    let render_panel = panel.clone();
    let tick = config.pipeline.tick();
    let render_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        loop {
            interval.tick().await;
            let view = render_pipeline.view().await;
            let now = Utc::now();

            if view.range.is_some_and(|r| r.is_live()) {
                let mut monitor = render_monitor.lock().await;
                monitor.set_motor_on(view.motor_on, now).await;
                let observation = monitor.observe(&view.display, now).await;
                for alarm in &observation.notified {
                    tracing::warn!(level = %alarm.level, parameter = %alarm.parameter, "{}", alarm.message);
                }
            }
            render(&view, &*render_panel.lock().await);
        }
    });

    tracing::info!("{}", HELP);
    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next() => match line {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    tracing::error!("Failed to read console: {}", e);
                    break;
                }
                None => break,
            },
        };
        if line.trim().is_empty() {
            continue;
        }

        match parse_console(&line) {
            Ok(ConsoleCommand::Range(range)) => {
                if let Err(e) = pipeline.set_range(range).await {
                    tracing::error!(range = %range, "Failed to switch range: {:#}", e);
                }
            }
            Ok(ConsoleCommand::Control(request)) => {
                // the broadcast, not this reply, updates the panel
                if let Err(e) = api.send_control(&request).await {
                    tracing::error!("Control failed: {:#}", e);
                }
            }
            Ok(ConsoleCommand::History) => {
                for entry in monitor.lock().await.history().entries() {
                    tracing::info!(
                        event = ?entry.event,
                        count = entry.count,
                        since = %entry.since,
                        last_seen = %entry.last_seen,
                        "{}",
                        entry.description
                    );
                }
            }
            Ok(ConsoleCommand::Alarms) => {
                for alarm in monitor.lock().await.alarm_history() {
                    tracing::info!(level = %alarm.level, at = %alarm.timestamp, "{}", alarm.message);
                }
            }
            Ok(ConsoleCommand::Quit) => break,
            Err(message) => tracing::warn!("{}", message),
        }
    }

    tracing::info!("Shutting down dashboard");
    render_handle.abort();
    sync_handle.abort();
    sync_task.abort();
    pipeline.stop().await;
    Ok(())
}
