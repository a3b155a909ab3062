// Dashboard data pipeline - Live subscription with rolling windows, or one history fetch
use crate::domain::telemetry::{downsample_points, Parameter, Sample, SensorReading, Snapshot, TimeSeriesPoint};
use crate::domain::time_range::TimeRange;
use crate::infrastructure::config::{MotorStateMode, PipelineSettings};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Source of live sensor readings.
#[async_trait]
pub trait LiveFeed: Send + Sync {
    async fn open(&self) -> anyhow::Result<LiveSubscription>;
}

/// One-shot range query for history mode.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn fetch(&self, range: TimeRange) -> anyhow::Result<Vec<Sample>>;
}

/// Open subscription: a stream of readings plus the task producing them.
/// Dropping it aborts the task; `close` also waits for it to finish.
pub struct LiveSubscription {
    readings: mpsc::Receiver<SensorReading>,
    task: Option<JoinHandle<()>>,
}

impl LiveSubscription {
    pub fn new(readings: mpsc::Receiver<SensorReading>, task: JoinHandle<()>) -> Self {
        Self {
            readings,
            task: Some(task),
        }
    }

    pub async fn recv(&mut self) -> Option<SensorReading> {
        self.readings.recv().await
    }

    pub async fn close(mut self) {
        self.readings.close();
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Bounded chart buffer, oldest point dropped first.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    points: VecDeque<TimeSeriesPoint>,
    capacity: usize,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, point: TimeSeriesPoint) {
        while self.points.len() >= self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    /// History rows are already downsampled; they are not capped by the live capacity.
    pub fn replace(&mut self, points: Vec<TimeSeriesPoint>) {
        self.points = points.into();
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn to_vec(&self) -> Vec<TimeSeriesPoint> {
        self.points.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeriesSet {
    pub voltage: Vec<TimeSeriesPoint>,
    pub current: Vec<TimeSeriesPoint>,
    pub rpm: Vec<TimeSeriesPoint>,
    pub power: Vec<TimeSeriesPoint>,
}

impl SeriesSet {
    pub fn get(&self, parameter: Parameter) -> &[TimeSeriesPoint] {
        match parameter {
            Parameter::Voltage => &self.voltage,
            Parameter::Current => &self.current,
            Parameter::Rpm => &self.rpm,
            Parameter::Power => &self.power,
        }
    }
}

/// Read-only copy of the pipeline state for rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub range: Option<TimeRange>,
    pub motor_on: bool,
    pub display: Snapshot,
    pub series: SeriesSet,
}

struct Windows {
    voltage: RollingWindow,
    current: RollingWindow,
    rpm: RollingWindow,
    power: RollingWindow,
}

impl Windows {
    fn new(capacity: usize) -> Self {
        Self {
            voltage: RollingWindow::new(capacity),
            current: RollingWindow::new(capacity),
            rpm: RollingWindow::new(capacity),
            power: RollingWindow::new(capacity),
        }
    }

    fn get_mut(&mut self, parameter: Parameter) -> &mut RollingWindow {
        match parameter {
            Parameter::Voltage => &mut self.voltage,
            Parameter::Current => &mut self.current,
            Parameter::Rpm => &mut self.rpm,
            Parameter::Power => &mut self.power,
        }
    }

    fn clear(&mut self) {
        for parameter in Parameter::ALL {
            self.get_mut(parameter).clear();
        }
    }

    fn series(&self) -> SeriesSet {
        SeriesSet {
            voltage: self.voltage.to_vec(),
            current: self.current.to_vec(),
            rpm: self.rpm.to_vec(),
            power: self.power.to_vec(),
        }
    }
}

struct PipelineState {
    range: Option<TimeRange>,
    /// Bumped on every switch; a history fetch only lands in the epoch it started in.
    epoch: u64,
    motor_on: bool,
    display: Snapshot,
    windows: Windows,
}

impl PipelineState {
    fn reset(&mut self) {
        self.windows.clear();
        self.display = Snapshot::empty(Utc::now());
    }
}

struct LiveWorker {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

#[derive(Clone, Copy)]
struct MotorPolicy {
    mode: MotorStateMode,
    activity_epsilon: f64,
}

/// Dual-mode data acquisition for one dashboard.
///
/// Every `start`/`set_range`/`stop` first tears the previous mode down (live
/// worker stopped and joined, subscription closed) and empties all windows
/// before the new mode is set up. Teardown and setup are serialized; a history
/// fetch runs after the lock is released and is discarded if another switch
/// happened while it was in flight.
pub struct DashboardPipeline {
    state: Arc<Mutex<PipelineState>>,
    worker: Mutex<Option<LiveWorker>>,
    feed: Arc<dyn LiveFeed>,
    history: Arc<dyn HistorySource>,
    settings: PipelineSettings,
    motor: MotorPolicy,
}

impl DashboardPipeline {
    pub fn new(
        feed: Arc<dyn LiveFeed>,
        history: Arc<dyn HistorySource>,
        settings: PipelineSettings,
        motor_state: MotorStateMode,
        activity_epsilon: f64,
    ) -> Self {
        let state = PipelineState {
            range: None,
            epoch: 0,
            motor_on: false,
            display: Snapshot::empty(Utc::now()),
            windows: Windows::new(settings.window_capacity),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            worker: Mutex::new(None),
            feed,
            history,
            settings,
            motor: MotorPolicy {
                mode: motor_state,
                activity_epsilon,
            },
        }
    }

    pub async fn start(&self, range: TimeRange) -> anyhow::Result<()> {
        self.set_range(range).await
    }

    pub async fn set_range(&self, range: TimeRange) -> anyhow::Result<()> {
        let epoch = {
            let mut worker = self.worker.lock().await;
            Self::teardown(&mut worker).await;
            let epoch = {
                let mut state = self.state.lock().await;
                state.reset();
                state.range = Some(range);
                state.epoch += 1;
                state.epoch
            };
            tracing::info!(range = %range, "Dashboard range selected");

            if range.is_live() {
                let subscription = self.feed.open().await?;
                *worker = Some(self.spawn_live(subscription));
                return Ok(());
            }
            epoch
        };

        self.load_history(range, epoch).await;
        Ok(())
    }

    pub async fn stop(&self) {
        let mut worker = self.worker.lock().await;
        Self::teardown(&mut worker).await;
        let mut state = self.state.lock().await;
        state.reset();
        state.range = None;
        state.epoch += 1;
    }

    /// Explicit motor state from control sync. Turning the motor off clears
    /// the display values.
    pub async fn set_motor_on(&self, on: bool) {
        let mut state = self.state.lock().await;
        state.motor_on = on;
        if !on {
            state.display = Snapshot::empty(Utc::now());
        }
    }

    pub async fn view(&self) -> DashboardView {
        let state = self.state.lock().await;
        DashboardView {
            range: state.range,
            motor_on: state.motor_on,
            display: state.display,
            series: state.windows.series(),
        }
    }

    async fn teardown(worker: &mut Option<LiveWorker>) {
        if let Some(LiveWorker { stop, handle }) = worker.take() {
            // the worker may already have exited on its own
            let _ = stop.send(());
            if let Err(e) = handle.await {
                tracing::warn!("Live worker ended abnormally: {}", e);
            }
            tracing::debug!("Live mode torn down");
        }
    }

    fn spawn_live(&self, mut subscription: LiveSubscription) -> LiveWorker {
        let (stop, mut stop_rx) = oneshot::channel();
        let state = self.state.clone();
        let motor = self.motor;
        let tick = self.settings.tick();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + tick, tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    reading = subscription.recv() => match reading {
                        Some(reading) => apply_reading(&state, &reading, motor).await,
                        None => {
                            tracing::warn!("Live feed ended");
                            break;
                        }
                    },
                    _ = ticker.tick() => append_tick(&state).await,
                }
            }
            subscription.close().await;
        });

        LiveWorker { stop, handle }
    }

    async fn load_history(&self, range: TimeRange, epoch: u64) {
        let samples = match self.history.fetch(range).await {
            Ok(samples) => samples,
            Err(e) => {
                tracing::error!(range = %range, "History fetch failed: {:#}", e);
                return;
            }
        };

        let display = samples
            .last()
            .map(|s| round_sample(s).to_snapshot())
            .unwrap_or_else(|| Snapshot::empty(Utc::now()));
        let max_points = self.settings.history_max_points;
        let series: Vec<(Parameter, Vec<TimeSeriesPoint>)> = Parameter::ALL
            .into_iter()
            .map(|parameter| {
                let points = samples
                    .iter()
                    .map(|s| {
                        let row = round_sample(s);
                        TimeSeriesPoint::new(row.timestamp.timestamp_millis(), row.get(parameter))
                    })
                    .collect();
                (parameter, downsample_points(points, max_points))
            })
            .collect();

        let mut state = self.state.lock().await;
        if state.epoch != epoch {
            tracing::debug!(range = %range, "Range switched during fetch, discarding history");
            return;
        }
        for (parameter, points) in series {
            state.windows.get_mut(parameter).replace(points);
        }
        state.display = display;
        tracing::info!(range = %range, rows = samples.len(), "History loaded");
    }
}

async fn apply_reading(state: &Mutex<PipelineState>, reading: &SensorReading, motor: MotorPolicy) {
    let mut state = state.lock().await;
    match motor.mode {
        MotorStateMode::Explicit if !state.motor_on => return,
        MotorStateMode::Explicit => {}
        MotorStateMode::Inferred => {
            let active = |p| reading.value(p).is_some_and(|v| v > motor.activity_epsilon);
            if !state.motor_on && (active(Parameter::Current) || active(Parameter::Rpm)) {
                state.motor_on = true;
                tracing::info!("Motor activity detected");
            }
        }
    }
    state.display.apply(reading);
}

async fn append_tick(state: &Mutex<PipelineState>) {
    let mut state = state.lock().await;
    let time_ms = Utc::now().timestamp_millis();
    let display = state.display;
    for parameter in Parameter::ALL {
        state
            .windows
            .get_mut(parameter)
            .push(TimeSeriesPoint::new(time_ms, display.get(parameter)));
    }
}

fn fix3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Display precision of history rows: three decimals, whole rpm.
fn round_sample(sample: &Sample) -> Sample {
    Sample {
        timestamp: sample.timestamp,
        voltage: fix3(sample.voltage),
        current: fix3(sample.current),
        rpm: sample.rpm.round(),
        power: fix3(sample.power),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Counters {
        opens: AtomicUsize,
        closes: AtomicUsize,
    }

    struct CloseGuard(Arc<Counters>);

    impl Drop for CloseGuard {
        fn drop(&mut self) {
            self.0.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Feed that emits a fixed reading once and then stays open.
    struct FakeFeed {
        counters: Arc<Counters>,
        reading: SensorReading,
    }

    #[async_trait]
    impl LiveFeed for FakeFeed {
        async fn open(&self) -> anyhow::Result<LiveSubscription> {
            self.counters.opens.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(8);
            let guard = CloseGuard(self.counters.clone());
            let reading = self.reading.clone();
            let task = tokio::spawn(async move {
                let _guard = guard;
                let _ = tx.send(reading).await;
                std::future::pending::<()>().await;
            });
            Ok(LiveSubscription::new(rx, task))
        }
    }

    struct FakeHistory {
        samples: Vec<Sample>,
    }

    #[async_trait]
    impl HistorySource for FakeHistory {
        async fn fetch(&self, _range: TimeRange) -> anyhow::Result<Vec<Sample>> {
            Ok(self.samples.clone())
        }
    }

    /// History that answers only once released.
    struct GatedHistory {
        release: Arc<tokio::sync::Notify>,
        samples: Vec<Sample>,
    }

    #[async_trait]
    impl HistorySource for GatedHistory {
        async fn fetch(&self, _range: TimeRange) -> anyhow::Result<Vec<Sample>> {
            self.release.notified().await;
            Ok(self.samples.clone())
        }
    }

    struct FailingHistory;

    #[async_trait]
    impl HistorySource for FailingHistory {
        async fn fetch(&self, _range: TimeRange) -> anyhow::Result<Vec<Sample>> {
            anyhow::bail!("backend unreachable")
        }
    }

    fn reading() -> SensorReading {
        SensorReading {
            values: vec![(Parameter::Current, 1.25), (Parameter::Rpm, 15.0)],
            received_at: Utc::now(),
            coerced: Vec::new(),
        }
    }

    fn samples(n: usize) -> Vec<Sample> {
        let start = Utc::now() - chrono::Duration::hours(1);
        (0..n)
            .map(|i| Sample {
                timestamp: start + chrono::Duration::seconds(i as i64),
                voltage: 220.12345,
                current: 1.23456,
                rpm: 14.6,
                power: 270.0,
            })
            .collect()
    }

    fn pipeline(
        counters: Arc<Counters>,
        history: Arc<dyn HistorySource>,
        motor_state: MotorStateMode,
    ) -> DashboardPipeline {
        let feed = Arc::new(FakeFeed {
            counters,
            reading: reading(),
        });
        DashboardPipeline::new(feed, history, PipelineSettings::default(), motor_state, 0.1)
    }

    #[test]
    fn test_rolling_window_drops_oldest() {
        let mut window = RollingWindow::new(3);
        for i in 0..5 {
            window.push(TimeSeriesPoint::new(i, i as f64));
        }
        let times: Vec<i64> = window.to_vec().iter().map(|p| p.time_ms).collect();
        assert_eq!(times, vec![2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_ticks_fill_windows() {
        let counters = Arc::new(Counters::default());
        let history = Arc::new(FakeHistory { samples: Vec::new() });
        let pipeline = pipeline(counters.clone(), history, MotorStateMode::Inferred);

        pipeline.start(TimeRange::Live).await.unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;

        let view = pipeline.view().await;
        assert!(view.motor_on);
        assert_eq!(view.display.current, 1.25);
        assert_eq!(view.series.current.len(), 3);
        assert!(view.series.rpm.iter().all(|p| p.value == 15.0));

        // capacity 30
        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(pipeline.view().await.series.voltage.len(), 30);
        pipeline.stop().await;
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_to_history_and_back_tears_down_once_per_transition() {
        let counters = Arc::new(Counters::default());
        let history = Arc::new(FakeHistory { samples: samples(300) });
        let pipeline = pipeline(counters.clone(), history, MotorStateMode::Inferred);

        pipeline.start(TimeRange::Live).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.view().await.series.voltage.len(), 2);

        pipeline.set_range(TimeRange::Hours24).await.unwrap();
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
        let view = pipeline.view().await;
        assert_eq!(view.range, Some(TimeRange::Hours24));
        // 300 rows downsampled to 150, no live points mixed in
        assert_eq!(view.series.voltage.len(), 150);
        assert_eq!(view.display.voltage, 220.123);
        assert_eq!(view.display.rpm, 15.0);

        // history mode does not tick
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(pipeline.view().await.series.voltage.len(), 150);

        pipeline.set_range(TimeRange::Live).await.unwrap();
        assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
        let view = pipeline.view().await;
        for parameter in Parameter::ALL {
            assert!(view.series.get(parameter).is_empty(), "{parameter}");
        }

        pipeline.stop().await;
        assert_eq!(counters.closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_mode_drops_readings_while_off() {
        let counters = Arc::new(Counters::default());
        let history = Arc::new(FakeHistory { samples: Vec::new() });
        let pipeline = pipeline(counters, history, MotorStateMode::Explicit);

        pipeline.start(TimeRange::Live).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let view = pipeline.view().await;
        assert!(!view.motor_on);
        assert_eq!(view.display.current, 0.0);
        assert_eq!(view.series.current.len(), 1);
        pipeline.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_history_does_not_block_or_overwrite_next_range() {
        let counters = Arc::new(Counters::default());
        let release = Arc::new(tokio::sync::Notify::new());
        let history = Arc::new(GatedHistory {
            release: release.clone(),
            samples: samples(300),
        });
        let pipeline = Arc::new(pipeline(counters.clone(), history, MotorStateMode::Inferred));

        let pending = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.set_range(TimeRange::Hours24).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        // the fetch is still in flight; switching must not wait for it
        pipeline.set_range(TimeRange::Live).await.unwrap();
        release.notify_one();
        pending.await.unwrap().unwrap();

        let view = pipeline.view().await;
        assert_eq!(view.range, Some(TimeRange::Live));
        assert!(view.series.voltage.is_empty());
        assert_eq!(view.display.voltage, 0.0);
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_history_fetch_failure_leaves_windows_empty() {
        let counters = Arc::new(Counters::default());
        let pipeline = pipeline(counters.clone(), Arc::new(FailingHistory), MotorStateMode::Inferred);

        pipeline.start(TimeRange::Hours6).await.unwrap();
        let view = pipeline.view().await;
        assert_eq!(view.range, Some(TimeRange::Hours6));
        assert!(view.series.power.is_empty());
        assert_eq!(counters.opens.load(Ordering::SeqCst), 0);
    }
}
