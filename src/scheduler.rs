//! Continuous forecast polling.
//!
//! One worker thread repeats: fetch the forecast, predict every point,
//! forward hazards to the alert sink, sleep. The sleep is a `recv_timeout`
//! on the control channel so `stop()` wakes it immediately; a cycle that is
//! already running finishes first. A failed cycle waits the cooldown
//! instead of the full interval. The loop never exits on its own: a cycle
//! that panics (in a source, the predictor or a sink) is reported as a
//! failed cycle and retried after the cooldown.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::alert::sink::{Alert, AlertSink};
use crate::analysis::forecast::{BatchEntry, BatchForecaster};
use crate::config::AppConfig;
use crate::inference::hybrid::HybridPredictor;
use crate::ingest::{ForecastResolution, WeatherSource};
use crate::logging::{self, LogSource};
use crate::model::{FetchError, HazardType, PredictionSource, RiskLevel};

/// Series longer than this are hourly; shorter ones are 3-hourly.
const HOURLY_SERIES_MIN_LEN: usize = 50;

/// Longest accepted polling interval (one week).
pub const MAX_INTERVAL_HOURS: u64 = 24 * 7;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Fetching,
    Predicting,
    Sleeping,
    Stopped,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Fetching => "fetching",
            SchedulerState::Predicting => "predicting",
            SchedulerState::Sleeping => "sleeping",
            SchedulerState::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerError {
    AlreadyRunning,
    NotRunning,
    InvalidInterval(u64),
    Spawn(String),
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::AlreadyRunning => write!(f, "Scheduler is already running"),
            SchedulerError::NotRunning => write!(f, "Scheduler is not running"),
            SchedulerError::InvalidInterval(h) => {
                write!(f, "Invalid interval: {} hours (1..={})", h, MAX_INTERVAL_HOURS)
            }
            SchedulerError::Spawn(msg) => write!(f, "Could not start scheduler thread: {}", msg),
        }
    }
}

impl std::error::Error for SchedulerError {}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval_hours: u64,
    pub cooldown: Duration,
    pub worker_threads: usize,
    /// Forecast points requested per cycle; `None` takes the provider's default.
    pub forecast_count: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            interval_hours: 1,
            cooldown: Duration::from_secs(300),
            worker_threads: 4,
            forecast_count: None,
        }
    }
}

impl SchedulerConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        SchedulerConfig {
            interval_hours: config.scheduler.interval_hours,
            cooldown: Duration::from_secs(config.scheduler.cooldown_secs),
            worker_threads: config.scheduler.worker_threads,
            forecast_count: config.openweather.forecast_count,
        }
    }
}

/// Conditions at a hazardous forecast point, in canonical units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherSnapshot {
    pub temperature_c: f64,
    pub pressure_hpa: f64,
    pub humidity_pct: f64,
    pub wind_speed_ms: f64,
    pub precipitation_mm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HazardDetection {
    pub forecast_time: DateTime<Utc>,
    pub hours_ahead: u64,
    pub hazard_type: HazardType,
    pub probability: f64,
    pub risk_level: RiskLevel,
    pub hazards: Vec<String>,
    pub source: PredictionSource,
    pub weather: WeatherSnapshot,
}

impl HazardDetection {
    fn from_entry(entry: &BatchEntry, interval_hours: u64) -> Self {
        let r = &entry.record;
        let p = &entry.prediction;
        HazardDetection {
            forecast_time: p.timestamp,
            hours_ahead: entry.index as u64 * interval_hours,
            hazard_type: p.hazard_type,
            probability: p.probability,
            risk_level: p.risk_level,
            hazards: p.hazards_triggered.clone(),
            source: p.source,
            weather: WeatherSnapshot {
                temperature_c: r.temperature_c,
                pressure_hpa: r.pressure_hpa,
                humidity_pct: r.humidity_pct,
                wind_speed_ms: r.wind_speed_ms,
                precipitation_mm: r.precipitation_mm,
            },
        }
    }
}

/// Outcome of one fetch-and-predict cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleSummary {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: f64,
    pub forecast_intervals: usize,
    pub interval_hours: Option<u64>,
    pub endpoint: Option<ForecastResolution>,
    pub hazards_detected: usize,
    pub hazards: Vec<HazardDetection>,
    pub alerts_sent: usize,
    pub error: Option<String>,
}

impl CycleSummary {
    fn failed(timestamp: DateTime<Utc>, started: Instant, error: String) -> Self {
        CycleSummary {
            success: false,
            timestamp,
            duration_seconds: started.elapsed().as_secs_f64(),
            forecast_intervals: 0,
            interval_hours: None,
            endpoint: None,
            hazards_detected: 0,
            hazards: Vec::new(),
            alerts_sent: 0,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub state: SchedulerState,
    pub last_run: Option<DateTime<Utc>>,
    pub interval_hours: Option<u64>,
}

// ============================================================================
// Shared state
// ============================================================================

enum Control {
    Stop,
}

struct Worker {
    control: Sender<Control>,
    handle: JoinHandle<()>,
}

struct Shared {
    source: Arc<dyn WeatherSource>,
    forecaster: BatchForecaster,
    sink: Arc<dyn AlertSink>,
    config: SchedulerConfig,
    status: Mutex<SchedulerStatus>,
    /// Serializes loop cycles and `run_once`.
    cycle: Mutex<()>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl Shared {
    fn set_state(&self, state: SchedulerState) {
        lock(&self.status).state = state;
    }

    fn fetch(&self) -> Result<(ForecastResolution, Vec<serde_json::Value>), FetchError> {
        let count = self.config.forecast_count;
        let endpoint = self.source.kind().as_str();

        match self.source.fetch_forecast(ForecastResolution::Hourly, count) {
            Ok(points) if !points.is_empty() => return Ok((ForecastResolution::Hourly, points)),
            Ok(_) => logging::warn(
                LogSource::Scheduler,
                Some(endpoint),
                "Hourly forecast returned no points",
            ),
            Err(e) => logging::log_fetch_failure(LogSource::Scheduler, endpoint, "Hourly forecast", &e),
        }

        logging::info(LogSource::Scheduler, Some(endpoint), "Falling back to 3-hour forecast");
        match self.source.fetch_forecast(ForecastResolution::ThreeHourly, count) {
            Ok(points) => Ok((ForecastResolution::ThreeHourly, points)),
            Err(e) => {
                logging::log_fetch_failure(LogSource::Scheduler, endpoint, "3-hour forecast", &e);
                Err(e)
            }
        }
    }

    /// Runs one cycle. `from_loop` is false for `run_once`; a manual cycle
    /// while the loop is running leaves the reported state to the loop.
    fn run_cycle(&self, from_loop: bool) -> CycleSummary {
        let _cycle = lock(&self.cycle);
        let started = Instant::now();
        let timestamp = Utc::now();
        let tracks_state = from_loop || !lock(&self.status).running;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.cycle_body(timestamp, started, tracks_state)
        }));
        let summary = outcome.unwrap_or_else(|payload| {
            CycleSummary::failed(
                timestamp,
                started,
                format!("Cycle panicked: {}", panic_message(payload.as_ref())),
            )
        });

        if !summary.success {
            logging::error(
                LogSource::Scheduler,
                None,
                summary.error.as_deref().unwrap_or("Cycle failed"),
            );
        }

        let mut status = lock(&self.status);
        status.last_run = Some(timestamp);
        if tracks_state && !status.running {
            status.state = SchedulerState::Idle;
        }
        summary
    }

    fn cycle_body(&self, timestamp: DateTime<Utc>, started: Instant, tracks_state: bool) -> CycleSummary {
        let mark = |state| {
            if tracks_state {
                self.set_state(state);
            }
        };

        mark(SchedulerState::Fetching);
        match self.fetch() {
            Err(e) => CycleSummary::failed(timestamp, started, format!("Forecast unavailable: {}", e)),
            Ok((_, points)) if points.is_empty() => {
                CycleSummary::failed(timestamp, started, "No forecast data".to_string())
            }
            Ok((endpoint, points)) => {
                mark(SchedulerState::Predicting);
                self.predict(timestamp, started, endpoint, &points)
            }
        }
    }

    fn predict(
        &self,
        timestamp: DateTime<Utc>,
        started: Instant,
        endpoint: ForecastResolution,
        points: &[serde_json::Value],
    ) -> CycleSummary {
        let interval_hours = if points.len() > HOURLY_SERIES_MIN_LEN { 1 } else { 3 };
        let entries = self
            .forecaster
            .predict_batch_as(self.source.kind(), points, timestamp);
        let skipped = points.len() - entries.len();

        let hazards: Vec<HazardDetection> = entries
            .iter()
            .filter(|e| e.prediction.event)
            .map(|e| HazardDetection::from_entry(e, interval_hours))
            .collect();

        let mut alerts_sent = 0;
        for detection in &hazards {
            logging::warn(
                LogSource::Scheduler,
                Some(&format!("T+{}h", detection.hours_ahead)),
                &format!(
                    "{} ({} risk, p={:.2}): {}",
                    detection.hazard_type,
                    detection.risk_level,
                    detection.probability,
                    detection.hazards.join(", ")
                ),
            );
            let alert = Alert::from_template(
                detection.hazard_type,
                detection.probability,
                detection.risk_level,
                detection.forecast_time,
            );
            match self.sink.send(&alert) {
                Ok(()) => alerts_sent += 1,
                Err(e) => logging::error(LogSource::Alert, Some(&alert.title), &e.to_string()),
            }
        }

        let duration_seconds = started.elapsed().as_secs_f64();
        logging::log_cycle_summary(points.len(), hazards.len(), skipped, duration_seconds);

        CycleSummary {
            success: true,
            timestamp,
            duration_seconds,
            forecast_intervals: points.len(),
            interval_hours: Some(interval_hours),
            endpoint: Some(endpoint),
            hazards_detected: hazards.len(),
            hazards,
            alerts_sent,
            error: None,
        }
    }
}

// ============================================================================
// Scheduler
// ============================================================================

pub struct AutoPredictionScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl AutoPredictionScheduler {
    pub fn new(
        source: Arc<dyn WeatherSource>,
        predictor: Arc<HybridPredictor>,
        sink: Arc<dyn AlertSink>,
        config: SchedulerConfig,
    ) -> Self {
        let forecaster = BatchForecaster::new(predictor, config.worker_threads);
        AutoPredictionScheduler {
            shared: Arc::new(Shared {
                source,
                forecaster,
                sink,
                status: Mutex::new(SchedulerStatus {
                    running: false,
                    state: SchedulerState::Idle,
                    last_run: None,
                    interval_hours: None,
                }),
                config,
                cycle: Mutex::new(()),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Runs one cycle on the calling thread. Waits for a loop cycle in
    /// progress to finish first.
    pub fn run_once(&self) -> CycleSummary {
        self.shared.run_cycle(false)
    }

    /// Starts the loop on a worker thread; the first cycle runs immediately.
    pub fn start(&self, interval_hours: u64) -> Result<(), SchedulerError> {
        if interval_hours == 0 || interval_hours > MAX_INTERVAL_HOURS {
            return Err(SchedulerError::InvalidInterval(interval_hours));
        }

        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let (tx, rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        {
            let mut status = lock(&self.shared.status);
            status.running = true;
            status.interval_hours = Some(interval_hours);
        }

        let spawned = std::thread::Builder::new()
            .name("hazmon-scheduler".to_string())
            .spawn(move || run_loop(shared, rx, interval_hours));

        match spawned {
            Ok(handle) => {
                *worker = Some(Worker { control: tx, handle });
                logging::info(
                    LogSource::Scheduler,
                    None,
                    &format!("Started, every {} hour(s)", interval_hours),
                );
                Ok(())
            }
            Err(e) => {
                let mut status = lock(&self.shared.status);
                status.running = false;
                status.interval_hours = None;
                Err(SchedulerError::Spawn(e.to_string()))
            }
        }
    }

    /// Signals the loop and waits for the worker to exit.
    pub fn stop(&self) -> Result<(), SchedulerError> {
        let Some(worker) = lock(&self.worker).take() else {
            return Err(SchedulerError::NotRunning);
        };

        // A closed channel also stops the loop.
        let _ = worker.control.send(Control::Stop);
        if worker.handle.join().is_err() {
            logging::error(LogSource::Scheduler, None, "Worker thread panicked");
        }

        let mut status = lock(&self.shared.status);
        status.running = false;
        status.state = SchedulerState::Stopped;
        logging::info(LogSource::Scheduler, None, "Stopped");
        Ok(())
    }

    pub fn status(&self) -> SchedulerStatus {
        lock(&self.shared.status).clone()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.worker).is_some()
    }
}

impl Drop for AutoPredictionScheduler {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

fn run_loop(shared: Arc<Shared>, control: Receiver<Control>, interval_hours: u64) {
    let interval = Duration::from_secs(interval_hours.saturating_mul(3600));

    loop {
        match control.try_recv() {
            Ok(Control::Stop) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        let summary = shared.run_cycle(true);
        let wait = if summary.success {
            interval
        } else {
            logging::warn(
                LogSource::Scheduler,
                None,
                &format!("Retrying in {}s", shared.config.cooldown.as_secs()),
            );
            shared.config.cooldown
        };

        shared.set_state(SchedulerState::Sleeping);
        match control.recv_timeout(wait) {
            Ok(Control::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    shared.set_state(SchedulerState::Stopped);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::sink::MemoryAlertSink;
    use crate::alert::thresholds::HazardThresholds;
    use crate::model::SourceKind;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns `hourly` for hourly requests and `three_hourly` otherwise,
    /// counting every call.
    struct ScriptedSource {
        hourly: Result<Vec<Value>, FetchError>,
        three_hourly: Result<Vec<Value>, FetchError>,
        calls: AtomicUsize,
    }

    impl WeatherSource for ScriptedSource {
        fn kind(&self) -> SourceKind {
            SourceKind::OpenWeather
        }
        fn fetch_current(&self) -> Result<Value, FetchError> {
            Err(FetchError::NotSupported("current".into()))
        }
        fn fetch_forecast(
            &self,
            resolution: ForecastResolution,
            _count: Option<usize>,
        ) -> Result<Vec<Value>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match resolution {
                ForecastResolution::Hourly => self.hourly.clone(),
                ForecastResolution::ThreeHourly => self.three_hourly.clone(),
            }
        }
    }

    fn point(dt: i64, rain: f64, wind: f64) -> Value {
        json!({
            "dt": dt,
            "main": {"temp": 300.15, "pressure": 1008, "humidity": 80},
            "wind": {"speed": wind},
            "rain": {"1h": rain}
        })
    }

    fn series(n: usize, storm_at: usize) -> Vec<Value> {
        (0..n)
            .map(|i| {
                let dt = 1_725_148_800 + i as i64 * 3600;
                if i == storm_at { point(dt, 60.0, 20.0) } else { point(dt, 0.0, 2.0) }
            })
            .collect()
    }

    fn scheduler(
        source: ScriptedSource,
        cooldown: Duration,
    ) -> (AutoPredictionScheduler, Arc<MemoryAlertSink>, Arc<ScriptedSource>) {
        let source = Arc::new(source);
        let sink = Arc::new(MemoryAlertSink::new());
        let config = SchedulerConfig {
            cooldown,
            worker_threads: 2,
            ..SchedulerConfig::default()
        };
        let s = AutoPredictionScheduler::new(
            source.clone(),
            Arc::new(HybridPredictor::rules_only(HazardThresholds::default())),
            sink.clone(),
            config,
        );
        (s, sink, source)
    }

    #[test]
    fn test_hourly_series_detection() {
        let (s, sink, _) = scheduler(
            ScriptedSource {
                hourly: Ok(series(60, 5)),
                three_hourly: Ok(Vec::new()),
                calls: AtomicUsize::new(0),
            },
            Duration::from_secs(300),
        );
        let summary = s.run_once();
        assert!(summary.success);
        assert_eq!(summary.endpoint, Some(ForecastResolution::Hourly));
        assert_eq!(summary.interval_hours, Some(1));
        assert_eq!(summary.forecast_intervals, 60);
        assert_eq!(summary.hazards_detected, 1);
        assert_eq!(summary.hazards[0].hours_ahead, 5);
        assert_eq!(summary.hazards[0].hazard_type, HazardType::TropicalStorm);
        assert_eq!(summary.alerts_sent, 1);
        assert_eq!(sink.len(), 1);
        assert_eq!(s.status().state, SchedulerState::Idle);
        assert!(s.status().last_run.is_some());
    }

    #[test]
    fn test_falls_back_to_three_hourly() {
        let (s, _, source) = scheduler(
            ScriptedSource {
                hourly: Err(FetchError::Unauthorized(401)),
                three_hourly: Ok(series(40, 2)),
                calls: AtomicUsize::new(0),
            },
            Duration::from_secs(300),
        );
        let summary = s.run_once();
        assert!(summary.success);
        assert_eq!(summary.endpoint, Some(ForecastResolution::ThreeHourly));
        assert_eq!(summary.interval_hours, Some(3));
        assert_eq!(summary.hazards[0].hours_ahead, 6);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_both_endpoints_failing_is_cycle_error() {
        let (s, sink, _) = scheduler(
            ScriptedSource {
                hourly: Err(FetchError::HttpError(500)),
                three_hourly: Err(FetchError::RequestFailed("timed out".into())),
                calls: AtomicUsize::new(0),
            },
            Duration::from_secs(300),
        );
        let summary = s.run_once();
        assert!(!summary.success);
        assert!(summary.error.is_some());
        assert_eq!(summary.forecast_intervals, 0);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_start_twice_and_stop_twice() {
        let (s, _, _) = scheduler(
            ScriptedSource {
                hourly: Ok(series(10, 99)),
                three_hourly: Ok(Vec::new()),
                calls: AtomicUsize::new(0),
            },
            Duration::from_secs(300),
        );
        assert_eq!(s.start(0), Err(SchedulerError::InvalidInterval(0)));
        assert_eq!(
            s.start(u64::MAX),
            Err(SchedulerError::InvalidInterval(u64::MAX)),
            "oversized intervals are rejected instead of overflowing"
        );
        assert!(!s.status().running);
        s.start(1).unwrap();
        assert_eq!(s.start(1), Err(SchedulerError::AlreadyRunning));
        assert!(s.status().running);
        assert_eq!(s.status().interval_hours, Some(1));

        let began = Instant::now();
        s.stop().unwrap();
        assert!(began.elapsed() < Duration::from_secs(30), "stop must wake the sleeping worker");
        assert_eq!(s.stop(), Err(SchedulerError::NotRunning));

        let status = s.status();
        assert!(!status.running);
        assert_eq!(status.state, SchedulerState::Stopped);
    }

    #[test]
    fn test_failed_cycle_retries_after_cooldown() {
        let (s, _, source) = scheduler(
            ScriptedSource {
                hourly: Err(FetchError::Unauthorized(403)),
                three_hourly: Err(FetchError::Unauthorized(403)),
                calls: AtomicUsize::new(0),
            },
            Duration::from_millis(10),
        );
        s.start(1).unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        while source.calls.load(Ordering::SeqCst) < 6 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        s.stop().unwrap();
        assert!(
            source.calls.load(Ordering::SeqCst) >= 6,
            "at least three cycles ran on the cooldown"
        );
    }
}
