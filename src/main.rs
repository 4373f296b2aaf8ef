/// hazmon_service - weather hazard prediction daemon
///
/// Usage:
///   hazmon_service [--config PATH] once
///   hazmon_service [--config PATH] daemon [INTERVAL_HOURS]
///   hazmon_service [--config PATH] verify [--probe]
///   hazmon_service [--config PATH] train CSV_PATH [SOURCE_LABEL]
///   hazmon_service [--config PATH] predict SOURCE JSON_PATH
///
/// Settings come from hazmon.toml (defaults if absent); API keys and
/// DATABASE_URL from the environment or .env.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use hazmon_service::alert::sink::{AlertSink, LogAlertSink, PostgresAlertSink};
use hazmon_service::analysis::forecast::{self, BatchForecaster};
use hazmon_service::config::{AppConfig, DEFAULT_CONFIG_PATH, Secrets};
use hazmon_service::inference::artifact::{FileModelStore, ModelHandle};
use hazmon_service::inference::hybrid::HybridPredictor;
use hazmon_service::ingest::WeatherSource;
use hazmon_service::ingest::openweather::OpenWeatherClient;
use hazmon_service::ingest::weatherlink::WeatherLinkClient;
use hazmon_service::logging::{self, LogSource};
use hazmon_service::scheduler::{AutoPredictionScheduler, SchedulerConfig};
use hazmon_service::training::{self, TrainingOptions};
use hazmon_service::verify;

const USAGE: &str = "usage: hazmon_service [--config PATH] <once|daemon [HOURS]|verify [--probe]|train CSV [LABEL]|predict SOURCE JSON>";

fn main() -> Result<(), Box<dyn Error>> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();

    let mut config_path = PathBuf::from(DEFAULT_CONFIG_PATH);
    if let Some(pos) = args.iter().position(|a| a == "--config") {
        if pos + 1 >= args.len() {
            return Err("--config needs a path".into());
        }
        config_path = PathBuf::from(args.remove(pos + 1));
        args.remove(pos);
    }

    let config = AppConfig::load(&config_path)?;
    logging::init_logger(
        config.log_level(),
        config.logging.file.as_deref(),
        config.logging.console_timestamps,
    );
    let secrets = Secrets::from_env();
    logging::debug(LogSource::System, None, &format!("{:?}", secrets));

    let Some(command) = args.first().cloned() else {
        eprintln!("{}", USAGE);
        return Err("no command given".into());
    };
    let rest = &args[1..];

    match command.as_str() {
        "once" => run_once(&config, &secrets),
        "daemon" => run_daemon(&config, &secrets, rest),
        "verify" => run_verify(&config, &secrets, rest),
        "train" => run_train(&config, rest),
        "predict" => run_predict(&config, rest),
        other => {
            eprintln!("{}", USAGE);
            Err(format!("unknown command '{}'", other).into())
        }
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

fn build_predictor(config: &AppConfig) -> Arc<HybridPredictor> {
    let handle = ModelHandle::from_dir(&config.model.dir);
    Arc::new(HybridPredictor::new(Arc::new(handle), config.thresholds))
}

fn build_sink(config: &AppConfig, secrets: &Secrets) -> Result<Arc<dyn AlertSink>, Box<dyn Error>> {
    match config.alerts.sink.as_str() {
        "postgres" => {
            let url = secrets
                .database_url
                .as_deref()
                .ok_or("alerts.sink = \"postgres\" needs DATABASE_URL")?;
            let sink = PostgresAlertSink::connect(url, &config.alerts.recipients)?;
            logging::info(LogSource::Alert, None, "Writing alerts to notifications table");
            Ok(Arc::new(sink))
        }
        _ => Ok(Arc::new(LogAlertSink)),
    }
}

fn build_scheduler(config: &AppConfig, secrets: &Secrets) -> Result<AutoPredictionScheduler, Box<dyn Error>> {
    let source = OpenWeatherClient::new(&config.openweather, secrets.openweather_api_key.clone())?;
    Ok(AutoPredictionScheduler::new(
        Arc::new(source),
        build_predictor(config),
        build_sink(config, secrets)?,
        SchedulerConfig::from_app(config),
    ))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn run_once(config: &AppConfig, secrets: &Secrets) -> Result<(), Box<dyn Error>> {
    let scheduler = build_scheduler(config, secrets)?;
    let summary = scheduler.run_once();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    if summary.success {
        Ok(())
    } else {
        Err(summary.error.unwrap_or_else(|| "cycle failed".to_string()).into())
    }
}

fn run_daemon(config: &AppConfig, secrets: &Secrets, args: &[String]) -> Result<(), Box<dyn Error>> {
    let interval_hours = match args.first() {
        Some(h) => h.parse::<u64>().map_err(|_| format!("invalid interval '{}'", h))?,
        None => config.scheduler.interval_hours,
    };

    let scheduler = build_scheduler(config, secrets)?;
    scheduler.start(interval_hours)?;
    logging::info(
        LogSource::System,
        None,
        &format!("🌀 hazmon daemon running at ({}, {})", config.openweather.lat, config.openweather.lon),
    );

    // The worker never exits on its own; park here and report status.
    loop {
        std::thread::sleep(Duration::from_secs(interval_hours.saturating_mul(3600)));
        let status = scheduler.status();
        logging::debug(
            LogSource::Scheduler,
            None,
            &format!("state={} last_run={:?}", status.state, status.last_run),
        );
    }
}

fn run_verify(config: &AppConfig, secrets: &Secrets, args: &[String]) -> Result<(), Box<dyn Error>> {
    let predictor = build_predictor(config);

    let mut sources: Vec<Arc<dyn WeatherSource>> = Vec::new();
    if args.iter().any(|a| a == "--probe") {
        match OpenWeatherClient::new(&config.openweather, secrets.openweather_api_key.clone()) {
            Ok(c) => sources.push(Arc::new(c)),
            Err(e) => println!("⚠ OpenWeather not probed: {}", e),
        }
        match WeatherLinkClient::new(
            &config.weatherlink,
            secrets.weatherlink_api_key.clone(),
            secrets.weatherlink_api_secret.clone(),
        ) {
            Ok(c) => sources.push(Arc::new(c)),
            Err(e) => println!("⚠ WeatherLink not probed: {}", e),
        }
    }

    let report = verify::health_check(&predictor, &sources);
    verify::print_summary(&report);
    Ok(())
}

fn run_train(config: &AppConfig, args: &[String]) -> Result<(), Box<dyn Error>> {
    let csv = args.first().ok_or("train needs a CSV path")?;
    let mut options = TrainingOptions::default();
    if let Some(label) = args.get(1) {
        options.data_source = label.clone();
    }

    let store = FileModelStore::new(&config.model.dir);
    let metadata = training::train_from_csv(Path::new(csv), &config.thresholds, &options, &store)?;
    println!("{}", serde_json::to_string_pretty(&metadata)?);
    Ok(())
}

fn run_predict(config: &AppConfig, args: &[String]) -> Result<(), Box<dyn Error>> {
    let (Some(source), Some(path)) = (args.first(), args.get(1)) else {
        return Err("predict needs SOURCE and JSON_PATH".into());
    };
    let payload: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let predictor = build_predictor(config);

    match payload {
        Value::Array(points) => {
            let forecaster = BatchForecaster::new(predictor, config.scheduler.worker_threads);
            let entries = forecaster.predict_batch(&points, source)?;
            let summary = forecast::summarize(&entries);
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        single => {
            let prediction = predictor.predict_payload(&single, source)?;
            println!("{}", serde_json::to_string_pretty(&prediction)?);
        }
    }
    Ok(())
}
