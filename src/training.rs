//! Offline model training from historical daily observations.
//!
//! Reads a Meteostat-style CSV (header row, one row per day), builds the
//! same canonical records the live path builds, labels each row with the
//! rule engine, fits the Gaussian naive Bayes pipeline on the oldest 80% of
//! the rows and evaluates it on the newest 20%. Rows are never shuffled:
//! evaluation always looks forward in time.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::alert::thresholds::{HazardThresholds, score};
use crate::analysis::features::apply_rolling_means;
use crate::inference::artifact::{ConfusionCounts, FileModelStore, ModelMetadata};
use crate::inference::hybrid::feature_vector;
use crate::inference::naive_bayes::{GaussianNbModel, HazardModel};
use crate::logging::{self, LogSource};
use crate::model::{CanonicalFeatureRecord, FEATURE_COLUMNS, Measurements, ModelError};

/// Meteostat reports wind in km/h.
const KMH_PER_MS: f64 = 3.6;

/// Fewer rows than this cannot give every CV fold a test window.
pub const MIN_TRAINING_ROWS: usize = 30;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum TrainingError {
    Io(String),
    Csv { line: usize, message: String },
    NotEnoughData(String),
    Model(ModelError),
}

impl fmt::Display for TrainingError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TrainingError::Io(msg) => write!(f, "I/O error: {}", msg),
            TrainingError::Csv { line, message } => write!(f, "CSV line {}: {}", line, message),
            TrainingError::NotEnoughData(msg) => write!(f, "Not enough training data: {}", msg),
            TrainingError::Model(e) => write!(f, "Model error: {}", e),
        }
    }
}

impl std::error::Error for TrainingError {}

impl From<ModelError> for TrainingError {
    fn from(e: ModelError) -> Self {
        TrainingError::Model(e)
    }
}

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TrainingOptions {
    /// Columns kept by feature selection.
    pub select_k: usize,
    /// Share of the newest rows held out for evaluation.
    pub test_fraction: f64,
    pub cv_folds: usize,
    /// Free-text provenance written into the metadata.
    pub data_source: String,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        TrainingOptions {
            select_k: 12,
            test_fraction: 0.2,
            cv_folds: 5,
            data_source: "Meteostat (NAIA Station)".to_string(),
        }
    }
}

/// Labeled feature matrix ready for fitting.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    pub labels: Vec<bool>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn event_count(&self) -> usize {
        self.labels.iter().filter(|&&l| l).count()
    }
}

pub struct TrainingOutcome {
    pub model: GaussianNbModel,
    pub metadata: ModelMetadata,
}

// ---------------------------------------------------------------------------
// CSV parsing
// ---------------------------------------------------------------------------

/// Canonical field a CSV header maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Field {
    Date,
    Temperature,
    TempMin,
    TempMax,
    Precipitation,
    WindSpeed,
    WindGust,
    WindDirection,
    Pressure,
    Humidity,
}

/// Maps a header to its field and whether the column is in km/h.
fn field_for_header(header: &str) -> Option<(Field, bool)> {
    let field = match header.trim().to_ascii_lowercase().as_str() {
        "date" | "time" | "timestamp" => (Field::Date, false),
        "tavg" | "temp" | "temperature" => (Field::Temperature, false),
        "tmin" | "temp_lo" | "temp_min" => (Field::TempMin, false),
        "tmax" | "temp_hi" | "temp_max" => (Field::TempMax, false),
        "prcp" | "precipitation" | "rainfall_mm" => (Field::Precipitation, false),
        "wspd" => (Field::WindSpeed, true),
        "wind_speed" | "wind_speed_avg" => (Field::WindSpeed, false),
        "wpgt" => (Field::WindGust, true),
        "wind_gust" | "wind_speed_hi" => (Field::WindGust, false),
        "wdir" | "wind_direction" => (Field::WindDirection, false),
        "pres" | "pressure" => (Field::Pressure, false),
        "rhum" | "humidity" => (Field::Humidity, false),
        _ => return None,
    };
    Some(field)
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Parses a training CSV into time-ordered measurements.
///
/// The header decides which columns are read; unknown columns are ignored.
/// Empty cells, "null" and "NaN" are treated as missing. A row whose date
/// cannot be parsed is an error.
pub fn parse_training_csv(csv: &str) -> Result<Vec<Measurements>, TrainingError> {
    let mut lines = csv.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());

    let Some((_, header)) = lines.next() else {
        return Err(TrainingError::NotEnoughData("empty CSV".to_string()));
    };

    let mut columns: HashMap<Field, (usize, bool)> = HashMap::new();
    for (i, name) in header.split(',').enumerate() {
        if let Some((field, kmh)) = field_for_header(name) {
            // First matching header wins.
            columns.entry(field).or_insert((i, kmh));
        }
    }
    let Some(&(date_col, _)) = columns.get(&Field::Date) else {
        return Err(TrainingError::Csv {
            line: 1,
            message: "no date column".to_string(),
        });
    };

    let mut out = Vec::new();
    for (i, line) in lines {
        let cells: Vec<&str> = line.split(',').collect();

        let get = |field: Field| -> Option<f64> {
            let &(col, kmh) = columns.get(&field)?;
            let cell = cells.get(col)?.trim();
            if cell.is_empty() || cell.eq_ignore_ascii_case("null") {
                return None;
            }
            let value: f64 = cell.parse().ok()?;
            if !value.is_finite() {
                return None;
            }
            Some(if kmh { value / KMH_PER_MS } else { value })
        };

        let date_cell = cells.get(date_col).copied().unwrap_or("");
        let timestamp = parse_date(date_cell).ok_or_else(|| TrainingError::Csv {
            line: i + 1,
            message: format!("unparseable date '{}'", date_cell),
        })?;

        out.push(Measurements {
            timestamp: Some(timestamp),
            temperature_c: get(Field::Temperature),
            temp_min_c: get(Field::TempMin),
            temp_max_c: get(Field::TempMax),
            pressure_hpa: get(Field::Pressure),
            humidity_pct: get(Field::Humidity),
            wind_speed_ms: get(Field::WindSpeed),
            wind_gust_ms: get(Field::WindGust),
            wind_direction_deg: get(Field::WindDirection),
            precipitation_mm: get(Field::Precipitation),
        });
    }

    out.sort_by_key(|m| m.timestamp);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Dataset
// ---------------------------------------------------------------------------

/// Builds records, rolling means and rule-engine labels. Columns that are
/// zero on every row carry no information and are dropped.
pub fn build_dataset(measurements: Vec<Measurements>, thresholds: &HazardThresholds) -> Dataset {
    let now = Utc::now();
    let mut records: Vec<CanonicalFeatureRecord> = measurements
        .into_iter()
        .map(|m| CanonicalFeatureRecord::from_measurements(m, now))
        .collect();
    apply_rolling_means(&mut records);

    let labels: Vec<bool> = records.iter().map(|r| score(r, thresholds).event).collect();

    let columns: Vec<String> = FEATURE_COLUMNS
        .iter()
        .filter(|c| records.iter().any(|r| r.feature_or_default(c) != 0.0))
        .map(|c| c.to_string())
        .collect();
    let rows = records.iter().map(|r| feature_vector(r, &columns)).collect();

    Dataset { columns, rows, labels }
}

// ---------------------------------------------------------------------------
// Evaluation helpers
// ---------------------------------------------------------------------------

/// Rows held out for the final evaluation: the newest `ceil(n * fraction)`.
pub fn holdout_split(n: usize, test_fraction: f64) -> usize {
    let n_test = (n as f64 * test_fraction).ceil() as usize;
    n.saturating_sub(n_test.min(n))
}

/// Expanding-window folds over `n` ordered rows: each fold trains on every
/// row before its test window. Returns `(train_end, test_end)` pairs, with
/// the test window being `train_end..test_end`.
pub fn time_series_folds(n: usize, folds: usize) -> Vec<(usize, usize)> {
    if folds == 0 {
        return Vec::new();
    }
    let test_size = n / (folds + 1);
    if test_size == 0 {
        return Vec::new();
    }
    let first = n - folds * test_size;
    (0..folds)
        .map(|i| {
            let start = first + i * test_size;
            (start, start + test_size)
        })
        .collect()
}

fn predict_all(model: &GaussianNbModel, rows: &[Vec<f64>]) -> Result<Vec<bool>, ModelError> {
    rows.iter().map(|r| model.predict(r).map(|(event, _)| event)).collect()
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Event-class F1 per fold. Folds whose training window holds a single
/// class are skipped.
pub fn cross_validate(
    rows: &[Vec<f64>],
    labels: &[bool],
    folds: usize,
    k: usize,
) -> Result<Vec<f64>, ModelError> {
    let mut scores = Vec::new();
    for (train_end, test_end) in time_series_folds(rows.len(), folds) {
        let train_labels = &labels[..train_end];
        if train_labels.iter().all(|&l| l) || !train_labels.iter().any(|&l| l) {
            logging::debug(
                LogSource::Model,
                None,
                &format!("CV fold ending at row {} skipped: single class", train_end),
            );
            continue;
        }
        let model = GaussianNbModel::fit(&rows[..train_end], train_labels, k)?;
        let predicted = predict_all(&model, &rows[train_end..test_end])?;
        scores.push(ConfusionCounts::from_predictions(&labels[train_end..test_end], &predicted).f1());
    }
    Ok(scores)
}

// ---------------------------------------------------------------------------
// Training
// ---------------------------------------------------------------------------

/// Fits and evaluates a model on an already built dataset.
pub fn train_dataset(
    dataset: &Dataset,
    options: &TrainingOptions,
    trained_at: DateTime<Utc>,
) -> Result<TrainingOutcome, TrainingError> {
    if dataset.len() < MIN_TRAINING_ROWS {
        return Err(TrainingError::NotEnoughData(format!(
            "{} rows, need at least {}",
            dataset.len(),
            MIN_TRAINING_ROWS
        )));
    }

    let split = holdout_split(dataset.len(), options.test_fraction);
    let (train_rows, test_rows) = dataset.rows.split_at(split);
    let (train_labels, test_labels) = dataset.labels.split_at(split);

    let positives = train_labels.iter().filter(|&&l| l).count();
    if positives == 0 || positives == train_labels.len() {
        return Err(TrainingError::NotEnoughData(format!(
            "training split has {} events in {} rows; both classes are required",
            positives,
            train_labels.len()
        )));
    }

    let k = options.select_k.min(dataset.columns.len());
    let cv_scores = cross_validate(train_rows, train_labels, options.cv_folds, k)?;
    let (cv_mean, cv_std) = mean_std(&cv_scores);

    let model = GaussianNbModel::fit(train_rows, train_labels, k)?;
    let predicted = predict_all(&model, test_rows)?;
    let confusion = ConfusionCounts::from_predictions(test_labels, &predicted);

    let metadata = ModelMetadata {
        feature_columns: dataset.columns.clone(),
        accuracy: confusion.accuracy(),
        cv_mean,
        cv_std,
        trained_at,
        training_samples: train_rows.len(),
        training_data_source: options.data_source.clone(),
        model_type: model.name().to_string(),
        confusion: Some(confusion),
    };

    logging::info(
        LogSource::Model,
        None,
        &format!(
            "Trained on {} rows ({} events): accuracy {:.3}, CV F1 {:.3} ± {:.3}",
            train_rows.len(),
            positives,
            metadata.accuracy,
            cv_mean,
            cv_std
        ),
    );

    Ok(TrainingOutcome { model, metadata })
}

/// Reads a CSV, trains, and writes both artifacts into `store`.
pub fn train_from_csv(
    path: &Path,
    thresholds: &HazardThresholds,
    options: &TrainingOptions,
    store: &FileModelStore,
) -> Result<ModelMetadata, TrainingError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| TrainingError::Io(format!("{}: {}", path.display(), e)))?;
    let measurements = parse_training_csv(&text)?;
    logging::info(
        LogSource::Model,
        Some(&path.display().to_string()),
        &format!("Loaded {} training rows", measurements.len()),
    );

    let dataset = build_dataset(measurements, thresholds);
    let outcome = train_dataset(&dataset, options, Utc::now())?;
    store.save(&outcome.model, &outcome.metadata)?;

    logging::info(
        LogSource::Model,
        Some(&store.dir().display().to_string()),
        "Model artifacts written",
    );
    Ok(outcome.metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    /// Daily rows where every fourth day is a storm.
    fn synthetic_csv(days: usize) -> String {
        let mut csv = String::from("date,tavg,tmin,tmax,prcp,wdir,wspd,wpgt,pres,tsun\n");
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        for i in 0..days {
            let date = start + Duration::days(i as i64);
            let (prcp, wspd, pres) = if i % 4 == 0 {
                (60.0 + (i % 7) as f64, 72.0 + (i % 5) as f64, 985.0)
            } else {
                ((i % 3) as f64, 10.0 + (i % 4) as f64, 1010.0 + (i % 2) as f64)
            };
            let tavg = 27.0 + (i % 5) as f64 * 0.3;
            csv.push_str(&format!(
                "{},{:.1},{:.1},{:.1},{},{},{},{},{},\n",
                date,
                tavg,
                tavg - 3.0,
                tavg + 3.0,
                prcp,
                90,
                wspd,
                wspd * 1.4,
                pres
            ));
        }
        csv
    }

    #[test]
    fn test_csv_aliases_and_units() {
        let csv = "date,tavg,prcp,wspd,pres\n2024-07-02,28.0,12.5,36.0,1004.2\n2024-07-01,27.0,,18.0,null\n";
        let rows = parse_training_csv(csv).unwrap();
        assert_eq!(rows.len(), 2);
        // Sorted by date.
        assert_eq!(
            rows[0].timestamp,
            Some(Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(rows[0].precipitation_mm, None);
        assert_eq!(rows[0].pressure_hpa, None);
        assert!((rows[0].wind_speed_ms.unwrap() - 5.0).abs() < 1e-9, "18 km/h is 5 m/s");
        assert_eq!(rows[1].precipitation_mm, Some(12.5));
        assert_eq!(rows[1].humidity_pct, None, "no humidity column");
    }

    #[test]
    fn test_station_export_columns_are_metric() {
        let csv = "timestamp,temp,temp_lo,temp_hi,wind_speed_avg,wind_speed_hi,rainfall_mm\n2024-07-01 06:00:00,26,24,30,4.5,9.0,3.2\n";
        let rows = parse_training_csv(csv).unwrap();
        assert_eq!(rows[0].wind_speed_ms, Some(4.5));
        assert_eq!(rows[0].wind_gust_ms, Some(9.0));
        assert_eq!(rows[0].temp_min_c, Some(24.0));
        assert_eq!(rows[0].precipitation_mm, Some(3.2));
    }

    #[test]
    fn test_bad_date_reports_line() {
        let csv = "date,tavg\n2024-07-01,27\nyesterday,28\n";
        match parse_training_csv(csv) {
            Err(TrainingError::Csv { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected CSV error, got {:?}", other.map(|r| r.len())),
        }
    }

    #[test]
    fn test_missing_date_column() {
        assert!(matches!(
            parse_training_csv("tavg,prcp\n27,0\n"),
            Err(TrainingError::Csv { line: 1, .. })
        ));
    }

    #[test]
    fn test_labels_come_from_rule_engine() {
        let rows = parse_training_csv(&synthetic_csv(40)).unwrap();
        let dataset = build_dataset(rows, &HazardThresholds::default());
        for (i, &label) in dataset.labels.iter().enumerate() {
            assert_eq!(label, i % 4 == 0, "row {}", i);
        }
        assert_eq!(dataset.event_count(), 10);
    }

    #[test]
    fn test_all_zero_columns_dropped() {
        let rows = parse_training_csv(&synthetic_csv(40)).unwrap();
        let dataset = build_dataset(rows, &HazardThresholds::default());
        assert!(dataset.columns.iter().any(|c| c == "precipitation"));
        assert!(dataset.columns.iter().any(|c| c == "humidity"), "defaulted to 60");
        for row in &dataset.rows {
            assert_eq!(row.len(), dataset.columns.len());
        }
    }

    #[test]
    fn test_holdout_split_keeps_newest_rows_for_test() {
        assert_eq!(holdout_split(100, 0.2), 80);
        assert_eq!(holdout_split(101, 0.2), 80);
        assert_eq!(holdout_split(3, 0.0), 3);
    }

    #[test]
    fn test_time_series_folds_expand() {
        let folds = time_series_folds(60, 5);
        assert_eq!(folds, vec![(10, 20), (20, 30), (30, 40), (40, 50), (50, 60)]);

        let folds = time_series_folds(63, 5);
        assert_eq!(folds.first(), Some(&(13, 23)));
        assert_eq!(folds.last(), Some(&(53, 63)));

        assert!(time_series_folds(4, 5).is_empty());
    }

    #[test]
    fn test_train_dataset_produces_metadata() {
        let rows = parse_training_csv(&synthetic_csv(200)).unwrap();
        let dataset = build_dataset(rows, &HazardThresholds::default());
        let trained_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let outcome = train_dataset(&dataset, &TrainingOptions::default(), trained_at).unwrap();

        let meta = &outcome.metadata;
        assert_eq!(meta.training_samples, 160);
        assert_eq!(meta.feature_columns, dataset.columns);
        assert_eq!(meta.trained_at, trained_at);
        assert_eq!(meta.model_type, "gaussian_nb");
        assert!(meta.accuracy > 0.9, "accuracy {}", meta.accuracy);
        assert!(meta.cv_mean > 0.8, "cv {}", meta.cv_mean);
        let confusion = meta.confusion.unwrap();
        assert_eq!(
            confusion.true_positive + confusion.false_positive
                + confusion.true_negative + confusion.false_negative,
            40
        );
        assert_eq!(outcome.model.n_features(), dataset.columns.len());
    }

    #[test]
    fn test_too_few_rows_rejected() {
        let rows = parse_training_csv(&synthetic_csv(10)).unwrap();
        let dataset = build_dataset(rows, &HazardThresholds::default());
        assert!(matches!(
            train_dataset(&dataset, &TrainingOptions::default(), Utc::now()),
            Err(TrainingError::NotEnoughData(_))
        ));
    }

    #[test]
    fn test_single_class_rejected() {
        let mut csv = String::from("date,tavg,prcp\n");
        for day in 1..=28 {
            csv.push_str(&format!("2024-02-{:02},27,0\n", day));
        }
        for day in 1..=10 {
            csv.push_str(&format!("2024-03-{:02},27,0\n", day));
        }
        let dataset = build_dataset(parse_training_csv(&csv).unwrap(), &HazardThresholds::default());
        assert!(matches!(
            train_dataset(&dataset, &TrainingOptions::default(), Utc::now()),
            Err(TrainingError::NotEnoughData(_))
        ));
    }

    #[test]
    fn test_train_from_csv_writes_loadable_artifacts() {
        use crate::inference::artifact::ModelStore;

        let dir = std::env::temp_dir().join(format!("hazmon_train_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let csv_path = dir.join("history.csv");
        std::fs::write(&csv_path, synthetic_csv(120)).unwrap();

        let store = FileModelStore::new(dir.join("models"));
        let meta = train_from_csv(
            &csv_path,
            &HazardThresholds::default(),
            &TrainingOptions::default(),
            &store,
        )
        .unwrap();

        assert!(store.is_ready());
        let loaded = store.load().unwrap();
        assert_eq!(loaded.metadata.feature_columns, meta.feature_columns);
        assert_eq!(loaded.metadata.training_samples, 96);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
