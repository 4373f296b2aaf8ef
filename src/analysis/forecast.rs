/// Batch prediction over forecast series.
///
/// A batch is normalized point by point (malformed points are logged and
/// dropped), given rolling means over the surviving series, then predicted
/// on a small pool of scoped threads. Output order always matches input
/// order, and each entry remembers the index of the payload it came from.
/// Points whose prediction worker panicked are dropped like malformed ones.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::analysis::features::{apply_rolling_means, normalize_as};
use crate::inference::hybrid::HybridPredictor;
use crate::logging::{self, LogSource};
use crate::model::{
    CanonicalFeatureRecord, HazardError, HazardPrediction, HazardType, RiskLevel, SourceKind,
};

pub const DEFAULT_WORKER_THREADS: usize = 4;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchEntry {
    /// Position of the source payload in the input slice.
    pub index: usize,
    pub record: CanonicalFeatureRecord,
    pub prediction: HazardPrediction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEntry {
    pub timestamp: DateTime<Utc>,
    pub hazard_type: HazardType,
    pub risk_level: RiskLevel,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastSummary {
    pub total_records: usize,
    pub hazard_events_count: usize,
    /// Distinct categories in first-seen order, never `None`.
    pub hazard_types: Vec<HazardType>,
    pub high_risk_count: usize,
    pub next_hazard: Option<TimelineEntry>,
    pub timeline: Vec<TimelineEntry>,
}

// ---------------------------------------------------------------------------
// Forecaster
// ---------------------------------------------------------------------------

pub struct BatchForecaster {
    predictor: Arc<HybridPredictor>,
    worker_threads: usize,
}

impl BatchForecaster {
    pub fn new(predictor: Arc<HybridPredictor>, worker_threads: usize) -> Self {
        BatchForecaster {
            predictor,
            worker_threads: worker_threads.max(1),
        }
    }

    pub fn predictor(&self) -> &HybridPredictor {
        &self.predictor
    }

    /// Predicts every payload. An unknown source fails the whole call;
    /// individual malformed payloads are skipped.
    pub fn predict_batch(&self, payloads: &[Value], source: &str) -> Result<Vec<BatchEntry>, HazardError> {
        let kind = SourceKind::parse(source)?;
        Ok(self.predict_batch_as(kind, payloads, Utc::now()))
    }

    /// Like `predict_batch` for a known source; `now` stamps points that
    /// carry no timestamp.
    pub fn predict_batch_as(&self, kind: SourceKind, payloads: &[Value], now: DateTime<Utc>) -> Vec<BatchEntry> {
        let mut indices = Vec::with_capacity(payloads.len());
        let mut records = Vec::with_capacity(payloads.len());

        for (index, payload) in payloads.iter().enumerate() {
            match normalize_as(kind, payload, now) {
                Ok(record) => {
                    indices.push(index);
                    records.push(record);
                }
                Err(e) => logging::warn(
                    LogSource::Forecast,
                    Some(kind.as_str()),
                    &format!("Skipping point {}: {}", index, e),
                ),
            }
        }

        apply_rolling_means(&mut records);
        let predictions = self.predict_records(&records);

        indices
            .into_iter()
            .zip(records)
            .zip(predictions)
            .filter_map(|((index, record), prediction)| {
                prediction.map(|prediction| BatchEntry { index, record, prediction })
            })
            .collect()
    }

    /// Predicts records in parallel. The result is aligned with `records`;
    /// `None` marks a record whose worker panicked.
    pub fn predict_records(&self, records: &[CanonicalFeatureRecord]) -> Vec<Option<HazardPrediction>> {
        if records.is_empty() {
            return Vec::new();
        }
        let predictor = self.predictor.as_ref();
        let chunk_size = records.len().div_ceil(self.worker_threads);

        std::thread::scope(|scope| {
            let handles: Vec<_> = records
                .chunks(chunk_size)
                .map(|chunk| {
                    let handle = scope.spawn(move || {
                        chunk.iter().map(|r| predictor.predict(r)).collect::<Vec<_>>()
                    });
                    (chunk, handle)
                })
                .collect();

            let mut out = Vec::with_capacity(records.len());
            for (chunk, handle) in handles {
                match handle.join() {
                    Ok(predictions) => out.extend(predictions.into_iter().map(Some)),
                    Err(_) => {
                        logging::error(
                            LogSource::Forecast,
                            None,
                            &format!("Prediction worker panicked, skipping {} point(s)", chunk.len()),
                        );
                        out.extend(chunk.iter().map(|_| None));
                    }
                }
            }
            out
        })
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

pub fn summarize(entries: &[BatchEntry]) -> ForecastSummary {
    let timeline: Vec<TimelineEntry> = entries
        .iter()
        .filter(|e| e.prediction.event)
        .map(|e| TimelineEntry {
            timestamp: e.prediction.timestamp,
            hazard_type: e.prediction.hazard_type,
            risk_level: e.prediction.risk_level,
            probability: e.prediction.probability,
        })
        .collect();

    let mut hazard_types = Vec::new();
    for entry in &timeline {
        if !entry.hazard_type.is_none() && !hazard_types.contains(&entry.hazard_type) {
            hazard_types.push(entry.hazard_type);
        }
    }

    let high_risk_count = timeline
        .iter()
        .filter(|t| t.risk_level >= RiskLevel::High)
        .count();
    let next_hazard = timeline.iter().min_by_key(|t| t.timestamp).cloned();

    ForecastSummary {
        total_records: entries.len(),
        hazard_events_count: timeline.len(),
        hazard_types,
        high_risk_count,
        next_hazard,
        timeline,
    }
}
