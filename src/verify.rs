//! Health and Readiness Verification
//!
//! Reports whether the engine can predict and how well: model readiness and
//! metadata, the active threshold table, and optional live probes of the
//! configured weather sources. The rule engine needs nothing external, so a
//! report is only `Failed` when every probed source is unreachable.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use crate::alert::thresholds::HazardThresholds;
use crate::analysis::features::normalize_as;
use crate::inference::hybrid::{HybridPredictor, ModelInfo};
use crate::ingest::WeatherSource;
use crate::model::SourceKind;

// ============================================================================
// Verification Results
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub timestamp: String,
    pub status: VerificationStatus,
    pub model: ModelInfo,
    pub thresholds: HazardThresholds,
    pub sources: Vec<SourceVerification>,
    pub summary: VerificationSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationSummary {
    pub model_ready: bool,
    pub sources_total: usize,
    pub sources_working: usize,
    pub sources_failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceVerification {
    pub source: SourceKind,
    pub status: VerificationStatus,
    pub api_responsive: bool,
    /// Canonical measurements the sample payload actually carried.
    pub data_types_available: Vec<String>,
    pub response_ms: u128,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub enum VerificationStatus {
    Success,
    PartialSuccess,
    Failed,
}

// ============================================================================
// Source Probes
// ============================================================================

/// JSON pointers of the fields each source is expected to carry.
fn expected_fields(kind: SourceKind) -> &'static [(&'static str, &'static str)] {
    match kind {
        SourceKind::OpenWeather => &[
            ("temperature", "/main/temp"),
            ("pressure", "/main/pressure"),
            ("humidity", "/main/humidity"),
            ("wind", "/wind/speed"),
            ("precipitation", "/rain"),
        ],
        SourceKind::WeatherLink => &[
            ("temperature", "/temp_last"),
            ("pressure", "/bar_sea_level"),
            ("humidity", "/hum_last"),
            ("wind", "/wind_speed_last"),
            ("precipitation", "/rainfall_mm"),
        ],
    }
}

/// Names of the expected fields present (and not null) in `payload`.
pub fn fields_present(kind: SourceKind, payload: &Value) -> Vec<String> {
    expected_fields(kind)
        .iter()
        .filter(|(_, pointer)| payload.pointer(pointer).is_some_and(|v| !v.is_null()))
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Fetches the current observation and checks that it normalizes.
///
/// Success needs temperature, pressure and wind; a payload that normalizes
/// but lacks some of them is a partial success (defaults fill the gaps).
pub fn verify_source(source: &dyn WeatherSource) -> SourceVerification {
    let kind = source.kind();
    let mut result = SourceVerification {
        source: kind,
        status: VerificationStatus::Failed,
        api_responsive: false,
        data_types_available: Vec::new(),
        response_ms: 0,
        error_message: None,
    };

    let started = Instant::now();
    let fetched = source.fetch_current();
    result.response_ms = started.elapsed().as_millis();

    let payload = match fetched {
        Ok(payload) => payload,
        Err(e) => {
            result.error_message = Some(format!("API request failed: {}", e));
            return result;
        }
    };
    result.api_responsive = true;
    result.data_types_available = fields_present(kind, &payload);

    if let Err(e) = normalize_as(kind, &payload, Utc::now()) {
        result.error_message = Some(e.to_string());
        return result;
    }

    let core = ["temperature", "pressure", "wind"];
    let has_core = core
        .iter()
        .all(|c| result.data_types_available.iter().any(|a| a == c));
    result.status = if has_core {
        VerificationStatus::Success
    } else {
        VerificationStatus::PartialSuccess
    };
    result
}

// ============================================================================
// Full Health Check
// ============================================================================

/// Builds the health report. Pass an empty `sources` slice to skip the live
/// probes.
pub fn health_check(predictor: &HybridPredictor, sources: &[Arc<dyn WeatherSource>]) -> HealthReport {
    let model = predictor.model_info();
    let results: Vec<SourceVerification> = sources.iter().map(|s| verify_source(s.as_ref())).collect();

    let sources_working = results
        .iter()
        .filter(|r| r.status != VerificationStatus::Failed)
        .count();
    let sources_failed = results.len() - sources_working;

    let status = if !results.is_empty() && sources_working == 0 {
        VerificationStatus::Failed
    } else if !model.ready || sources_failed > 0 {
        VerificationStatus::PartialSuccess
    } else {
        VerificationStatus::Success
    };

    HealthReport {
        timestamp: Utc::now().to_rfc3339(),
        status,
        summary: VerificationSummary {
            model_ready: model.ready,
            sources_total: results.len(),
            sources_working,
            sources_failed,
        },
        model,
        thresholds: *predictor.thresholds(),
        sources: results,
    }
}

pub fn print_summary(report: &HealthReport) {
    println!("\n═══════════════════════════════════════════════════════════");
    println!("📊 HEALTH SUMMARY");
    println!("═══════════════════════════════════════════════════════════");
    println!();

    let model = &report.model;
    if model.ready {
        let meta = model.metadata.as_ref();
        println!(
            "Model:            {} at {} ({} features, accuracy {:.3})",
            model.model_type.as_deref().unwrap_or("unknown"),
            model.location,
            meta.map(|m| m.feature_columns.len()).unwrap_or(0),
            meta.map(|m| m.accuracy).unwrap_or(0.0)
        );
        if let Some(m) = meta {
            println!(
                "                  trained {} on {} samples ({})",
                m.trained_at.format("%Y-%m-%d"),
                m.training_samples,
                m.training_data_source
            );
        }
    } else if let Some(err) = &model.error {
        println!("Model:            ✗ unusable at {}: {}", model.location, err);
    } else {
        println!("Model:            not trained, rule engine only");
    }
    println!();

    for source in &report.sources {
        match source.status {
            VerificationStatus::Success => println!(
                "{:<17} ✓ OK ({} ms, fields: {})",
                source.source.to_string() + ":",
                source.response_ms,
                source.data_types_available.join(", ")
            ),
            VerificationStatus::PartialSuccess => println!(
                "{:<17} ⚠ Partial (fields: {})",
                source.source.to_string() + ":",
                source.data_types_available.join(", ")
            ),
            VerificationStatus::Failed => println!(
                "{:<17} ✗ FAILED: {}",
                source.source.to_string() + ":",
                source.error_message.as_deref().unwrap_or("Unknown")
            ),
        }
    }
    if report.sources.is_empty() {
        println!("Sources:          not probed");
    }

    println!();
    println!("Overall:          {:?}", report.status);
    println!("═══════════════════════════════════════════════════════════");
}
