//! Model-first prediction with rule-engine fallback.
//!
//! Every call produces a prediction. The rule engine always runs: it
//! supplies the hazard tags and category, and it decides the event flag
//! whenever the model is absent or fails. Model failures are logged and
//! reported in the prediction's `error` field, never returned to callers.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::alert::classify::classify;
use crate::alert::risk::risk_level;
use crate::alert::thresholds::{HazardScore, HazardThresholds, score};
use crate::analysis::features;
use crate::inference::artifact::{LoadedModel, ModelHandle, ModelMetadata, ModelState};
use crate::logging::{self, LogSource};
use crate::model::{
    CanonicalFeatureRecord, ClassProbabilities, HazardError, HazardPrediction, HazardType,
    ModelError, PredictionSource,
};

/// Model readiness for health reports.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub ready: bool,
    pub location: String,
    pub model_type: Option<String>,
    pub metadata: Option<ModelMetadata>,
    pub error: Option<String>,
}

pub struct HybridPredictor {
    model: Arc<ModelHandle>,
    thresholds: HazardThresholds,
}

impl HybridPredictor {
    pub fn new(model: Arc<ModelHandle>, thresholds: HazardThresholds) -> Self {
        HybridPredictor { model, thresholds }
    }

    /// A predictor that never consults a model.
    pub fn rules_only(thresholds: HazardThresholds) -> Self {
        HybridPredictor::new(Arc::new(ModelHandle::absent()), thresholds)
    }

    pub fn thresholds(&self) -> &HazardThresholds {
        &self.thresholds
    }

    /// Normalizes a raw payload and predicts on it. Only input errors are
    /// returned.
    pub fn predict_payload(&self, payload: &Value, source: &str) -> Result<HazardPrediction, HazardError> {
        let record = features::normalize(payload, source)?;
        Ok(self.predict(&record))
    }

    pub fn predict(&self, record: &CanonicalFeatureRecord) -> HazardPrediction {
        let rules = score(record, &self.thresholds);

        match self.model.state() {
            ModelState::Absent => rules_prediction(record, rules, PredictionSource::RulesOnly, None),
            ModelState::Failed(err) => self.fallback(record, rules, err),
            ModelState::Ready(loaded) => match model_prediction(record, &loaded, &rules) {
                Ok(prediction) => prediction,
                Err(err) => self.fallback(record, rules, err),
            },
        }
    }

    fn fallback(
        &self,
        record: &CanonicalFeatureRecord,
        rules: HazardScore,
        err: ModelError,
    ) -> HazardPrediction {
        logging::warn(
            LogSource::Model,
            Some(&self.model.describe()),
            &format!("Model prediction failed, using rules: {}", err),
        );
        rules_prediction(record, rules, PredictionSource::RulesFallback, Some(err.to_string()))
    }

    pub fn is_model_ready(&self) -> bool {
        self.model.is_ready()
    }

    pub fn model_info(&self) -> ModelInfo {
        let location = self.model.describe();
        match self.model.state() {
            ModelState::Ready(loaded) => ModelInfo {
                ready: true,
                location,
                model_type: Some(loaded.model.name().to_string()),
                metadata: Some(loaded.metadata),
                error: None,
            },
            ModelState::Absent => ModelInfo {
                ready: false,
                location,
                model_type: None,
                metadata: None,
                error: None,
            },
            ModelState::Failed(err) => ModelInfo {
                ready: false,
                location,
                model_type: None,
                metadata: None,
                error: Some(err.to_string()),
            },
        }
    }

    /// Forgets the cached model so the next prediction reads it again.
    pub fn reload(&self) {
        self.model.reload();
        logging::info(LogSource::Model, Some(&self.model.describe()), "Model cache cleared");
    }
}

/// Input vector in metadata column order; unknown columns get the neutral
/// default.
pub fn feature_vector(record: &CanonicalFeatureRecord, columns: &[String]) -> Vec<f64> {
    columns.iter().map(|c| record.feature_or_default(c)).collect()
}

fn model_prediction(
    record: &CanonicalFeatureRecord,
    loaded: &LoadedModel,
    rules: &HazardScore,
) -> Result<HazardPrediction, ModelError> {
    let input = feature_vector(record, &loaded.metadata.feature_columns);
    let (event, probabilities) = loaded.model.predict(&input)?;

    let hazard_type = if event {
        match classify(&rules.hazards) {
            HazardType::None => HazardType::GeneralHazard,
            named => named,
        }
    } else {
        HazardType::None
    };
    let probability = probabilities.event;

    Ok(HazardPrediction {
        timestamp: record.timestamp,
        event,
        probability,
        probabilities,
        hazard_type,
        hazards_triggered: rules.hazards.clone(),
        risk_level: risk_level(hazard_type, probability, event),
        source: PredictionSource::MlModel,
        error: None,
    })
}

fn rules_prediction(
    record: &CanonicalFeatureRecord,
    rules: HazardScore,
    source: PredictionSource,
    error: Option<String>,
) -> HazardPrediction {
    let hazard_type = if rules.event {
        classify(&rules.hazards)
    } else {
        HazardType::None
    };

    HazardPrediction {
        timestamp: record.timestamp,
        event: rules.event,
        probability: 0.0,
        probabilities: ClassProbabilities {
            no_event: 1.0,
            event: 0.0,
        },
        hazard_type,
        hazards_triggered: rules.hazards,
        risk_level: risk_level(hazard_type, 0.0, rules.event),
        source,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::artifact::ModelStore;
    use crate::inference::naive_bayes::HazardModel;
    use crate::model::{Measurements, RiskLevel};
    use chrono::{TimeZone, Utc};

    /// Always answers with fixed probabilities.
    struct FixedModel {
        event: f64,
        n: usize,
    }

    impl HazardModel for FixedModel {
        fn n_features(&self) -> usize {
            self.n
        }
        fn predict_proba(&self, features: &[f64]) -> Result<ClassProbabilities, ModelError> {
            if features.len() != self.n {
                return Err(ModelError::ShapeMismatch { expected: self.n, actual: features.len() });
            }
            Ok(ClassProbabilities { no_event: 1.0 - self.event, event: self.event })
        }
        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct FixedStore {
        event: f64,
        columns: Vec<String>,
        model_width: usize,
    }

    impl ModelStore for FixedStore {
        fn load(&self) -> Result<LoadedModel, ModelError> {
            Ok(LoadedModel {
                model: Arc::new(FixedModel { event: self.event, n: self.model_width }),
                metadata: ModelMetadata {
                    feature_columns: self.columns.clone(),
                    accuracy: 0.9,
                    cv_mean: 0.85,
                    cv_std: 0.02,
                    trained_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                    training_samples: 1000,
                    training_data_source: "fixture".into(),
                    model_type: "fixed".into(),
                    confusion: None,
                },
            })
        }
        fn is_ready(&self) -> bool {
            true
        }
        fn describe(&self) -> String {
            "fixed".into()
        }
    }

    fn predictor_with(event: f64, columns: &[&str], model_width: usize) -> HybridPredictor {
        let store = FixedStore {
            event,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            model_width,
        };
        HybridPredictor::new(
            Arc::new(ModelHandle::new(Box::new(store))),
            HazardThresholds::default(),
        )
    }

    fn record(rain: f64, wind: f64, pressure: f64) -> CanonicalFeatureRecord {
        CanonicalFeatureRecord::from_measurements(
            Measurements {
                temperature_c: Some(27.0),
                precipitation_mm: Some(rain),
                wind_speed_ms: Some(wind),
                pressure_hpa: Some(pressure),
                ..Default::default()
            },
            Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_rules_only_storm() {
        let p = HybridPredictor::rules_only(HazardThresholds::default()).predict(&record(60.0, 20.0, 1010.0));
        assert!(p.event);
        assert_eq!(p.source, PredictionSource::RulesOnly);
        assert_eq!(p.hazard_type, HazardType::TropicalStorm);
        assert_eq!(p.probability, 0.0);
        assert_eq!(p.risk_level, RiskLevel::Moderate, "cyclonic floor");
        assert!(p.error.is_none());
    }

    #[test]
    fn test_rules_only_matches_scorer_and_classifier() {
        let thresholds = HazardThresholds::default();
        let predictor = HybridPredictor::rules_only(thresholds);
        for rain in [0.0, 10.0, 30.0, 55.0, 120.0] {
            for wind in [0.0, 8.0, 12.5, 18.0, 30.0] {
                for pressure in [1013.0, 995.0, 985.0, 970.0, 950.0] {
                    let r = record(rain, wind, pressure);
                    let direct = score(&r, &thresholds);
                    let p = predictor.predict(&r);
                    assert_eq!(p.source, PredictionSource::RulesOnly);
                    assert_eq!(p.probability, 0.0);
                    assert_eq!(p.event, direct.event);
                    assert_eq!(p.hazards_triggered, direct.hazards);
                    let expected = if direct.event { classify(&direct.hazards) } else { HazardType::None };
                    assert_eq!(p.hazard_type, expected, "rain={} wind={} pressure={}", rain, wind, pressure);
                }
            }
        }
    }

    #[test]
    fn test_rules_only_never_general_hazard() {
        // Score 2.5 from moderate rain + moderate wind: event, but no named class.
        let p = HybridPredictor::rules_only(HazardThresholds::default()).predict(&record(30.0, 8.0, 1010.0));
        assert!(p.event);
        assert_eq!(p.hazard_type, HazardType::None);
        assert_eq!(p.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_model_event_with_rule_tags() {
        let p = predictor_with(0.85, &["precipitation", "wind_speed"], 2).predict(&record(60.0, 20.0, 970.0));
        assert_eq!(p.source, PredictionSource::MlModel);
        assert!(p.event);
        assert_eq!(p.hazard_type, HazardType::TropicalCyclone);
        assert_eq!(p.risk_level, RiskLevel::Critical);
        assert_eq!(p.probability, 0.85);
    }

    #[test]
    fn test_model_event_without_rule_tags_is_general_hazard() {
        let p = predictor_with(0.75, &["temperature"], 1).predict(&record(0.0, 0.0, 1012.0));
        assert!(p.event);
        assert!(p.hazards_triggered.is_empty());
        assert_eq!(p.hazard_type, HazardType::GeneralHazard);
        assert_eq!(p.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_model_no_event_overrides_rules() {
        let p = predictor_with(0.1, &["temperature"], 1).predict(&record(120.0, 30.0, 950.0));
        assert!(!p.event);
        assert_eq!(p.hazard_type, HazardType::None);
        assert_eq!(p.risk_level, RiskLevel::Low);
        assert!(!p.hazards_triggered.is_empty(), "rule tags are still reported");
    }

    #[test]
    fn test_shape_mismatch_falls_back_to_rules() {
        let p = predictor_with(0.9, &["temperature", "pressure"], 5).predict(&record(60.0, 20.0, 1010.0));
        assert_eq!(p.source, PredictionSource::RulesFallback);
        assert!(p.event);
        assert_eq!(p.hazard_type, HazardType::TropicalStorm);
        assert!(p.error.as_deref().unwrap_or("").contains("shape mismatch"));
    }

    #[test]
    fn test_unknown_columns_use_neutral_defaults() {
        let r = record(1.0, 2.0, 1000.0);
        let columns: Vec<String> = ["precipitation", "dew_point", "humidity", "tsun"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(feature_vector(&r, &columns), vec![1.0, 0.0, 60.0, 0.0]);
    }

    #[test]
    fn test_predict_payload_surfaces_input_errors() {
        let predictor = HybridPredictor::rules_only(HazardThresholds::default());
        assert!(matches!(
            predictor.predict_payload(&serde_json::json!({}), "noaa"),
            Err(HazardError::UnsupportedSource(_))
        ));
        assert!(matches!(
            predictor.predict_payload(&serde_json::json!(42), "openweather"),
            Err(HazardError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_model_info_reports_state() {
        let ready = predictor_with(0.5, &["temperature"], 1);
        let info = ready.model_info();
        assert!(info.ready);
        assert_eq!(info.model_type.as_deref(), Some("fixed"));
        assert!(ready.is_model_ready());

        let rules = HybridPredictor::rules_only(HazardThresholds::default());
        assert!(!rules.model_info().ready);
        assert!(!rules.is_model_ready());
    }
}
