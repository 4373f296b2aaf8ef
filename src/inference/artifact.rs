//! Model artifacts on disk and the handle that caches them.
//!
//! A trained model is two JSON files in one directory: `model.json` (the
//! fitted pipeline) and `model_metadata.json` (feature columns and
//! evaluation figures). `ModelHandle` loads them lazily on first use and
//! keeps the outcome, success or failure, until `reload()`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::inference::naive_bayes::{GaussianNbModel, HazardModel};
use crate::logging::{self, LogSource};
use crate::model::{FEATURE_COLUMNS, ModelError};

pub const MODEL_FILE: &str = "model.json";
pub const METADATA_FILE: &str = "model_metadata.json";

// ============================================================================
// METADATA
// ============================================================================

/// Confusion counts on the held-out split, event as the positive class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

impl ConfusionCounts {
    pub fn from_predictions(actual: &[bool], predicted: &[bool]) -> Self {
        let mut counts = ConfusionCounts::default();
        for (&a, &p) in actual.iter().zip(predicted) {
            match (a, p) {
                (true, true) => counts.true_positive += 1,
                (false, true) => counts.false_positive += 1,
                (false, false) => counts.true_negative += 1,
                (true, false) => counts.false_negative += 1,
            }
        }
        counts
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.true_positive + self.false_positive + self.true_negative + self.false_negative;
        if total == 0 {
            return 0.0;
        }
        (self.true_positive + self.true_negative) as f64 / total as f64
    }

    /// F1 of the event class; 0 when there are no positives at all.
    pub fn f1(&self) -> f64 {
        let denom = 2 * self.true_positive + self.false_positive + self.false_negative;
        if denom == 0 {
            return 0.0;
        }
        2.0 * self.true_positive as f64 / denom as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Input vector layout, in order.
    pub feature_columns: Vec<String>,
    pub accuracy: f64,
    pub cv_mean: f64,
    pub cv_std: f64,
    pub trained_at: DateTime<Utc>,
    pub training_samples: usize,
    pub training_data_source: String,
    #[serde(default = "default_model_type")]
    pub model_type: String,
    #[serde(default)]
    pub confusion: Option<ConfusionCounts>,
}

fn default_model_type() -> String {
    "gaussian_nb".to_string()
}

impl ModelMetadata {
    /// Columns the normalizer cannot produce; these are filled with the
    /// neutral default at prediction time.
    pub fn unknown_columns(&self) -> Vec<&str> {
        self.feature_columns
            .iter()
            .map(String::as_str)
            .filter(|c| !FEATURE_COLUMNS.contains(c))
            .collect()
    }
}

/// A model together with the metadata it was saved with.
#[derive(Clone)]
pub struct LoadedModel {
    pub model: Arc<dyn HazardModel>,
    pub metadata: ModelMetadata,
}

// ============================================================================
// STORE
// ============================================================================

/// Where model artifacts come from.
pub trait ModelStore: Send + Sync {
    /// Loads the model and its metadata. `ModelError::NotFound` means no
    /// artifact exists; anything else means one exists but is unusable.
    fn load(&self) -> Result<LoadedModel, ModelError>;

    /// True when an artifact is present (it may still fail to load).
    fn is_ready(&self) -> bool;

    /// Human-readable location for logs and health reports.
    fn describe(&self) -> String;
}

/// Reads `model.json` and `model_metadata.json` from a directory.
pub struct FileModelStore {
    dir: PathBuf,
}

impl FileModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileModelStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn model_path(&self) -> PathBuf {
        self.dir.join(MODEL_FILE)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    /// Writes both artifacts, creating the directory if needed.
    pub fn save(&self, model: &GaussianNbModel, metadata: &ModelMetadata) -> Result<(), ModelError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| ModelError::LoadFailed(format!("{}: {}", self.dir.display(), e)))?;
        write_json(&self.model_path(), model)?;
        write_json(&self.metadata_path(), metadata)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ModelError> {
    let body = serde_json::to_string_pretty(value)
        .map_err(|e| ModelError::LoadFailed(format!("serialize {}: {}", path.display(), e)))?;
    std::fs::write(path, body)
        .map_err(|e| ModelError::LoadFailed(format!("{}: {}", path.display(), e)))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ModelError> {
    let body = std::fs::read_to_string(path)
        .map_err(|e| ModelError::LoadFailed(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&body)
        .map_err(|e| ModelError::LoadFailed(format!("{}: {}", path.display(), e)))
}

impl ModelStore for FileModelStore {
    fn load(&self) -> Result<LoadedModel, ModelError> {
        let model_path = self.model_path();
        let metadata_path = self.metadata_path();
        if !model_path.exists() && !metadata_path.exists() {
            return Err(ModelError::NotFound(self.describe()));
        }

        let model: GaussianNbModel = read_json(&model_path)?;
        model.validate()?;
        let metadata: ModelMetadata = read_json(&metadata_path)?;

        if metadata.feature_columns.len() != model.n_features() {
            return Err(ModelError::ShapeMismatch {
                expected: model.n_features(),
                actual: metadata.feature_columns.len(),
            });
        }

        Ok(LoadedModel {
            model: Arc::new(model),
            metadata,
        })
    }

    fn is_ready(&self) -> bool {
        self.model_path().exists() && self.metadata_path().exists()
    }

    fn describe(&self) -> String {
        self.dir.display().to_string()
    }
}

// ============================================================================
// HANDLE
// ============================================================================

/// What the handle currently knows about the model.
#[derive(Clone)]
pub enum ModelState {
    /// No artifact configured or present.
    Absent,
    Ready(LoadedModel),
    /// An artifact exists but could not be used.
    Failed(ModelError),
}

/// Shared, lazily loaded model. Clone the `Arc` around it to share one
/// cache between the predictor and the health check.
pub struct ModelHandle {
    store: Option<Box<dyn ModelStore>>,
    cached: RwLock<Option<ModelState>>,
}

impl ModelHandle {
    pub fn new(store: Box<dyn ModelStore>) -> Self {
        ModelHandle {
            store: Some(store),
            cached: RwLock::new(None),
        }
    }

    /// A handle with no store: every prediction is rules-only.
    pub fn absent() -> Self {
        ModelHandle {
            store: None,
            cached: RwLock::new(Some(ModelState::Absent)),
        }
    }

    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        ModelHandle::new(Box::new(FileModelStore::new(dir)))
    }

    /// Current state, loading on first call.
    pub fn state(&self) -> ModelState {
        {
            let cached = self.cached.read().unwrap_or_else(|p| p.into_inner());
            if let Some(state) = cached.as_ref() {
                return state.clone();
            }
        }

        let mut cached = self.cached.write().unwrap_or_else(|p| p.into_inner());
        // Another thread may have loaded while we waited for the write lock.
        if let Some(state) = cached.as_ref() {
            return state.clone();
        }
        let state = self.load_state();
        *cached = Some(state.clone());
        state
    }

    fn load_state(&self) -> ModelState {
        let Some(store) = self.store.as_ref() else {
            return ModelState::Absent;
        };

        match store.load() {
            Ok(loaded) => {
                let unknown = loaded.metadata.unknown_columns();
                if !unknown.is_empty() {
                    logging::warn(
                        LogSource::Model,
                        Some(&store.describe()),
                        &format!("Columns filled with defaults: {}", unknown.join(", ")),
                    );
                }
                logging::info(
                    LogSource::Model,
                    Some(&store.describe()),
                    &format!(
                        "Loaded {} ({} features, accuracy {:.3})",
                        loaded.model.name(),
                        loaded.metadata.feature_columns.len(),
                        loaded.metadata.accuracy
                    ),
                );
                ModelState::Ready(loaded)
            }
            Err(ModelError::NotFound(where_)) => {
                logging::info(
                    LogSource::Model,
                    Some(&where_),
                    "No trained model found, using rule engine only",
                );
                ModelState::Absent
            }
            Err(e) => {
                logging::error(
                    LogSource::Model,
                    Some(&store.describe()),
                    &format!("Model artifact unusable: {}", e),
                );
                ModelState::Failed(e)
            }
        }
    }

    /// Drops the cached state; the next `state()` call reads the store again.
    pub fn reload(&self) {
        if self.store.is_none() {
            return;
        }
        let mut cached = self.cached.write().unwrap_or_else(|p| p.into_inner());
        *cached = None;
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state(), ModelState::Ready(_))
    }

    pub fn describe(&self) -> String {
        self.store
            .as_ref()
            .map(|s| s.describe())
            .unwrap_or_else(|| "none".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        loads: Arc<AtomicUsize>,
        result: fn() -> Result<LoadedModel, ModelError>,
    }

    impl ModelStore for CountingStore {
        fn load(&self) -> Result<LoadedModel, ModelError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
        fn is_ready(&self) -> bool {
            true
        }
        fn describe(&self) -> String {
            "counting".to_string()
        }
    }

    fn unique_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("hazmon_artifact_{}_{}", name, std::process::id()))
    }

    #[test]
    fn test_confusion_metrics() {
        let counts = ConfusionCounts::from_predictions(
            &[true, true, false, false, true],
            &[true, false, false, true, true],
        );
        assert_eq!(counts.true_positive, 2);
        assert_eq!(counts.false_negative, 1);
        assert_eq!(counts.false_positive, 1);
        assert_eq!(counts.true_negative, 1);
        assert!((counts.accuracy() - 0.6).abs() < 1e-12);
        assert!((counts.f1() - 4.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_missing_directory_is_not_found() {
        let store = FileModelStore::new(unique_dir("missing"));
        assert!(!store.is_ready());
        assert!(matches!(store.load(), Err(ModelError::NotFound(_))));
    }

    #[test]
    fn test_corrupt_artifact_is_load_failure() {
        let dir = unique_dir("corrupt");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(MODEL_FILE), "{not json").unwrap();
        std::fs::write(dir.join(METADATA_FILE), "{}").unwrap();

        let store = FileModelStore::new(&dir);
        assert!(store.is_ready());
        assert!(matches!(store.load(), Err(ModelError::LoadFailed(_))));

        let handle = ModelHandle::new(Box::new(FileModelStore::new(&dir)));
        assert!(matches!(handle.state(), ModelState::Failed(_)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_handle_caches_until_reload() {
        let loads = Arc::new(AtomicUsize::new(0));
        let handle = ModelHandle::new(Box::new(CountingStore {
            loads: Arc::clone(&loads),
            result: || Err(ModelError::LoadFailed("boom".into())),
        }));

        for _ in 0..5 {
            assert!(matches!(handle.state(), ModelState::Failed(_)));
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1, "failure is cached");

        handle.reload();
        let _ = handle.state();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_absent_handle() {
        let handle = ModelHandle::absent();
        assert!(matches!(handle.state(), ModelState::Absent));
        assert!(!handle.is_ready());
        handle.reload();
        assert!(matches!(handle.state(), ModelState::Absent));
        assert_eq!(handle.describe(), "none");
    }

    #[test]
    fn test_unknown_columns_listed() {
        let metadata = ModelMetadata {
            feature_columns: vec!["temperature".into(), "tsun".into(), "humidity".into()],
            accuracy: 0.9,
            cv_mean: 0.8,
            cv_std: 0.05,
            trained_at: Utc::now(),
            training_samples: 100,
            training_data_source: "test".into(),
            model_type: default_model_type(),
            confusion: None,
        };
        assert_eq!(metadata.unknown_columns(), vec!["tsun"]);
    }
}
