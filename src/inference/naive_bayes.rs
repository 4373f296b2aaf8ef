//! Gaussian naive Bayes hazard model.
//!
//! The fitted pipeline is: Yeo-Johnson power transform with
//! standardization over every input column, then the `k` columns with the
//! highest ANOVA F score, then a two-class Gaussian naive Bayes. The whole
//! pipeline serializes to one JSON document.

use serde::{Deserialize, Serialize};

use crate::model::{ClassProbabilities, ModelError};

/// Smallest variance, as a fraction of the largest feature variance, added
/// to every class variance.
pub const VAR_SMOOTHING: f64 = 1e-9;

/// Search range for the Yeo-Johnson lambda.
const LAMBDA_MIN: f64 = -2.0;
const LAMBDA_MAX: f64 = 2.0;

// ============================================================================
// MODEL TRAIT
// ============================================================================

/// A fitted binary classifier over a fixed-length feature vector.
pub trait HazardModel: Send + Sync {
    /// Length of the input vector the model was fit on.
    fn n_features(&self) -> usize;

    fn predict_proba(&self, features: &[f64]) -> Result<ClassProbabilities, ModelError>;

    /// Class decision: event when its probability is strictly higher.
    fn predict(&self, features: &[f64]) -> Result<(bool, ClassProbabilities), ModelError> {
        let proba = self.predict_proba(features)?;
        Ok((proba.event > proba.no_event, proba))
    }

    /// Short identifier for status reports.
    fn name(&self) -> &str;
}

// ============================================================================
// POWER TRANSFORM
// ============================================================================

/// Yeo-Johnson transform of a single value.
pub fn yeo_johnson(x: f64, lambda: f64) -> f64 {
    const EPS: f64 = 1e-12;
    if x >= 0.0 {
        if lambda.abs() < EPS {
            x.ln_1p()
        } else {
            ((x + 1.0).powf(lambda) - 1.0) / lambda
        }
    } else if (lambda - 2.0).abs() < EPS {
        -(-x).ln_1p()
    } else {
        -((1.0 - x).powf(2.0 - lambda) - 1.0) / (2.0 - lambda)
    }
}

/// Per-column Yeo-Johnson lambdas followed by standardization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerTransform {
    pub lambdas: Vec<f64>,
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
}

impl PowerTransform {
    /// Fits one lambda per column by maximizing the Yeo-Johnson
    /// log-likelihood, then records the mean and scale of the transformed
    /// column. Zero-variance columns get a scale of 1.
    pub fn fit(rows: &[Vec<f64>]) -> PowerTransform {
        let n_cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut lambdas = Vec::with_capacity(n_cols);
        let mut means = Vec::with_capacity(n_cols);
        let mut scales = Vec::with_capacity(n_cols);

        for col in 0..n_cols {
            let values: Vec<f64> = rows.iter().map(|r| r[col]).collect();
            let lambda = fit_lambda(&values);
            let transformed: Vec<f64> = values.iter().map(|&v| yeo_johnson(v, lambda)).collect();
            let (mean, var) = mean_var(&transformed);
            let scale = var.sqrt();

            lambdas.push(lambda);
            means.push(mean);
            scales.push(if scale > 0.0 && scale.is_finite() { scale } else { 1.0 });
        }

        PowerTransform { lambdas, means, scales }
    }

    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(i, &v)| (yeo_johnson(v, self.lambdas[i]) - self.means[i]) / self.scales[i])
            .collect()
    }
}

fn mean_var(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var)
}

fn yeo_johnson_log_likelihood(values: &[f64], lambda: f64) -> f64 {
    let n = values.len() as f64;
    let transformed: Vec<f64> = values.iter().map(|&v| yeo_johnson(v, lambda)).collect();
    let (_, var) = mean_var(&transformed);
    if var <= 0.0 || !var.is_finite() {
        return f64::NEG_INFINITY;
    }
    let jacobian: f64 = values.iter().map(|&v| v.signum() * v.abs().ln_1p()).sum();
    -0.5 * n * var.ln() + (lambda - 1.0) * jacobian
}

/// Coarse grid over [-2, 2] refined by golden-section search around the
/// best grid point.
fn fit_lambda(values: &[f64]) -> f64 {
    let (_, var) = mean_var(values);
    if var <= 0.0 {
        return 1.0;
    }

    let steps = 80;
    let step = (LAMBDA_MAX - LAMBDA_MIN) / steps as f64;
    let mut best = 1.0;
    let mut best_ll = yeo_johnson_log_likelihood(values, best);
    for i in 0..=steps {
        let lambda = LAMBDA_MIN + step * i as f64;
        let ll = yeo_johnson_log_likelihood(values, lambda);
        if ll > best_ll {
            best = lambda;
            best_ll = ll;
        }
    }

    let golden = (5.0_f64.sqrt() - 1.0) / 2.0;
    let mut lo = (best - step).max(LAMBDA_MIN);
    let mut hi = (best + step).min(LAMBDA_MAX);
    for _ in 0..40 {
        let a = hi - golden * (hi - lo);
        let b = lo + golden * (hi - lo);
        if yeo_johnson_log_likelihood(values, a) > yeo_johnson_log_likelihood(values, b) {
            hi = b;
        } else {
            lo = a;
        }
    }
    let refined = (lo + hi) / 2.0;
    if yeo_johnson_log_likelihood(values, refined) >= best_ll {
        refined
    } else {
        best
    }
}

// ============================================================================
// FEATURE SELECTION
// ============================================================================

/// One-way ANOVA F statistic of each column against the binary labels.
/// Columns with no within-class spread score infinity when the class means
/// differ and zero otherwise.
pub fn anova_f_scores(rows: &[Vec<f64>], labels: &[bool]) -> Vec<f64> {
    let n_cols = rows.first().map(|r| r.len()).unwrap_or(0);
    let n = rows.len() as f64;
    let n_pos = labels.iter().filter(|&&l| l).count() as f64;
    let n_neg = n - n_pos;

    (0..n_cols)
        .map(|col| {
            if n_pos == 0.0 || n_neg == 0.0 || n <= 2.0 {
                return 0.0;
            }
            let (mut sum_pos, mut sum_neg) = (0.0, 0.0);
            for (row, &label) in rows.iter().zip(labels) {
                if label {
                    sum_pos += row[col];
                } else {
                    sum_neg += row[col];
                }
            }
            let mean_pos = sum_pos / n_pos;
            let mean_neg = sum_neg / n_neg;
            let grand = (sum_pos + sum_neg) / n;

            let between = n_pos * (mean_pos - grand).powi(2) + n_neg * (mean_neg - grand).powi(2);
            let within: f64 = rows
                .iter()
                .zip(labels)
                .map(|(row, &label)| {
                    let m = if label { mean_pos } else { mean_neg };
                    (row[col] - m).powi(2)
                })
                .sum();

            // Two groups: one degree of freedom between, n - 2 within.
            if within <= 0.0 {
                if between > 0.0 { f64::INFINITY } else { 0.0 }
            } else {
                between / (within / (n - 2.0))
            }
        })
        .collect()
}

/// Indices of the `k` best-scoring columns, in ascending column order.
pub fn select_k_best(scores: &[f64], k: usize) -> Vec<usize> {
    let mut ranked: Vec<usize> = (0..scores.len()).collect();
    ranked.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    let mut selected: Vec<usize> = ranked.into_iter().take(k.min(scores.len())).collect();
    selected.sort_unstable();
    selected
}

// ============================================================================
// GAUSSIAN NAIVE BAYES
// ============================================================================

/// Per-class Gaussian parameters over the selected features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassStats {
    pub prior: f64,
    pub means: Vec<f64>,
    pub variances: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianNbModel {
    pub transform: PowerTransform,
    /// Column indices (into the transformed vector) fed to the classifier.
    pub selected: Vec<usize>,
    pub no_event: ClassStats,
    pub event: ClassStats,
}

impl GaussianNbModel {
    /// Fits the full pipeline. Fails when the data cannot support a
    /// two-class model.
    pub fn fit(rows: &[Vec<f64>], labels: &[bool], k: usize) -> Result<GaussianNbModel, ModelError> {
        if rows.len() != labels.len() {
            return Err(ModelError::ShapeMismatch {
                expected: rows.len(),
                actual: labels.len(),
            });
        }
        let n_cols = rows.first().map(|r| r.len()).unwrap_or(0);
        if n_cols == 0 {
            return Err(ModelError::LoadFailed("no training rows".to_string()));
        }
        if let Some(bad) = rows.iter().find(|r| r.len() != n_cols) {
            return Err(ModelError::ShapeMismatch {
                expected: n_cols,
                actual: bad.len(),
            });
        }
        if !labels.iter().any(|&l| l) || labels.iter().all(|&l| l) {
            return Err(ModelError::LoadFailed(
                "training labels contain a single class".to_string(),
            ));
        }

        let transform = PowerTransform::fit(rows);
        let transformed: Vec<Vec<f64>> = rows.iter().map(|r| transform.transform(r)).collect();

        let selected = select_k_best(&anova_f_scores(&transformed, labels), k);
        let projected: Vec<Vec<f64>> = transformed
            .iter()
            .map(|r| selected.iter().map(|&i| r[i]).collect())
            .collect();

        // Largest per-feature variance over all rows sets the smoothing floor.
        let max_var = (0..selected.len())
            .map(|j| {
                let column: Vec<f64> = projected.iter().map(|r| r[j]).collect();
                mean_var(&column).1
            })
            .fold(0.0_f64, f64::max);
        let epsilon = VAR_SMOOTHING * max_var.max(1.0);

        let class_stats = |target: bool| -> ClassStats {
            let members: Vec<&Vec<f64>> = projected
                .iter()
                .zip(labels)
                .filter(|(_, l)| **l == target)
                .map(|(r, _)| r)
                .collect();
            let mut means = Vec::with_capacity(selected.len());
            let mut variances = Vec::with_capacity(selected.len());
            for j in 0..selected.len() {
                let column: Vec<f64> = members.iter().map(|r| r[j]).collect();
                let (m, v) = mean_var(&column);
                means.push(m);
                variances.push(v + epsilon);
            }
            ClassStats {
                prior: members.len() as f64 / projected.len() as f64,
                means,
                variances,
            }
        };

        Ok(GaussianNbModel {
            no_event: class_stats(false),
            event: class_stats(true),
            transform,
            selected,
        })
    }

    /// Checks internal consistency after deserialization.
    pub fn validate(&self) -> Result<(), ModelError> {
        let n = self.transform.lambdas.len();
        if self.transform.means.len() != n || self.transform.scales.len() != n {
            return Err(ModelError::LoadFailed("power transform vectors differ in length".into()));
        }
        if self.selected.iter().any(|&i| i >= n) {
            return Err(ModelError::LoadFailed("selected column out of range".into()));
        }
        for stats in [&self.no_event, &self.event] {
            if stats.means.len() != self.selected.len()
                || stats.variances.len() != self.selected.len()
            {
                return Err(ModelError::LoadFailed("class statistics do not match selection".into()));
            }
            if stats.variances.iter().any(|&v| !(v > 0.0)) || !(stats.prior > 0.0) {
                return Err(ModelError::LoadFailed("non-positive variance or prior".into()));
            }
        }
        Ok(())
    }

    fn joint_log_likelihood(stats: &ClassStats, x: &[f64]) -> f64 {
        let mut ll = stats.prior.ln();
        for ((&xi, &mean), &var) in x.iter().zip(&stats.means).zip(&stats.variances) {
            ll -= 0.5 * (2.0 * std::f64::consts::PI * var).ln();
            ll -= 0.5 * (xi - mean).powi(2) / var;
        }
        ll
    }
}

impl HazardModel for GaussianNbModel {
    fn n_features(&self) -> usize {
        self.transform.lambdas.len()
    }

    fn predict_proba(&self, features: &[f64]) -> Result<ClassProbabilities, ModelError> {
        if features.len() != self.n_features() {
            return Err(ModelError::ShapeMismatch {
                expected: self.n_features(),
                actual: features.len(),
            });
        }

        let transformed = self.transform.transform(features);
        let x: Vec<f64> = self.selected.iter().map(|&i| transformed[i]).collect();

        let ll_no = Self::joint_log_likelihood(&self.no_event, &x);
        let ll_yes = Self::joint_log_likelihood(&self.event, &x);
        let max = ll_no.max(ll_yes);
        let (e_no, e_yes) = ((ll_no - max).exp(), (ll_yes - max).exp());
        let total = e_no + e_yes;

        let proba = ClassProbabilities {
            no_event: e_no / total,
            event: e_yes / total,
        };
        if !proba.event.is_finite() || !proba.no_event.is_finite() {
            return Err(ModelError::InvalidOutput(format!(
                "non-finite probabilities: {:?}",
                proba
            )));
        }
        Ok(proba)
    }

    fn name(&self) -> &str {
        "gaussian_nb"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Two features; the first separates the classes, the second is noise.
    fn separable_data() -> (Vec<Vec<f64>>, Vec<bool>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..60 {
            let noise = (i % 7) as f64;
            if i % 3 == 0 {
                rows.push(vec![40.0 + (i % 5) as f64, noise]);
                labels.push(true);
            } else {
                rows.push(vec![2.0 + (i % 4) as f64, noise]);
                labels.push(false);
            }
        }
        (rows, labels)
    }

    #[test]
    fn test_yeo_johnson_identity_at_lambda_one() {
        for x in [-3.0, -0.5, 0.0, 0.5, 10.0] {
            assert!((yeo_johnson(x, 1.0) - x).abs() < 1e-12, "x = {}", x);
        }
    }

    #[test]
    fn test_yeo_johnson_special_lambdas() {
        assert!((yeo_johnson(3.0, 0.0) - 4.0_f64.ln()).abs() < 1e-12);
        assert!((yeo_johnson(-3.0, 2.0) + 4.0_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_yeo_johnson_is_monotonic() {
        for lambda in [-1.5, 0.0, 0.7, 2.0] {
            let mut prev = f64::NEG_INFINITY;
            for i in -20..=20 {
                let y = yeo_johnson(i as f64 * 0.5, lambda);
                assert!(y > prev, "not increasing at lambda {}", lambda);
                prev = y;
            }
        }
    }

    #[test]
    fn test_power_transform_standardizes() {
        let rows: Vec<Vec<f64>> = (0..50).map(|i| vec![(i as f64).powi(2), 5.0]).collect();
        let pt = PowerTransform::fit(&rows);
        assert!(pt.lambdas[0] >= LAMBDA_MIN && pt.lambdas[0] <= LAMBDA_MAX);
        assert_eq!(pt.scales[1], 1.0, "constant column keeps unit scale");

        let transformed: Vec<f64> = rows.iter().map(|r| pt.transform(r)[0]).collect();
        let (mean, var) = mean_var(&transformed);
        assert!(mean.abs() < 1e-9);
        assert!((var - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_anova_ranks_informative_column_first() {
        let (rows, labels) = separable_data();
        let scores = anova_f_scores(&rows, &labels);
        assert!(scores[0] > scores[1]);
        assert_eq!(select_k_best(&scores, 1), vec![0]);
    }

    #[test]
    fn test_select_k_best_keeps_column_order() {
        let scores = [0.5, 9.0, 3.0, 7.0];
        assert_eq!(select_k_best(&scores, 2), vec![1, 3]);
        assert_eq!(select_k_best(&scores, 10), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_fit_and_predict_separable() {
        let (rows, labels) = separable_data();
        let model = GaussianNbModel::fit(&rows, &labels, 12).unwrap();
        assert!(model.validate().is_ok());

        let (event, proba) = model.predict(&[42.0, 3.0]).unwrap();
        assert!(event);
        assert!(proba.event > 0.9);

        let (event, proba) = model.predict(&[3.0, 3.0]).unwrap();
        assert!(!event);
        assert!((proba.event + proba.no_event - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_priors_match_class_rates() {
        let (rows, labels) = separable_data();
        let model = GaussianNbModel::fit(&rows, &labels, 2).unwrap();
        assert!((model.event.prior - 20.0 / 60.0).abs() < 1e-12);
        assert!((model.no_event.prior - 40.0 / 60.0).abs() < 1e-12);
    }

    #[test]
    fn test_wrong_length_input_rejected() {
        let (rows, labels) = separable_data();
        let model = GaussianNbModel::fit(&rows, &labels, 2).unwrap();
        assert_eq!(
            model.predict_proba(&[1.0]),
            Err(ModelError::ShapeMismatch { expected: 2, actual: 1 })
        );
    }

    #[test]
    fn test_single_class_cannot_be_fit() {
        let rows = vec![vec![1.0], vec![2.0], vec![3.0]];
        assert!(GaussianNbModel::fit(&rows, &[false, false, false], 1).is_err());
    }

    #[test]
    fn test_json_round_trip_preserves_predictions() {
        let (rows, labels) = separable_data();
        let model = GaussianNbModel::fit(&rows, &labels, 2).unwrap();
        let restored: GaussianNbModel =
            serde_json::from_str(&serde_json::to_string(&model).unwrap()).unwrap();
        let before = model.predict_proba(&[20.0, 1.0]).unwrap();
        let after = restored.predict_proba(&[20.0, 1.0]).unwrap();
        assert!((before.event - after.event).abs() < 1e-9);
    }
}
