//! Hazard threshold scoring.
//!
//! `score` is the one rule engine in the service. The hybrid predictor uses
//! it as its fallback and as the explanation for model decisions, and the
//! trainer uses it to label every training row, so there is exactly one
//! implementation to keep in step.

use serde::{Deserialize, Serialize};

use crate::model::CanonicalFeatureRecord;

/// Accumulated score at or above which a record counts as a hazard event.
pub const EVENT_SCORE_THRESHOLD: f64 = 2.0;

/// Bonus added when rain and wind both clear their second tier.
pub const STORM_COMBINATION_BONUS: f64 = 1.0;

pub const TAG_STORM_COMBINATION: &str = "rain + wind (possible storm)";

// ---------------------------------------------------------------------------
// Threshold table
// ---------------------------------------------------------------------------

/// Breakpoints for the four scored factors.
///
/// Precipitation, wind and heat breakpoints ascend (`value >= breakpoint`
/// enters a tier); pressure breakpoints descend (`value <= breakpoint`).
/// The fixed-size arrays make "exactly four tiers" a type-level guarantee;
/// ordering is checked by `validate`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HazardThresholds {
    pub precipitation_mm: [f64; 4],
    pub wind_speed_ms: [f64; 4],
    pub temp_heat_c: [f64; 4],
    pub pressure_hpa: [f64; 4],
}

impl Default for HazardThresholds {
    fn default() -> Self {
        HazardThresholds {
            precipitation_mm: [10.0, 30.0, 50.0, 100.0],
            wind_speed_ms: [8.0, 12.0, 17.0, 25.0],
            temp_heat_c: [32.0, 35.0, 38.0, 41.0],
            pressure_hpa: [1000.0, 990.0, 975.0, 960.0],
        }
    }
}

impl HazardThresholds {
    /// Checks that every table is strictly monotonic in its scoring
    /// direction and finite.
    pub fn validate(&self) -> Result<(), String> {
        let ascending = [
            ("precipitation_mm", &self.precipitation_mm),
            ("wind_speed_ms", &self.wind_speed_ms),
            ("temp_heat_c", &self.temp_heat_c),
        ];
        for (name, table) in ascending {
            if table.iter().any(|v| !v.is_finite()) {
                return Err(format!("{} contains a non-finite breakpoint", name));
            }
            if !table.windows(2).all(|w| w[0] < w[1]) {
                return Err(format!("{} must be strictly ascending: {:?}", name, table));
            }
        }
        if self.pressure_hpa.iter().any(|v| !v.is_finite()) {
            return Err("pressure_hpa contains a non-finite breakpoint".to_string());
        }
        if !self.pressure_hpa.windows(2).all(|w| w[0] > w[1]) {
            return Err(format!(
                "pressure_hpa must be strictly descending: {:?}",
                self.pressure_hpa
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Factor tables
// ---------------------------------------------------------------------------

/// Contribution and tag per tier, lowest tier first.
struct Factor {
    weights: [f64; 4],
    tags: [&'static str; 4],
}

const PRECIPITATION: Factor = Factor {
    weights: [1.0, 2.0, 3.0, 4.0],
    tags: ["light rain", "moderate rain", "heavy rain", "extreme rain"],
};

const WIND: Factor = Factor {
    weights: [1.0, 1.5, 2.5, 3.0],
    tags: ["moderate wind", "strong wind", "very strong wind", "extreme wind"],
};

const HEAT: Factor = Factor {
    weights: [1.0, 1.5, 2.5, 3.0],
    tags: ["hot", "very hot", "severe heat", "extreme heat"],
};

const PRESSURE: Factor = Factor {
    weights: [1.0, 1.5, 2.5, 3.0],
    tags: ["moderate low pressure", "low pressure", "very low pressure", "cyclone pressure"],
};

/// Tag vocabulary per factor, lowest tier first. The classifier matches
/// against these.
pub const PRECIPITATION_TAGS: [&str; 4] = PRECIPITATION.tags;
pub const WIND_TAGS: [&str; 4] = WIND.tags;
pub const HEAT_TAGS: [&str; 4] = HEAT.tags;
pub const PRESSURE_TAGS: [&str; 4] = PRESSURE.tags;

/// Highest tier index (0..=3) whose breakpoint is met, evaluated top-down.
fn tier_at_or_above(value: f64, breakpoints: &[f64; 4]) -> Option<usize> {
    (0..4).rev().find(|&i| value >= breakpoints[i])
}

fn tier_at_or_below(value: f64, breakpoints: &[f64; 4]) -> Option<usize> {
    (0..4).rev().find(|&i| value <= breakpoints[i])
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Result of running the rule engine over one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HazardScore {
    pub event: bool,
    /// Tags in factor order: rain, wind, heat, pressure, combination.
    pub hazards: Vec<String>,
    pub score: f64,
}

/// Scores a record against the threshold table.
///
/// Each factor contributes only its highest met tier. The storm bonus is
/// independent of the individual tier contributions. Deterministic: the same
/// record and table always give the same result.
pub fn score(record: &CanonicalFeatureRecord, thresholds: &HazardThresholds) -> HazardScore {
    let mut total = 0.0;
    let mut hazards = Vec::new();

    let mut apply = |tier: Option<usize>, factor: &Factor| {
        if let Some(i) = tier {
            total += factor.weights[i];
            hazards.push(factor.tags[i].to_string());
        }
    };

    let rain = record.precipitation_mm;
    let wind = record.wind_speed_ms;

    apply(tier_at_or_above(rain, &thresholds.precipitation_mm), &PRECIPITATION);
    apply(tier_at_or_above(wind, &thresholds.wind_speed_ms), &WIND);
    apply(tier_at_or_above(record.temp_max_c, &thresholds.temp_heat_c), &HEAT);
    apply(tier_at_or_below(record.pressure_hpa, &thresholds.pressure_hpa), &PRESSURE);

    if rain >= thresholds.precipitation_mm[1] && wind >= thresholds.wind_speed_ms[1] {
        total += STORM_COMBINATION_BONUS;
        hazards.push(TAG_STORM_COMBINATION.to_string());
    }

    HazardScore {
        event: total >= EVENT_SCORE_THRESHOLD,
        hazards,
        score: total,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
