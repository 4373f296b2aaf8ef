//! Risk level ladder.

use crate::model::{HazardType, RiskLevel};

/// Derives a risk level from the hazard category and event probability.
///
/// No event, or no hazard category, is always `Low`. Cyclone-class hazards
/// never drop below `Moderate` once predicted.
pub fn risk_level(hazard_type: HazardType, probability: f64, event: bool) -> RiskLevel {
    if !event || hazard_type.is_none() {
        return RiskLevel::Low;
    }

    if hazard_type.is_cyclonic() {
        if probability >= 0.8 {
            RiskLevel::Critical
        } else if probability >= 0.6 {
            RiskLevel::High
        } else {
            RiskLevel::Moderate
        }
    } else if probability >= 0.7 {
        RiskLevel::High
    } else if probability >= 0.5 {
        RiskLevel::Moderate
    } else {
        RiskLevel::Low
    }
}
