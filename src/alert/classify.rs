//! Maps a triggered tag set to a named hazard category.
//!
//! Rules are checked in priority order and the first match wins. A rule
//! that asks for "heavy rain" is also satisfied by "extreme rain": a
//! factor's tag counts for its own tier and every tier above it. This is
//! deliberately broader than exact tag matching, under which "extreme rain"
//! or "cyclone pressure" on its own would classify as no hazard.

use crate::alert::thresholds::{HEAT_TAGS, PRECIPITATION_TAGS, PRESSURE_TAGS, WIND_TAGS};
use crate::model::HazardType;

/// Tier index of "heavy rain", "very strong wind" and "very low pressure".
const SEVERE_TIER: usize = 2;

/// True if `hazards` contains the tag for `tier` of this factor or any
/// higher tier.
fn has_tier_or_worse(hazards: &[String], factor_tags: &[&str; 4], tier: usize) -> bool {
    factor_tags[tier..]
        .iter()
        .any(|tag| hazards.iter().any(|h| h == tag))
}

fn has_tag(hazards: &[String], tag: &str) -> bool {
    hazards.iter().any(|h| h == tag)
}

/// Classifies the tags produced by `alert::thresholds::score`.
pub fn classify(hazards: &[String]) -> HazardType {
    let heavy_rain = has_tier_or_worse(hazards, &PRECIPITATION_TAGS, SEVERE_TIER);
    let very_strong_wind = has_tier_or_worse(hazards, &WIND_TAGS, SEVERE_TIER);
    let very_low_pressure = has_tier_or_worse(hazards, &PRESSURE_TAGS, SEVERE_TIER);
    let any_heat = has_tier_or_worse(hazards, &HEAT_TAGS, 0);

    if very_low_pressure && very_strong_wind && heavy_rain {
        HazardType::TropicalCyclone
    } else if very_strong_wind && heavy_rain {
        HazardType::TropicalStorm
    } else if heavy_rain {
        HazardType::FloodRisk
    } else if very_strong_wind {
        HazardType::Windstorm
    } else if any_heat {
        HazardType::Heatwave
    } else if very_low_pressure {
        HazardType::PossibleCyclone
    } else if has_tag(hazards, PRESSURE_TAGS[1]) {
        HazardType::LowPressure
    } else {
        HazardType::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_tags_classify_as_none() {
        assert_eq!(classify(&[]), HazardType::None);
    }

    #[test]
    fn test_cyclone_needs_all_three() {
        let t = tags(&["heavy rain", "very strong wind", "very low pressure"]);
        assert_eq!(classify(&t), HazardType::TropicalCyclone);

        let t = tags(&["extreme rain", "extreme wind", "cyclone pressure"]);
        assert_eq!(classify(&t), HazardType::TropicalCyclone, "worse tiers also count");
    }

    #[test]
    fn test_storm_outranks_flood_and_windstorm() {
        let t = tags(&["heavy rain", "very strong wind", "low pressure"]);
        assert_eq!(classify(&t), HazardType::TropicalStorm);
    }

    #[test]
    fn test_top_tier_alone_still_classifies() {
        assert_eq!(classify(&tags(&["extreme rain"])), HazardType::FloodRisk);
        assert_eq!(classify(&tags(&["cyclone pressure"])), HazardType::PossibleCyclone);
        assert_eq!(classify(&tags(&["extreme wind"])), HazardType::Windstorm);
    }

    #[test]
    fn test_flood_beats_heat() {
        let t = tags(&["extreme rain", "extreme heat"]);
        assert_eq!(classify(&t), HazardType::FloodRisk);
    }

    #[test]
    fn test_moderate_rain_is_not_flood() {
        let t = tags(&["moderate rain", "strong wind", "rain + wind (possible storm)"]);
        assert_eq!(classify(&t), HazardType::None);
    }

    #[test]
    fn test_windstorm() {
        assert_eq!(classify(&tags(&["extreme wind"])), HazardType::Windstorm);
    }

    #[test]
    fn test_any_heat_tag_is_heatwave() {
        for tag in HEAT_TAGS {
            assert_eq!(classify(&tags(&[tag])), HazardType::Heatwave, "tag {}", tag);
        }
    }

    #[test]
    fn test_pressure_only_classes() {
        assert_eq!(
            classify(&tags(&["cyclone pressure"])),
            HazardType::PossibleCyclone
        );
        assert_eq!(classify(&tags(&["low pressure"])), HazardType::LowPressure);
        assert_eq!(
            classify(&tags(&["moderate low pressure"])),
            HazardType::None
        );
    }
}
