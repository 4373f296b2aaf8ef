/// Hazard type registry for the hazard prediction service.
///
/// Defines every hazard category the classifier can emit along with the
/// notification text sent for it. This is the single source of truth for
/// alert wording; the scheduler and the alert sinks look templates up here
/// rather than formatting their own.

use crate::model::HazardType;

// ---------------------------------------------------------------------------
// Template metadata
// ---------------------------------------------------------------------------

/// Notification wording for one hazard category.
pub struct HazardTemplate {
    pub hazard_type: HazardType,
    /// Short in-app title.
    pub title: &'static str,
    /// Full in-app message body.
    pub message: &'static str,
    /// SMS variant, short enough for a single segment.
    pub sms: &'static str,
}

/// Every alertable hazard category, in classifier priority order.
/// `HazardType::None` is intentionally absent: it never produces an alert.
pub static HAZARD_REGISTRY: &[HazardTemplate] = &[
    HazardTemplate {
        hazard_type: HazardType::TropicalCyclone,
        title: "Tropical Cyclone Alert",
        message: "A tropical cyclone has been detected. Please secure your property \
                  and follow official instructions.",
        sms: "TYPHOON ALERT: Tropical cyclone detected. Secure property and follow official instructions.",
    },
    HazardTemplate {
        hazard_type: HazardType::TropicalStorm,
        title: "Tropical Storm Warning",
        message: "A tropical storm is likely in your area. Expect strong winds and \
                  heavy rain. Stay safe indoors.",
        sms: "STORM WARNING: Strong winds & heavy rain expected. Stay indoors.",
    },
    HazardTemplate {
        hazard_type: HazardType::FloodRisk,
        title: "Flood Risk Warning",
        message: "Heavy rain detected. Flooding may occur in low-lying areas. Stay \
                  alert and prepare to evacuate if necessary.",
        sms: "FLOOD ALERT: Heavy rain detected. Prepare for possible flooding in low areas.",
    },
    HazardTemplate {
        hazard_type: HazardType::Windstorm,
        title: "Strong Winds Detected",
        message: "Very strong winds are expected. Secure loose objects and avoid \
                  unnecessary travel.",
        sms: "STRONG WINDS: Secure objects & avoid travel. Stay safe.",
    },
    HazardTemplate {
        hazard_type: HazardType::Heatwave,
        title: "Heatwave Alert",
        message: "High temperatures detected. Stay hydrated, avoid direct sunlight, \
                  and check on vulnerable individuals.",
        sms: "HEATWAVE: High temp alert. Stay hydrated & avoid sun.",
    },
    HazardTemplate {
        hazard_type: HazardType::PossibleCyclone,
        title: "Cyclone Risk",
        message: "Very low pressure detected. Cyclone may develop. Stay tuned for updates.",
        sms: "CYCLONE RISK: Low pressure. Monitor for updates.",
    },
    HazardTemplate {
        hazard_type: HazardType::LowPressure,
        title: "Low Pressure Advisory",
        message: "A low pressure system is present. Weather may change rapidly.",
        sms: "LOW PRESSURE: Weather may change. Stay alert.",
    },
    HazardTemplate {
        hazard_type: HazardType::GeneralHazard,
        title: "Weather Hazard Detected",
        message: "Unusual hazardous weather conditions detected. Please monitor updates.",
        sms: "WEATHER ALERT: Hazardous conditions detected. Monitor updates.",
    },
];

/// Looks up the template for a hazard type. Returns `None` for
/// `HazardType::None`.
pub fn find_template(hazard_type: HazardType) -> Option<&'static HazardTemplate> {
    HAZARD_REGISTRY.iter().find(|t| t.hazard_type == hazard_type)
}

/// Template used when a caller asks for a type the registry lacks.
pub fn template_or_general(hazard_type: HazardType) -> &'static HazardTemplate {
    find_template(hazard_type)
        .or_else(|| find_template(HazardType::GeneralHazard))
        .unwrap_or(&HAZARD_REGISTRY[HAZARD_REGISTRY.len() - 1])
}

/// Every hazard type that can raise an alert.
pub fn alertable_types() -> Vec<HazardType> {
    HAZARD_REGISTRY.iter().map(|t| t.hazard_type).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
