//! Alert delivery seam.
//!
//! The scheduler hands every detected hazard to an `AlertSink`. What
//! happens next (SMS, push, e-mail) belongs to whoever implements the sink;
//! this crate ships a log sink, an in-memory sink for tests and tooling, and
//! a PostgreSQL sink that writes rows into the `notifications` table read
//! by the delivery service.

use chrono::{DateTime, Utc};
use postgres::{Client, NoTls};
use serde::Serialize;
use std::fmt;
use std::sync::Mutex;

use crate::hazards;
use crate::logging::{self, LogSource};
use crate::model::{HazardType, RiskLevel};

// ---------------------------------------------------------------------------
// Alert
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub title: String,
    pub message: String,
    pub sms: String,
    pub hazard_type: HazardType,
    pub probability: f64,
    pub risk_level: RiskLevel,
    pub forecast_time: DateTime<Utc>,
}

impl Alert {
    /// Builds an alert using the registry wording for `hazard_type`.
    pub fn from_template(
        hazard_type: HazardType,
        probability: f64,
        risk_level: RiskLevel,
        forecast_time: DateTime<Utc>,
    ) -> Alert {
        let template = hazards::template_or_general(hazard_type);
        Alert {
            title: template.title.to_string(),
            message: template.message.to_string(),
            sms: template.sms.to_string(),
            hazard_type,
            probability,
            risk_level,
            forecast_time,
        }
    }
}

#[derive(Debug)]
pub enum SinkError {
    Connection(String),
    Delivery(String),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Connection(msg) => write!(f, "Alert sink connection failed: {}", msg),
            SinkError::Delivery(msg) => write!(f, "Alert delivery failed: {}", msg),
        }
    }
}

impl std::error::Error for SinkError {}

/// Receives hazard alerts. Implementations must be shareable with the
/// scheduler thread.
pub trait AlertSink: Send + Sync {
    fn send(&self, alert: &Alert) -> Result<(), SinkError>;
}

// ---------------------------------------------------------------------------
// Log sink
// ---------------------------------------------------------------------------

/// Writes alerts to the service log only.
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn send(&self, alert: &Alert) -> Result<(), SinkError> {
        let message = format!(
            "{} ({}, p={:.2}) at {}: {}",
            alert.title,
            alert.risk_level,
            alert.probability,
            alert.forecast_time.format("%Y-%m-%d %H:%M UTC"),
            alert.message
        );
        match alert.risk_level {
            RiskLevel::High | RiskLevel::Critical => {
                logging::warn(LogSource::Alert, Some(alert.hazard_type.as_str()), &message)
            }
            _ => logging::info(LogSource::Alert, Some(alert.hazard_type.as_str()), &message),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory sink
// ---------------------------------------------------------------------------

/// Collects alerts in memory.
#[derive(Default)]
pub struct MemoryAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything received so far.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .map(|a| a.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn len(&self) -> usize {
        self.alerts().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AlertSink for MemoryAlertSink {
    fn send(&self, alert: &Alert) -> Result<(), SinkError> {
        let mut alerts = self
            .alerts
            .lock()
            .map_err(|_| SinkError::Delivery("memory sink lock poisoned".to_string()))?;
        alerts.push(alert.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PostgreSQL sink
// ---------------------------------------------------------------------------

/// Records alerts as active rows in the `notifications` table.
///
/// The table is owned by the notification service; the id and timestamp
/// are left to the database so this works whatever their column types.
pub struct PostgresAlertSink {
    client: Mutex<Client>,
    recipients: String,
}

const INSERT_NOTIFICATION: &str = "
    INSERT INTO notifications (id, title, message, type, sent_to, status, date_time)
    VALUES (gen_random_uuid(), $1, $2, 'Alert', $3, 'Active', NOW())
";

impl PostgresAlertSink {
    pub fn connect(database_url: &str, recipients: &str) -> Result<Self, SinkError> {
        let client = Client::connect(database_url, NoTls)
            .map_err(|e| SinkError::Connection(e.to_string()))?;
        Ok(PostgresAlertSink {
            client: Mutex::new(client),
            recipients: recipients.to_string(),
        })
    }
}

impl AlertSink for PostgresAlertSink {
    fn send(&self, alert: &Alert) -> Result<(), SinkError> {
        let mut client = self
            .client
            .lock()
            .map_err(|_| SinkError::Delivery("database client lock poisoned".to_string()))?;

        let message = format!(
            "{} Expected around {}.",
            alert.message,
            alert.forecast_time.format("%Y-%m-%d %H:%M UTC")
        );
        client
            .execute(
                INSERT_NOTIFICATION,
                &[&alert.title, &message, &self.recipients],
            )
            .map_err(|e| SinkError::Delivery(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_alert(hazard_type: HazardType) -> Alert {
        Alert::from_template(
            hazard_type,
            0.91,
            RiskLevel::Critical,
            Utc.with_ymd_and_hms(2024, 9, 2, 3, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_alert_uses_registry_wording() {
        let alert = sample_alert(HazardType::TropicalStorm);
        assert_eq!(alert.title, "Tropical Storm Warning");
        assert!(alert.sms.starts_with("STORM WARNING"));
    }

    #[test]
    fn test_alert_for_none_uses_general_wording() {
        let alert = sample_alert(HazardType::None);
        assert_eq!(alert.title, "Weather Hazard Detected");
    }

    #[test]
    fn test_memory_sink_records_in_order() {
        let sink = MemoryAlertSink::new();
        assert!(sink.is_empty());
        sink.send(&sample_alert(HazardType::FloodRisk)).unwrap();
        sink.send(&sample_alert(HazardType::Heatwave)).unwrap();

        let received = sink.alerts();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].hazard_type, HazardType::FloodRisk);
        assert_eq!(received[1].hazard_type, HazardType::Heatwave);
    }

    #[test]
    fn test_log_sink_never_fails() {
        assert!(LogAlertSink.send(&sample_alert(HazardType::Windstorm)).is_ok());
    }
}
