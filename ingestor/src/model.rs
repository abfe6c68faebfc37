use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted temperature reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reading {
    pub id: Uuid,
    pub adc_value: i16,
    pub voltage: f64,
    pub temperature_c: f64,
    pub timestamp: DateTime<Utc>,
}

/// Reading as sent by the edge device, before validation.
///
/// `adc_value` is deliberately wider than the valid range so that
/// out-of-range samples reach validation instead of failing to parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReading {
    pub adc_value: i64,
    pub voltage: f64,
    pub temperature_c: f64,
}

/// A validated reading carrying its server-assigned timestamp, ready to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct StampedReading {
    pub adc_value: i16,
    pub voltage: f64,
    pub temperature_c: f64,
    pub timestamp: DateTime<Utc>,
}

/// Inclusive `[start, end]` bound on the reading timestamp. Either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeFilter {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl RangeFilter {
    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// Raw aggregate over a filtered set of readings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TemperatureAggregate {
    pub count: u64,
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Paginated listing response
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadingPage {
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub data: Vec<Reading>,
}

/// Summary statistics response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatsSummary {
    pub count: u64,
    pub avg_temperature: Option<f64>,
    pub min_temperature: Option<f64>,
    pub max_temperature: Option<f64>,
    pub last_reading: Option<Reading>,
}

/// Generic acknowledgement body
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
    pub status: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: "ok".to_string(),
        }
    }
}
