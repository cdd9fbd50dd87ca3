use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Body of `GET /estimate/...`. Only the daily totals are used.
#[derive(Debug, Deserialize)]
pub struct EstimateResponse {
    pub result: EstimateResult,
}

#[derive(Debug, Deserialize)]
pub struct EstimateResult {
    /// Watt-hours per day keyed by `YYYY-MM-DD`. Sorted by key, which is
    /// chronological for ISO dates.
    pub watt_hours_day: BTreeMap<String, i64>,
}

/// Forecasted energy yield for one calendar day.
///
/// The zero value (no date, 0 kWh) is what gets exported before the first
/// successful poll.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ForecastPoint {
    pub date: Option<NaiveDate>,
    pub energy_kwh: f64,
}

impl ForecastPoint {
    pub fn from_watt_hours(date: NaiveDate, watt_hours: i64) -> Self {
        Self {
            date: Some(date),
            energy_kwh: watt_hours as f64 / 1000.0,
        }
    }

    /// Midnight UTC of the forecast date, in milliseconds since the epoch.
    pub fn timestamp_ms(&self) -> Option<i64> {
        self.date
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|midnight| midnight.and_utc().timestamp_millis())
    }
}

/// The points to write after a successful poll. `None` leaves the stored
/// value untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ForecastSelection {
    pub today: Option<ForecastPoint>,
    pub tomorrow: Option<ForecastPoint>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ForecastSnapshot {
    pub today: ForecastPoint,
    pub tomorrow: ForecastPoint,
}
