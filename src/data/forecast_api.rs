use anyhow::{Context, Result};
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use std::collections::BTreeMap;
use std::time::Duration;
use crate::config::Config;
use crate::data::types::{EstimateResponse, ForecastPoint, ForecastSelection};

/// Upper bound for a single estimate request, connect included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ForecastClient {
    client: Client,
    url: String,
}

impl ForecastClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("forecast_solar_exporter/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url: estimate_url(config),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch the current estimate for the configured plane.
    pub async fn fetch_estimate(&self) -> Result<EstimateResponse, ForecastError> {
        let response = self.client.get(&self.url).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ForecastError::HttpStatus(status));
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// `{base}/estimate/{lat}/{lon}/{declination}/{azimuth}/{kwp}`
pub fn estimate_url(config: &Config) -> String {
    let loc = &config.location;
    format!(
        "{}/estimate/{}/{}/{}/{}/{}",
        config.polling.api_url.trim_end_matches('/'),
        loc.latitude,
        loc.longitude,
        loc.declination,
        loc.azimuth,
        loc.peak_power_kw,
    )
}

/// Pick today and tomorrow out of the daily totals.
///
/// The first sorted key is taken as today and the second as tomorrow. More
/// than two days is rejected outright, and every entry is checked before
/// anything is returned, so a failure never yields a half-filled selection.
pub fn select_forecast(
    watt_hours_day: &BTreeMap<String, i64>,
) -> Result<ForecastSelection, ForecastError> {
    if watt_hours_day.len() > 2 {
        return Err(ForecastError::UnexpectedEntry(watt_hours_day.len()));
    }

    let mut points = Vec::with_capacity(2);
    for (date, &watt_hours) in watt_hours_day {
        let parsed = parse_day(date).ok_or_else(|| ForecastError::DateParse(date.clone()))?;
        if watt_hours < 0 {
            return Err(ForecastError::NegativeEnergy {
                date: date.clone(),
                watt_hours,
            });
        }
        points.push(ForecastPoint::from_watt_hours(parsed, watt_hours));
    }

    let mut points = points.into_iter();
    Ok(ForecastSelection {
        today: points.next(),
        tomorrow: points.next(),
    })
}

/// Strict `YYYY-MM-DD`. Key order is only chronological for zero-padded
/// dates, so anything that does not format back to the same key is refused.
fn parse_day(key: &str) -> Option<NaiveDate> {
    let parsed = NaiveDate::parse_from_str(key, "%Y-%m-%d").ok()?;
    (parsed.format("%Y-%m-%d").to_string() == key).then_some(parsed)
}

#[derive(Debug, thiserror::Error)]
pub enum ForecastError {
    #[error("Error getting URL: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Error while requesting URL: {0}")]
    HttpStatus(StatusCode),

    #[error("Error decoding JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Error parsing date {0:?}: expected YYYY-MM-DD")]
    DateParse(String),

    #[error("Unexpected entry: expected at most 2 days, got {0}")]
    UnexpectedEntry(usize),

    #[error("Unexpected entry: negative energy {watt_hours} Wh for {date}")]
    NegativeEnergy { date: String, watt_hours: i64 },
}

impl ForecastError {
    pub const KINDS: [&'static str; 5] = [
        "network",
        "http_status",
        "decode",
        "date_parse",
        "unexpected_shape",
    ];

    /// Label value used by the poll error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            ForecastError::Network(_) => "network",
            ForecastError::HttpStatus(_) => "http_status",
            ForecastError::Decode(_) => "decode",
            ForecastError::DateParse(_) => "date_parse",
            ForecastError::UnexpectedEntry(_) | ForecastError::NegativeEnergy { .. } => {
                "unexpected_shape"
            }
        }
    }
}
