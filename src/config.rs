use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.forecast.solar";

/// Command line flags. Every flag is optional so that values coming from the
/// config file or the environment are only overridden when given explicitly.
#[derive(Debug, Parser)]
#[command(name = "forecast_solar_exporter", version, about)]
pub struct Cli {
    /// Optional TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// The address to listen on for HTTP requests [default: :9111]
    #[arg(long)]
    pub listen_address: Option<String>,

    /// Latitude of your location [default: 54.9]
    #[arg(long, allow_negative_numbers = true)]
    pub latitude: Option<f64>,

    /// Longitude of your location [default: 25.3]
    #[arg(long, allow_negative_numbers = true)]
    pub longitude: Option<f64>,

    /// Solar plane declination, 0 = horizontal, 90 = vertical [default: 45]
    #[arg(long)]
    pub declination: Option<f64>,

    /// Solar plane azimuth (-180..180), West = 90, South = 0, East = -90 [default: 0]
    #[arg(long = "az", allow_negative_numbers = true)]
    pub azimuth: Option<f64>,

    /// Solar plane max. peak power in kilo watt [default: 10]
    #[arg(long = "kwp", alias = "kWp")]
    pub peak_power_kw: Option<f64>,

    /// Interval in seconds between polls [default: 3600]
    #[arg(long)]
    pub poll_interval: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub location: LocationConfig,
    pub polling: PollingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_address: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
    pub declination: f64,
    pub azimuth: f64,
    pub peak_power_kw: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub api_url: String,
    pub interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: ":9111".to_string(),
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            latitude: 54.9,
            longitude: 25.3,
            declination: 45.0,
            azimuth: 0.0,
            peak_power_kw: 10.0,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            interval_secs: 3600,
        }
    }
}

/// Overrides read from the process environment (and `.env`, if present).
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub api_url: Option<String>,
    pub listen_address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub declination: Option<f64>,
    pub azimuth: Option<f64>,
    pub peak_power_kw: Option<f64>,
    pub poll_interval_secs: Option<u64>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        Ok(config)
    }

    /// Builds the effective configuration: defaults, then the config file,
    /// then the environment, then explicit flags.
    pub fn resolve(cli: &Cli, env: &EnvConfig) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::load(&path.to_string_lossy())?,
            None => Self::default(),
        };

        env.apply(&mut config);
        config.apply_cli(cli);
        config.validate()?;

        Ok(config)
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(addr) = &cli.listen_address {
            self.server.listen_address = addr.clone();
        }
        if let Some(v) = cli.latitude {
            self.location.latitude = v;
        }
        if let Some(v) = cli.longitude {
            self.location.longitude = v;
        }
        if let Some(v) = cli.declination {
            self.location.declination = v;
        }
        if let Some(v) = cli.azimuth {
            self.location.azimuth = v;
        }
        if let Some(v) = cli.peak_power_kw {
            self.location.peak_power_kw = v;
        }
        if let Some(v) = cli.poll_interval {
            self.polling.interval_secs = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let loc = &self.location;

        if !(-90.0..=90.0).contains(&loc.latitude) {
            bail!("latitude must be within -90..90, got {}", loc.latitude);
        }
        if !(-180.0..=180.0).contains(&loc.longitude) {
            bail!("longitude must be within -180..180, got {}", loc.longitude);
        }
        if !(0.0..=90.0).contains(&loc.declination) {
            bail!("declination must be within 0..90, got {}", loc.declination);
        }
        if !(-180.0..=180.0).contains(&loc.azimuth) {
            bail!("azimuth must be within -180..180, got {}", loc.azimuth);
        }
        if loc.peak_power_kw.is_nan() || loc.peak_power_kw <= 0.0 {
            bail!("peak power must be positive, got {}", loc.peak_power_kw);
        }
        if self.polling.interval_secs == 0 {
            bail!("poll interval must be at least one second");
        }

        self.listen_addr()?;
        Ok(())
    }

    /// Parses the listen address. A bare `:port` binds every interface.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let raw = self.server.listen_address.trim();
        let addr = if raw.starts_with(':') {
            format!("0.0.0.0{}", raw)
        } else {
            raw.to_string()
        };

        addr.parse()
            .with_context(|| format!("Invalid listen address: {}", raw))
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl EnvConfig {
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        Ok(Self {
            api_url: std::env::var("FORECAST_SOLAR_API_URL").ok(),
            listen_address: std::env::var("FORECAST_SOLAR_LISTEN_ADDRESS").ok(),
            latitude: parse_env("FORECAST_SOLAR_LATITUDE")?,
            longitude: parse_env("FORECAST_SOLAR_LONGITUDE")?,
            declination: parse_env("FORECAST_SOLAR_DECLINATION")?,
            azimuth: parse_env("FORECAST_SOLAR_AZIMUTH")?,
            peak_power_kw: parse_env("FORECAST_SOLAR_KWP")?,
            poll_interval_secs: parse_env("FORECAST_SOLAR_POLL_INTERVAL")?,
        })
    }

    fn apply(&self, config: &mut Config) {
        if let Some(url) = &self.api_url {
            config.polling.api_url = url.clone();
        }
        if let Some(addr) = &self.listen_address {
            config.server.listen_address = addr.clone();
        }
        if let Some(v) = self.latitude {
            config.location.latitude = v;
        }
        if let Some(v) = self.longitude {
            config.location.longitude = v;
        }
        if let Some(v) = self.declination {
            config.location.declination = v;
        }
        if let Some(v) = self.azimuth {
            config.location.azimuth = v;
        }
        if let Some(v) = self.peak_power_kw {
            config.location.peak_power_kw = v;
        }
        if let Some(v) = self.poll_interval_secs {
            config.polling.interval_secs = v;
        }
    }
}

fn parse_env<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .with_context(|| format!("{} is not a number: {}", key, raw)),
        Err(_) => Ok(None),
    }
}
