use chrono::Utc;
use prometheus::core::{Collector, Desc};
use prometheus::proto::{self, MetricFamily, MetricType};
use prometheus::{Encoder, Gauge, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::collections::HashMap;
use std::sync::Arc;
use crate::data::forecast_api::ForecastError;
use crate::data::types::ForecastPoint;
use crate::monitoring::store::ForecastStore;

pub const TODAY_METRIC: &str = "forecast_solar_today";
pub const TOMORROW_METRIC: &str = "forecast_solar_tomorrow";

/// Exposes the stored forecast points as gauges stamped with the forecast
/// date rather than the scrape time.
pub struct ForecastCollector {
    store: Arc<ForecastStore>,
    today: Desc,
    tomorrow: Desc,
}

impl ForecastCollector {
    pub fn new(store: Arc<ForecastStore>) -> prometheus::Result<Self> {
        Ok(Self {
            store,
            today: Desc::new(
                TODAY_METRIC.to_string(),
                "Solar harvest forecast for today in kWh".to_string(),
                vec![],
                HashMap::new(),
            )?,
            tomorrow: Desc::new(
                TOMORROW_METRIC.to_string(),
                "Solar harvest forecast for tomorrow in kWh".to_string(),
                vec![],
                HashMap::new(),
            )?,
        })
    }
}

impl Collector for ForecastCollector {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.today, &self.tomorrow]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let snapshot = self.store.snapshot();
        vec![
            gauge_family(&self.today, &snapshot.today),
            gauge_family(&self.tomorrow, &snapshot.tomorrow),
        ]
    }
}

fn gauge_family(desc: &Desc, point: &ForecastPoint) -> MetricFamily {
    let mut gauge = proto::Gauge::default();
    gauge.set_value(point.energy_kwh);

    let mut metric = proto::Metric::default();
    metric.set_gauge(gauge);
    // No date yet: leave the timestamp unset so the scrape time applies.
    if let Some(ts) = point.timestamp_ms() {
        metric.set_timestamp_ms(ts);
    }

    let mut family = MetricFamily::default();
    family.set_name(desc.fq_name.clone());
    family.set_help(desc.help.clone());
    family.set_field_type(MetricType::GAUGE);
    family.set_metric(vec![metric].into());
    family
}

/// Health of the poll loop.
#[derive(Clone)]
pub struct PollMetrics {
    errors: IntCounterVec,
    last_success: Gauge,
}

impl PollMetrics {
    fn new() -> prometheus::Result<Self> {
        let errors = IntCounterVec::new(
            Opts::new(
                "forecast_solar_poll_errors_total",
                "Failed forecast polls by error kind",
            ),
            &["kind"],
        )?;
        for kind in ForecastError::KINDS {
            errors.with_label_values(&[kind]);
        }

        let last_success = Gauge::new(
            "forecast_solar_last_success_timestamp_seconds",
            "Unix time of the last successful forecast poll",
        )?;

        Ok(Self { errors, last_success })
    }

    fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.errors.clone()))?;
        registry.register(Box::new(self.last_success.clone()))?;
        Ok(())
    }

    pub fn record_success(&self) {
        self.last_success.set(Utc::now().timestamp() as f64);
    }

    pub fn record_error(&self, err: &ForecastError) {
        self.errors.with_label_values(&[err.kind()]).inc();
    }

    #[cfg(test)]
    pub fn error_count(&self, kind: &str) -> u64 {
        self.errors.with_label_values(&[kind]).get()
    }
}

/// Registry holding every metric served on `/metrics`.
pub struct Metrics {
    registry: Registry,
    poll: PollMetrics,
}

impl Metrics {
    pub fn new(store: Arc<ForecastStore>) -> prometheus::Result<Self> {
        let registry = Registry::new();

        registry.register(Box::new(ForecastCollector::new(store)?))?;

        let build_info = IntGauge::with_opts(
            Opts::new(
                "forecast_solar_exporter_build_info",
                "Build information of forecast_solar_exporter",
            )
            .const_label("version", env!("CARGO_PKG_VERSION")),
        )?;
        build_info.set(1);
        registry.register(Box::new(build_info))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        let poll = PollMetrics::new()?;
        poll.register(&registry)?;

        Ok(Self { registry, poll })
    }

    pub fn poll_metrics(&self) -> PollMetrics {
        self.poll.clone()
    }

    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    /// Render every registered metric in the text exposition format.
    pub fn encode(&self) -> prometheus::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.gather(), &mut buffer)?;
        Ok(buffer)
    }
}
