pub mod forecast_api;
pub mod poller;
pub mod types;
