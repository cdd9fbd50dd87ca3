pub mod metrics;
pub mod server;
pub mod store;
