//! Watches a Consul health-service endpoint and classifies instances into
//! healthy / overloaded / on-maintenance / unhealthy buckets, driven by a
//! blocking long-poll against `/v1/health/service/{name}`.

pub mod agent;
pub mod api;
pub mod catalog;
pub mod classifier;
pub mod config;
pub mod error;
pub mod extractor;
pub mod health;
pub mod instance;
pub mod instance_set;
pub mod logging;
pub mod monitor;
pub mod validator;
pub mod watcher;

pub use config::MonitorConfig;
pub use error::{MonitorError, MonitorResult, NodeContext};
pub use extractor::{CpuExtractor, EmbeddedStatusPayload, Extractor, MemExtractor, PidExtractor, StatusExtractor};
pub use instance::{InstanceInfo, ServiceInstance};
pub use instance_set::{Bucket, InstanceSet};
pub use monitor::{Monitor, MonitorEvent};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_surface_constructs_a_monitor() {
        let client = api::Client::new(api::Config::default());
        let config = MonitorConfig::new("web", "app:status");
        let monitor = Monitor::new(client, config);
        async_std::task::block_on(async {
            assert!(!monitor.is_initialized().await);
        });
    }
}
