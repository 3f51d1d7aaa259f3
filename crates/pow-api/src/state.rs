//! # Application State
//!
//! Shared state handed to every handler: the [`Powergate`] instance, the
//! server settings, and the Prometheus render handle when metrics are on.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use pow_engine::Powergate;

use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub powergate: Powergate,
    pub config: Arc<ServerConfig>,
    pub prometheus: Option<PrometheusHandle>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("powergate", &self.powergate)
            .field("config", &self.config)
            .field("prometheus", &self.prometheus.is_some())
            .finish()
    }
}

impl AppState {
    pub fn new(powergate: Powergate, config: ServerConfig) -> Self {
        Self {
            powergate,
            config: Arc::new(config),
            prometheus: None,
        }
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}
