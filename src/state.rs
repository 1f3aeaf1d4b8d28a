//! # Application State Management
//!
//! Shared state handed to every HTTP request handler.
//!
//! ## What lives here:
//! - **config**: the effective configuration, updatable at runtime. A running
//!   chat keeps the configuration it was started with; updates apply to the
//!   next `start()`.
//! - **metrics**: request counters and per-endpoint timings (updated by the
//!   metrics middleware) plus chat start counters
//! - **controller**: the single [`LiveController`] that owns the voice session
//! - **start_time**: for uptime reporting
//!
//! ## Arc<RwLock<T>> Pattern
//! - **Arc**: many handlers hold a reference to the same data
//! - **RwLock**: many readers or one writer at a time
//!
//! Locks are only held for a copy or a counter update, never across an
//! `.await`. A poisoned lock is recovered rather than propagated: every value
//! behind these locks stays valid after a panicking writer.

use crate::audio::capture::DeviceCaptureProvider;
use crate::audio::recorder::WavRecorderProvider;
use crate::config::AppConfig;
use crate::live::transport::WsConnector;
use crate::session::LiveController;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Request metrics, updated by the middleware on every request
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Owner of the voice session
    pub controller: Arc<LiveController>,

    /// When the server started
    pub start_time: Instant,
}

/// Metrics collected across all HTTP requests.
///
/// - **request_count** / **error_count**: load and reliability
/// - **chats_started** / **chats_failed**: outcomes of `POST /chat/start`
/// - **endpoint_metrics**: per-endpoint statistics, keyed by "METHOD /pattern"
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub chats_started: u64,
    pub chats_failed: u64,
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Performance metrics for a single API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,

    /// Cumulative processing time in milliseconds
    pub total_duration_ms: u64,

    pub error_count: u64,
}

impl AppState {
    /// Create the state with the built-in collaborators: the capture device
    /// named in the `[capture]` section at each start, the WAV recorder
    /// playback sink and the WebSocket connector.
    pub fn new(config: AppConfig) -> Self {
        let controller = LiveController::new(
            Arc::new(WsConnector),
            Arc::new(DeviceCaptureProvider),
            Arc::new(WavRecorderProvider),
        );
        Self::with_controller(config, Arc::new(controller))
    }

    /// Create the state around an existing controller (tests, embedding).
    pub fn with_controller(config: AppConfig, controller: Arc<LiveController>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            controller,
            start_time: Instant::now(),
        }
    }

    fn metrics_mut(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn metrics_ref(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately, so other handlers aren't blocked.
    pub fn get_config(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap_or_else(PoisonError::into_inner) = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn increment_request_count(&self) {
        self.metrics_mut().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics_mut().error_count += 1;
    }

    /// Record the outcome of a chat start request.
    pub fn record_chat_start(&self, succeeded: bool) {
        let mut metrics = self.metrics_mut();
        if succeeded {
            metrics.chats_started += 1;
        } else {
            metrics.chats_failed += 1;
        }
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// The first request to an endpoint creates its entry; later requests
    /// update it.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_mut();
        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Consistent copy of the metrics for the `/metrics` endpoint.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_ref().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time in milliseconds (0.0 before the first request).
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of failed requests, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_metrics() {
        let state = AppState::new(AppConfig::default());
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let metrics = state.get_metrics_snapshot();
        let health = &metrics.endpoint_metrics["GET /health"];
        assert_eq!(health.request_count, 2);
        assert_eq!(health.average_duration_ms(), 20.0);
        assert_eq!(health.error_rate(), 0.5);
    }

    #[test]
    fn test_update_config_validates() {
        let state = AppState::new(AppConfig::default());
        let mut bad = state.get_config();
        bad.audio.chunk_size = 0;
        assert!(state.update_config(bad).is_err());
        assert_eq!(state.get_config().audio.chunk_size, 4096);
    }

    #[test]
    fn test_chat_start_counters() {
        let state = AppState::new(AppConfig::default());
        state.record_chat_start(true);
        state.record_chat_start(false);
        state.record_chat_start(false);
        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.chats_started, 1);
        assert_eq!(metrics.chats_failed, 2);
    }
}
