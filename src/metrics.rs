//! Prometheus metrics for flow and step execution
//!
//! Metrics are exposed by the daemon's HTTP server on `GET /metrics`.
//!
//! # Available Metrics
//!
//! - `flowrun_flow_runs_total{flow, status}` - Counter of finished flow runs
//! - `flowrun_step_runs_total{flow, status}` - Counter of finished steps
//! - `flowrun_flow_duration_seconds{flow}` - Histogram of flow run durations
//! - `flowrun_active_flows` - Gauge of currently running flows
//!
//! # Example
//!
//! ```
//! use flowrun::metrics::FlowMetrics;
//!
//! let metrics = FlowMetrics::new();
//! metrics.flow_started();
//! metrics.record_step("build", "passed");
//! metrics.flow_finished("build", "passed", 1.5);
//! assert!(metrics.encode().unwrap().contains("flowrun_flow_runs_total"));
//! ```

use crate::error::{FlowrunError, Result};
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

/// Histogram bucket boundaries for flow duration metrics (in seconds)
const FLOW_DURATION_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 1800.0];

/// Prometheus metric set for flow runs
#[derive(Clone)]
pub struct FlowMetrics {
    registry: Registry,
    flow_runs: CounterVec,
    step_runs: CounterVec,
    flow_duration: HistogramVec,
    active_flows: Gauge,
}

impl FlowMetrics {
    /// Create a new metric set with its own registry
    pub fn new() -> Self {
        Self::try_new().expect("static metric definitions are valid")
    }

    fn try_new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let flow_runs = CounterVec::new(
            Opts::new("flowrun_flow_runs_total", "Total number of finished flow runs"),
            &["flow", "status"],
        )?;

        let step_runs = CounterVec::new(
            Opts::new("flowrun_step_runs_total", "Total number of finished steps"),
            &["flow", "status"],
        )?;

        let flow_duration = HistogramVec::new(
            HistogramOpts::new(
                "flowrun_flow_duration_seconds",
                "Flow run duration in seconds",
            )
            .buckets(FLOW_DURATION_BUCKETS.to_vec()),
            &["flow"],
        )?;

        let active_flows =
            Gauge::with_opts(Opts::new("flowrun_active_flows", "Currently running flows"))?;

        registry.register(Box::new(flow_runs.clone()))?;
        registry.register(Box::new(step_runs.clone()))?;
        registry.register(Box::new(flow_duration.clone()))?;
        registry.register(Box::new(active_flows.clone()))?;

        Ok(Self {
            registry,
            flow_runs,
            step_runs,
            flow_duration,
            active_flows,
        })
    }

    pub fn flow_started(&self) {
        self.active_flows.inc();
    }

    /// Record a finished flow run
    ///
    /// # Arguments
    ///
    /// * `flow` - Flow name
    /// * `status` - "passed" or "failed"
    /// * `duration_secs` - Wall time of the run
    pub fn flow_finished(&self, flow: &str, status: &str, duration_secs: f64) {
        self.active_flows.dec();
        self.flow_runs.with_label_values(&[flow, status]).inc();
        self.flow_duration
            .with_label_values(&[flow])
            .observe(duration_secs);
    }

    pub fn record_step(&self, flow: &str, status: &str) {
        self.step_runs.with_label_values(&[flow, status]).inc();
    }

    pub fn active_flows(&self) -> f64 {
        self.active_flows.get()
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| FlowrunError::Other(format!("Failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer)
            .map_err(|e| FlowrunError::Other(format!("Metrics are not valid UTF-8: {}", e)))
    }
}

impl Default for FlowMetrics {
    fn default() -> Self {
        Self::new()
    }
}
