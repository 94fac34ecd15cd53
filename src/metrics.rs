//! Metrics collection and export module

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Instant;

/// Launcher metrics. Each launcher owns its registry.
pub struct Metrics {
    registry: Registry,

    // Counters
    pub launches_total: IntCounter,
    pub launches_succeeded: IntCounter,
    pub launches_resumed: IntCounter,
    /// Failed launches, labelled by error category
    pub launches_failed: IntCounterVec,
    pub transactions_sent: IntCounter,
    pub transactions_confirmed: IntCounter,
    pub batches_skipped: IntCounter,

    // Histograms
    pub confirmation_latency: Histogram,
    pub launch_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let launches_total = IntCounter::with_opts(Opts::new(
            "launches_total",
            "Total number of token launches attempted",
        ))?;

        let launches_succeeded = IntCounter::with_opts(Opts::new(
            "launches_succeeded",
            "Number of launches that completed",
        ))?;

        let launches_resumed = IntCounter::with_opts(Opts::new(
            "launches_resumed",
            "Number of launches resumed from a checkpoint",
        ))?;

        let launches_failed = IntCounterVec::new(
            Opts::new("launches_failed", "Number of failed launches by error category"),
            &["category"],
        )?;

        let transactions_sent = IntCounter::with_opts(Opts::new(
            "transactions_sent",
            "Number of transactions broadcast",
        ))?;

        let transactions_confirmed = IntCounter::with_opts(Opts::new(
            "transactions_confirmed",
            "Number of transactions confirmed",
        ))?;

        let batches_skipped = IntCounter::with_opts(Opts::new(
            "batches_skipped",
            "Batches skipped because their effect already existed on chain",
        ))?;

        let confirmation_latency = Histogram::with_opts(
            HistogramOpts::new(
                "confirmation_latency_seconds",
                "Time from broadcast to confirmation",
            )
            .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 60.0]),
        )?;

        let launch_latency = Histogram::with_opts(
            HistogramOpts::new("launch_latency_seconds", "End-to-end launch duration")
                .buckets(vec![1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        )?;

        registry.register(Box::new(launches_total.clone()))?;
        registry.register(Box::new(launches_succeeded.clone()))?;
        registry.register(Box::new(launches_resumed.clone()))?;
        registry.register(Box::new(launches_failed.clone()))?;
        registry.register(Box::new(transactions_sent.clone()))?;
        registry.register(Box::new(transactions_confirmed.clone()))?;
        registry.register(Box::new(batches_skipped.clone()))?;
        registry.register(Box::new(confirmation_latency.clone()))?;
        registry.register(Box::new(launch_latency.clone()))?;

        Ok(Self {
            registry,
            launches_total,
            launches_succeeded,
            launches_resumed,
            launches_failed,
            transactions_sent,
            transactions_confirmed,
            batches_skipped,
            confirmation_latency,
            launch_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_failure(&self, category: &str) {
        self.launches_failed.with_label_values(&[category]).inc();
    }

    pub fn failures(&self, category: &str) -> u64 {
        self.launches_failed.with_label_values(&[category]).get()
    }

    /// Prometheus text exposition of every registered metric
    pub fn encode_text(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        histogram.observe(self.elapsed_secs());
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
