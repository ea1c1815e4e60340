//! Feed pipeline metrics
//!
//! Lightweight counters and gauges with Prometheus text rendering.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Counter metric (monotonically increasing)
pub struct Counter {
    value: AtomicU64,
    name: &'static str,
    help: &'static str,
}

impl Counter {
    /// Create a new counter
    pub fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name,
            help,
        }
    }

    /// Increment by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by delta
    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} counter\n{} {}\n",
            self.name,
            self.help,
            self.name,
            self.name,
            self.get()
        )
    }
}

/// Gauge metric (can go up or down)
pub struct Gauge {
    value: AtomicI64,
    name: &'static str,
    help: &'static str,
}

impl Gauge {
    /// Create a new gauge
    pub fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            value: AtomicI64::new(0),
            name,
            help,
        }
    }

    /// Set the gauge value
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} gauge\n{} {}\n",
            self.name,
            self.help,
            self.name,
            self.name,
            self.get()
        )
    }
}

/// All feed metrics, shared between facade, pipeline and workers
pub struct FeedMetrics {
    /// Sequences materialized by workers
    pub sequences_loaded: Counter,
    /// Batches handed to the consumer
    pub batches_delivered: Counter,
    /// Padded elements across delivered batches (primary key)
    pub padded_elements: Counter,
    /// Real (unpadded) elements across delivered batches
    pub valid_elements: Counter,
    /// Batches flagged as exceeding the padding budget
    pub oversized_batches: Counter,
    /// Per-sequence load failures surfaced to the consumer
    pub data_errors: Counter,
    /// Batches loaded but not yet delivered
    pub pending_batches: Gauge,
}

impl FeedMetrics {
    /// Create a fresh metrics set
    pub fn new() -> Self {
        Self {
            sequences_loaded: Counter::new(
                "seqfeed_sequences_loaded_total",
                "Sequences materialized by prefetch workers",
            ),
            batches_delivered: Counter::new(
                "seqfeed_batches_delivered_total",
                "Batches handed to the consumer in plan order",
            ),
            padded_elements: Counter::new(
                "seqfeed_padded_elements_total",
                "Padded elements across delivered batches",
            ),
            valid_elements: Counter::new(
                "seqfeed_valid_elements_total",
                "Real elements across delivered batches",
            ),
            oversized_batches: Counter::new(
                "seqfeed_oversized_batches_total",
                "Singleton batches exceeding the padding budget",
            ),
            data_errors: Counter::new(
                "seqfeed_data_errors_total",
                "Per-sequence load failures surfaced to the consumer",
            ),
            pending_batches: Gauge::new(
                "seqfeed_pending_batches",
                "Batches loaded but not yet delivered",
            ),
        }
    }

    /// Padding waste ratio in [0, 1] over everything delivered so far
    pub fn padding_waste(&self) -> f64 {
        let padded = self.padded_elements.get();
        if padded == 0 {
            return 0.0;
        }
        1.0 - self.valid_elements.get() as f64 / padded as f64
    }

    /// Render all metrics in Prometheus text format
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.sequences_loaded.to_prometheus());
        out.push_str(&self.batches_delivered.to_prometheus());
        out.push_str(&self.padded_elements.to_prometheus());
        out.push_str(&self.valid_elements.to_prometheus());
        out.push_str(&self.oversized_batches.to_prometheus());
        out.push_str(&self.data_errors.to_prometheus());
        out.push_str(&self.pending_batches.to_prometheus());
        out
    }
}

impl Default for FeedMetrics {
    fn default() -> Self {
        Self::new()
    }
}
