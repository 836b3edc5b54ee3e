use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
};

// ============================================================================
// Pipeline Metrics
// ============================================================================
//
// One registry for the whole pipeline:
// - publish attempts and outcomes
// - processing attempts, retries, and terminal outcomes
// - dead-letter routing and dead-letter send failures
// - manual replays
//
// Exposed as Prometheus text on the admin server's /metrics route.
//
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Publisher
    pub publishes_total: IntCounterVec,
    pub publish_duration: HistogramVec,

    // Coordinator
    pub processing_attempts_total: IntCounterVec,
    pub processing_outcomes_total: IntCounterVec,
    pub retry_backoffs_total: IntCounter,

    // Dead-letter
    pub dlq_routed_total: IntCounterVec,
    pub dlq_send_failures_total: IntCounter,
    pub dlq_replays_total: IntCounter,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let publishes_total = IntCounterVec::new(
            Opts::new("publishes_total", "Publish attempts by topic and result"),
            &["topic", "result"],
        )?;
        registry.register(Box::new(publishes_total.clone()))?;

        let publish_duration = HistogramVec::new(
            HistogramOpts::new("publish_duration_seconds", "Publish latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["topic"],
        )?;
        registry.register(Box::new(publish_duration.clone()))?;

        let processing_attempts_total = IntCounterVec::new(
            Opts::new("processing_attempts_total", "Processing attempts by attempt number"),
            &["attempt"],
        )?;
        registry.register(Box::new(processing_attempts_total.clone()))?;

        let processing_outcomes_total = IntCounterVec::new(
            Opts::new("processing_outcomes_total", "Terminal processing outcomes"),
            &["outcome"],
        )?;
        registry.register(Box::new(processing_outcomes_total.clone()))?;

        let retry_backoffs_total = IntCounter::new(
            "retry_backoffs_total",
            "Backoff delays inserted between retry attempts",
        )?;
        registry.register(Box::new(retry_backoffs_total.clone()))?;

        let dlq_routed_total = IntCounterVec::new(
            Opts::new("dlq_routed_total", "Orders routed to the dead-letter topic"),
            &["reason"],
        )?;
        registry.register(Box::new(dlq_routed_total.clone()))?;

        let dlq_send_failures_total = IntCounter::new(
            "dlq_send_failures_total",
            "Dead-letter publishes that themselves failed (fatal)",
        )?;
        registry.register(Box::new(dlq_send_failures_total.clone()))?;

        let dlq_replays_total = IntCounter::new(
            "dlq_replays_total",
            "Dead-lettered orders manually replayed to the main topic",
        )?;
        registry.register(Box::new(dlq_replays_total.clone()))?;

        Ok(Self {
            registry,
            publishes_total,
            publish_duration,
            processing_attempts_total,
            processing_outcomes_total,
            retry_backoffs_total,
            dlq_routed_total,
            dlq_send_failures_total,
            dlq_replays_total,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_publish(&self, topic: &str, success: bool, duration_secs: f64) {
        let result = if success { "success" } else { "failure" };
        self.publishes_total.with_label_values(&[topic, result]).inc();
        self.publish_duration
            .with_label_values(&[topic])
            .observe(duration_secs);
    }

    pub fn record_processing_attempt(&self, attempt: u32) {
        self.processing_attempts_total
            .with_label_values(&[&attempt.to_string()])
            .inc();
    }

    pub fn record_outcome(&self, outcome: &str) {
        self.processing_outcomes_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn record_backoff(&self) {
        self.retry_backoffs_total.inc();
    }

    pub fn record_dlq_routed(&self, reason: &str) {
        self.dlq_routed_total.with_label_values(&[reason]).inc();
    }

    pub fn record_dlq_send_failure(&self) {
        self.dlq_send_failures_total.inc();
    }

    pub fn record_replay(&self) {
        self.dlq_replays_total.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert!(metrics.registry.gather().len() > 0);
    }

    #[test]
    fn test_record_publish() {
        let metrics = Metrics::new().unwrap();
        metrics.record_publish("orders", true, 0.01);
        metrics.record_publish("orders", false, 0.02);

        let gathered = metrics.registry.gather();
        let publishes = gathered
            .iter()
            .find(|m| m.name() == "publishes_total")
            .unwrap();
        assert_eq!(publishes.metric.len(), 2); // success and failure labels
    }

    #[test]
    fn test_record_dlq_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.record_dlq_routed("retries_exhausted");
        metrics.record_dlq_routed("permanent_failure");
        metrics.record_dlq_send_failure();

        let gathered = metrics.registry.gather();
        let routed = gathered
            .iter()
            .find(|m| m.name() == "dlq_routed_total")
            .unwrap();
        assert_eq!(routed.metric.len(), 2);

        let failures = gathered
            .iter()
            .find(|m| m.name() == "dlq_send_failures_total")
            .unwrap();
        assert_eq!(failures.metric[0].counter.value, Some(1.0));
    }

    #[test]
    fn test_record_attempts() {
        let metrics = Metrics::new().unwrap();
        metrics.record_processing_attempt(1);
        metrics.record_processing_attempt(2);
        metrics.record_outcome("succeeded");

        let gathered = metrics.registry.gather();
        let attempts = gathered
            .iter()
            .find(|m| m.name() == "processing_attempts_total")
            .unwrap();
        assert_eq!(attempts.metric.len(), 2);
    }
}
